//! Query descriptors and cache key derivation.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Sort direction for a query ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
  Ascending,
  Descending,
}

impl Direction {
  pub fn as_param(&self) -> &'static str {
    match self {
      Direction::Ascending => "asc",
      Direction::Descending => "desc",
    }
  }
}

/// Comparison operator for a query filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOp {
  Eq,
  Ne,
  Gt,
  Gte,
  Lt,
  Lte,
  Contains,
}

impl FilterOp {
  pub fn as_param(&self) -> &'static str {
    match self {
      FilterOp::Eq => "eq",
      FilterOp::Ne => "ne",
      FilterOp::Gt => "gt",
      FilterOp::Gte => "gte",
      FilterOp::Lt => "lt",
      FilterOp::Lte => "lte",
      FilterOp::Contains => "contains",
    }
  }
}

/// Immutable description of a record read against the remote store.
///
/// The derived cache key identifies the persisted snapshot slot. Two
/// descriptors that normalize identically share a slot; a caller can also
/// force sharing with [`QueryDescriptor::with_cache_key`].
#[derive(Clone, Debug)]
pub struct QueryDescriptor {
  pub source: String,
  pub projection: String,
  pub ordering: Option<(String, Direction)>,
  pub filter: Option<(String, FilterOp, Value)>,
  cache_key: Option<String>,
}

impl QueryDescriptor {
  pub fn new(source: impl Into<String>, projection: impl Into<String>) -> Self {
    Self {
      source: source.into(),
      projection: projection.into(),
      ordering: None,
      filter: None,
      cache_key: None,
    }
  }

  pub fn ordered_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
    self.ordering = Some((field.into(), direction));
    self
  }

  pub fn filtered(mut self, field: impl Into<String>, op: FilterOp, value: Value) -> Self {
    self.filter = Some((field.into(), op, value));
    self
  }

  /// Override the derived cache key so this descriptor shares a slot with
  /// another query.
  pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
    self.cache_key = Some(key.into());
    self
  }

  /// Key for the persisted snapshot slot this query reads and writes.
  pub fn cache_key(&self) -> String {
    if let Some(key) = &self.cache_key {
      return key.clone();
    }

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(self.normalized().as_bytes());
    hex::encode(hasher.finalize())
  }

  /// Human-readable summary, used in log lines.
  pub fn description(&self) -> String {
    let mut parts = vec![format!("{} [{}]", self.source, self.projection)];
    if let Some((field, direction)) = &self.ordering {
      parts.push(format!("order by {} {}", field, direction.as_param()));
    }
    if let Some((field, op, value)) = &self.filter {
      parts.push(format!("where {} {} {}", field, op.as_param(), value));
    }
    parts.join(", ")
  }

  /// Canonical form used for hashing. Field names are trimmed and lowercased
  /// so equivalent descriptors land on the same slot.
  fn normalized(&self) -> String {
    let ordering = self
      .ordering
      .as_ref()
      .map(|(field, direction)| format!("{}:{}", normalize_field(field), direction.as_param()))
      .unwrap_or_default();
    let filter = self
      .filter
      .as_ref()
      .map(|(field, op, value)| format!("{}:{}:{}", normalize_field(field), op.as_param(), value))
      .unwrap_or_default();

    format!(
      "{}|{}|{}|{}",
      normalize_field(&self.source),
      normalize_field(&self.projection),
      ordering,
      filter
    )
  }
}

fn normalize_field(field: &str) -> String {
  field.trim().to_lowercase()
}
