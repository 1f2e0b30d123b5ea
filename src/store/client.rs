//! HTTP client for the hosted record store.

use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::StoreConfig;

use super::descriptor::QueryDescriptor;

/// Classification of a failed store read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
  /// The request could not complete (connect, TLS, timeout).
  Network,
  /// The store reported a server-side error (5xx).
  Remote(u16),
  /// The store rejected the query itself (4xx); retrying cannot help.
  Rejected(u16),
  /// The response body did not decode as the expected record shape.
  Decode,
}

/// Error from a store read, carrying enough to pick a retry strategy.
#[derive(Clone, Debug)]
pub struct StoreError {
  pub kind: FailureKind,
  pub message: String,
}

impl StoreError {
  pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      message: message.into(),
    }
  }

  /// Transient failures are worth retrying with backoff.
  pub fn is_transient(&self) -> bool {
    matches!(self.kind, FailureKind::Network | FailureKind::Remote(_))
  }
}

impl std::fmt::Display for StoreError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self.kind {
      FailureKind::Network => write!(f, "network failure: {}", self.message),
      FailureKind::Remote(status) => {
        write!(f, "remote read failure (status {}): {}", status, self.message)
      }
      FailureKind::Rejected(status) => {
        write!(f, "query rejected (status {}): {}", status, self.message)
      }
      FailureKind::Decode => write!(f, "malformed store response: {}", self.message),
    }
  }
}

impl std::error::Error for StoreError {}

/// Read-only client for the hosted record store.
#[derive(Clone)]
pub struct StoreClient {
  http: reqwest::Client,
  base_url: String,
  api_key: Option<String>,
}

impl StoreClient {
  pub fn new(config: &StoreConfig) -> Result<Self> {
    let http = reqwest::Client::builder()
      .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
      .timeout(Duration::from_millis(config.request_timeout_ms))
      .build()
      .map_err(|e| eyre!("Failed to build store HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url: config.base_url.trim_end_matches('/').to_string(),
      api_key: crate::config::Config::api_key(),
    })
  }

  /// Read the records selected by a descriptor.
  pub async fn read_records<T>(&self, descriptor: &QueryDescriptor) -> Result<Vec<T>, StoreError>
  where
    T: DeserializeOwned,
  {
    let mut request = self
      .http
      .get(self.records_url(descriptor))
      .query(&[("select", descriptor.projection.as_str())]);

    if let Some((field, direction)) = &descriptor.ordering {
      request = request.query(&[("order_by", field.as_str()), ("direction", direction.as_param())]);
    }
    if let Some((field, op, value)) = &descriptor.filter {
      request = request.query(&[
        ("where", field.as_str()),
        ("op", op.as_param()),
        ("value", filter_value_param(value).as_str()),
      ]);
    }
    if let Some(key) = &self.api_key {
      request = request.bearer_auth(key);
    }

    let response = request.send().await.map_err(map_reqwest_error)?;

    let status = response.status();
    if status.is_server_error() {
      return Err(StoreError::new(
        FailureKind::Remote(status.as_u16()),
        status.to_string(),
      ));
    }
    if !status.is_success() {
      return Err(StoreError::new(
        FailureKind::Rejected(status.as_u16()),
        status.to_string(),
      ));
    }

    response
      .json::<Vec<T>>()
      .await
      .map_err(|e| StoreError::new(FailureKind::Decode, e.to_string()))
  }

  fn records_url(&self, descriptor: &QueryDescriptor) -> String {
    format!("{}/collections/{}/records", self.base_url, descriptor.source)
  }
}

fn map_reqwest_error(err: reqwest::Error) -> StoreError {
  if err.is_timeout() {
    return StoreError::new(FailureKind::Network, format!("request timed out: {}", err));
  }
  StoreError::new(FailureKind::Network, err.to_string())
}

/// Query-string form of a filter value; strings go through bare, everything
/// else as JSON text.
fn filter_value_param(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}
