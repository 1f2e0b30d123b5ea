//! Content record types served by the remote store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A published article teaser from the `articles` collection.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Article {
  pub id: String,
  pub title: String,
  #[serde(default)]
  pub summary: String,
  pub url: String,
  /// Display name of the publishing source, e.g. "McKinsey & Company".
  pub source: String,
  pub category: String,
  #[serde(default)]
  pub published_at: Option<DateTime<Utc>>,
}

/// A client testimonial from the `testimonials` collection.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Testimonial {
  pub id: String,
  pub author: String,
  #[serde(default)]
  pub role: String,
  pub quote: String,
  #[serde(default)]
  pub rating: u8,
}
