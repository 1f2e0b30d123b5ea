//! Content client that wires the store, cache, and retry policy together.

use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::{CacheStore, MemoryStore, SqliteStore};
use crate::config::Config;
use crate::query::{RecordQuery, RetryPolicy};
use crate::store::types::{Article, Testimonial};
use crate::store::{Direction, QueryDescriptor, StoreClient};

/// Content-data client with transparent caching and retry.
///
/// This wraps the underlying [`StoreClient`] and hands out push-style
/// queries that survive the store being unreachable.
pub struct ContentClient<S: CacheStore> {
  store: StoreClient,
  cache: Arc<S>,
  policy: RetryPolicy,
  ttl: chrono::Duration,
}

impl ContentClient<SqliteStore> {
  /// Create a client backed by the durable on-disk cache.
  pub fn new(config: &Config) -> Result<Self> {
    Self::with_cache(config, Arc::new(SqliteStore::open()?))
  }
}

impl ContentClient<MemoryStore> {
  /// Create a client whose cache lives only as long as the process.
  pub fn ephemeral(config: &Config) -> Result<Self> {
    Self::with_cache(config, Arc::new(MemoryStore::new()))
  }
}

impl<S: CacheStore + 'static> ContentClient<S> {
  /// Create a client over an explicit cache backend.
  pub fn with_cache(config: &Config, cache: Arc<S>) -> Result<Self> {
    let store = StoreClient::new(&config.store)?;

    Ok(Self {
      store,
      cache,
      policy: RetryPolicy {
        max_retries: config.fetch.max_retries,
        base_delay: Duration::from_millis(config.fetch.retry_delay_ms),
      },
      ttl: chrono::Duration::minutes(config.fetch.cache_ttl_minutes),
    })
  }

  /// Build a query for a descriptor with a caller-supplied fallback seed.
  ///
  /// The query is returned idle; call [`RecordQuery::start`] to serve the
  /// cache and begin the remote fetch.
  pub fn query<T>(&self, descriptor: &QueryDescriptor, seed: Vec<T>) -> RecordQuery<T, S>
  where
    T: Clone + Send + Serialize + DeserializeOwned + 'static,
  {
    let store = self.store.clone();
    let descriptor_for_fetch = descriptor.clone();

    RecordQuery::new(descriptor.cache_key(), Arc::clone(&self.cache), move || {
      let store = store.clone();
      let descriptor = descriptor_for_fetch.clone();
      async move { store.read_records(&descriptor).await }
    })
    .with_ttl(self.ttl)
    .with_policy(self.policy)
    .with_seed(seed)
  }

  /// Query for published articles, newest first.
  #[allow(dead_code)]
  pub fn articles(&self, seed: Vec<Article>) -> RecordQuery<Article, S> {
    let descriptor =
      QueryDescriptor::new("articles", "*").ordered_by("published_at", Direction::Descending);
    self.query(&descriptor, seed)
  }

  /// Query for landing-page testimonials.
  #[allow(dead_code)]
  pub fn testimonials(&self, seed: Vec<Testimonial>) -> RecordQuery<Testimonial, S> {
    let descriptor = QueryDescriptor::new("testimonials", "*");
    self.query(&descriptor, seed)
  }

  /// Delete the persisted snapshot for a key. Live query state is untouched.
  pub fn clear_cache(&self, key: &str) -> Result<()> {
    self.cache.delete(key)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Utc;

  fn test_config() -> Config {
    Config::from_yaml("store:\n  base_url: http://localhost:9/v1\n").expect("config should parse")
  }

  #[test]
  fn clear_cache_removes_only_the_named_snapshot() {
    let cache = Arc::new(MemoryStore::new());
    let client = ContentClient::with_cache(&test_config(), Arc::clone(&cache)).unwrap();

    cache.set("a", b"[]", Utc::now()).unwrap();
    cache.set("b", b"[]", Utc::now()).unwrap();

    client.clear_cache("a").unwrap();

    assert!(cache.get("a").unwrap().is_none());
    assert!(cache.get("b").unwrap().is_some());
  }

  #[test]
  fn article_queries_share_a_stable_cache_key() {
    let descriptor =
      QueryDescriptor::new("articles", "*").ordered_by("published_at", Direction::Descending);
    assert_eq!(descriptor.cache_key(), descriptor.clone().cache_key());
  }

  #[test]
  fn typed_queries_use_distinct_cache_slots() {
    let client =
      ContentClient::with_cache(&test_config(), Arc::new(MemoryStore::new())).unwrap();

    let articles = client.articles(Vec::new());
    let testimonials = client.testimonials(Vec::new());

    // Debug output includes the cache key
    assert_ne!(format!("{:?}", articles), format!("{:?}", testimonials));
  }

  #[tokio::test]
  async fn unreachable_store_falls_back_to_the_seed() {
    // Port 9 (discard) refuses connections; one attempt, no backoff wait
    let yaml = "\
store:
  base_url: http://127.0.0.1:9/v1
fetch:
  max_retries: 0
  retry_delay_ms: 10
";
    let config = Config::from_yaml(yaml).unwrap();
    let client = ContentClient::with_cache(&config, Arc::new(MemoryStore::new())).unwrap();

    let seed = vec![Article {
      id: "seed-1".to_string(),
      title: "Welcome back".to_string(),
      summary: String::new(),
      url: "https://example.com/welcome".to_string(),
      source: "Editorial".to_string(),
      category: "Business".to_string(),
      published_at: None,
    }];

    let mut query = client.articles(seed.clone());
    query.start();
    query.wait_settled().await;

    assert_eq!(query.records(), seed.as_slice());
    assert!(!query.serving_from_cache());
    assert!(query.error().is_some());
  }
}
