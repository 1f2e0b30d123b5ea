//! Async record queries with caching, retry, and fallback.
//!
//! Inspired by TanStack Query, this module provides a `RecordQuery<T, S>`
//! type that encapsulates async record fetching, stale-while-revalidate
//! cache serving, exponential-backoff retries, and degraded fallbacks.
//!
//! # Example
//!
//! ```ignore
//! let mut query = client.query::<Article>(&descriptor, fallback_seed);
//!
//! // Serves a fresh cached snapshot immediately (if any) and starts the
//! // revalidating fetch in the background.
//! query.start();
//!
//! // In event loop tick
//! if query.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! // In render
//! for article in query.records() {
//!     render_teaser(article, query.serving_from_cache());
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::cache::CacheStore;
use crate::store::StoreError;

/// Retry schedule for transient remote failures.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
  /// Retries allowed after the initial attempt.
  pub max_retries: u32,
  /// Base backoff delay; the n-th retry waits `base_delay * 2^(n-1)`.
  pub base_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_retries: 3,
      base_delay: Duration::from_millis(1000),
    }
  }
}

impl RetryPolicy {
  fn delay_for(&self, failed_attempts: u32) -> Duration {
    self.base_delay * 2_u32.saturating_pow(failed_attempts)
  }
}

/// Lifecycle of a single query key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchPhase {
  /// Not started.
  Idle,
  /// A fresh cached snapshot was served; the revalidating fetch is running.
  CacheHit,
  /// A remote attempt is running or waiting out its backoff.
  Fetching(u32),
  /// Retries exhausted or the query rejected; serving the best substitute.
  Degraded,
  /// The latest remote read succeeded.
  Settled,
}

/// State transition produced by the background fetch task.
enum FetchUpdate<T> {
  /// The remote read succeeded; the snapshot was persisted.
  Fresh(Vec<T>),
  /// A transient failure; retry `attempt` is waiting out its backoff.
  Retrying { attempt: u32 },
  /// Retries exhausted; a cached snapshot (any age) is the substitute.
  DegradedCache { records: Vec<T>, message: String },
  /// Retries exhausted with no cached snapshot; use the fallback seed.
  DegradedSeed { message: String },
  /// The store rejected the query; no retries, no substitution.
  Rejected { message: String },
}

/// A boxed future that resolves to a record set.
type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<Vec<T>, StoreError>> + Send>>;

/// A factory function that creates futures for fetching records.
type FetcherFn<T> = Arc<dyn Fn() -> BoxFuture<T> + Send + Sync>;

/// Push-style record query for one cache key.
///
/// `RecordQuery` encapsulates:
/// - The fetching logic (via a closure)
/// - Synchronous cache serving with background revalidation
/// - Transient-failure retries with exponential backoff
/// - The degraded fallback order: cached snapshot first, then seed
/// - Async result handling via channels
pub struct RecordQuery<T, S: CacheStore> {
  fetcher: FetcherFn<T>,
  storage: Arc<S>,
  cache_key: String,
  ttl: chrono::Duration,
  policy: RetryPolicy,
  seed: Vec<T>,

  phase: FetchPhase,
  records: Vec<T>,
  error: Option<String>,
  connected: bool,
  serving_from_cache: bool,
  retry_attempt: u32,
  loading: bool,
  receiver: Option<mpsc::UnboundedReceiver<FetchUpdate<T>>>,
}

impl<T, S> RecordQuery<T, S>
where
  T: Clone + Send + Serialize + DeserializeOwned + 'static,
  S: CacheStore + 'static,
{
  /// Create a new query for a cache key with the given fetcher function.
  ///
  /// The fetcher is a closure that returns a future. It is called once per
  /// remote attempt, including retries.
  pub fn new<F, Fut>(cache_key: impl Into<String>, storage: Arc<S>, fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<T>, StoreError>> + Send + 'static,
  {
    Self {
      fetcher: Arc::new(move || Box::pin(fetcher())),
      storage,
      cache_key: cache_key.into(),
      ttl: chrono::Duration::minutes(10),
      policy: RetryPolicy::default(),
      seed: Vec::new(),
      phase: FetchPhase::Idle,
      records: Vec::new(),
      error: None,
      connected: true,
      serving_from_cache: false,
      retry_attempt: 0,
      loading: false,
      receiver: None,
    }
  }

  /// Set how long a cached snapshot counts as fresh.
  pub fn with_ttl(mut self, ttl: chrono::Duration) -> Self {
    self.ttl = ttl;
    self
  }

  /// Set the retry schedule for transient failures.
  pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
    self.policy = policy;
    self
  }

  /// Records to fall back on when retries exhaust and no snapshot exists.
  pub fn with_seed(mut self, seed: Vec<T>) -> Self {
    self.seed = seed;
    self
  }

  /// Records currently suitable for rendering: live, cached, or seed.
  pub fn records(&self) -> &[T] {
    &self.records
  }

  pub fn phase(&self) -> FetchPhase {
    self.phase
  }

  /// Whether a remote fetch (or its backoff) is in progress.
  pub fn is_loading(&self) -> bool {
    self.loading
  }

  /// Error exposed after retry exhaustion or query rejection.
  pub fn error(&self) -> Option<&str> {
    self.error.as_deref()
  }

  /// Outcome of the most recent remote interaction.
  pub fn connected(&self) -> bool {
    self.connected
  }

  /// Whether `records` came from the persisted cache rather than the store.
  pub fn serving_from_cache(&self) -> bool {
    self.serving_from_cache
  }

  pub fn retry_attempt(&self) -> u32 {
    self.retry_attempt
  }

  /// Serve a fresh cached snapshot synchronously (if one exists) and start
  /// the revalidating remote fetch.
  ///
  /// A fresh remote result supersedes the cache-served snapshot once it
  /// lands. This is a no-op while a fetch is already running.
  pub fn start(&mut self) {
    if self.receiver.is_some() {
      return;
    }

    match read_entry::<T, S>(self.storage.as_ref(), &self.cache_key, Some(self.ttl)) {
      Some(records) => {
        self.records = records;
        self.serving_from_cache = true;
        self.phase = FetchPhase::CacheHit;
      }
      None => {
        self.phase = FetchPhase::Fetching(0);
      }
    }

    self.retry_attempt = 0;
    self.loading = true;
    self.spawn_fetch();
  }

  /// Re-run the fetch from attempt zero, regardless of cache freshness.
  ///
  /// Pending updates from the previous run are discarded; the first new
  /// attempt fires immediately with no backoff.
  pub fn refetch(&mut self) {
    self.receiver = None;
    self.retry_attempt = 0;
    self.error = None;
    self.loading = true;
    self.phase = FetchPhase::Fetching(0);
    self.spawn_fetch();
  }

  /// Poll for state transitions from the background fetch.
  ///
  /// Returns `true` if the state changed. Call this in your event loop tick
  /// handler; updates are applied in the order the task produced them.
  pub fn poll(&mut self) -> bool {
    let mut changed = false;
    loop {
      let update = match self.receiver.as_mut() {
        Some(rx) => rx.try_recv(),
        None => break,
      };
      match update {
        Ok(update) => {
          self.apply(update);
          changed = true;
        }
        Err(mpsc::error::TryRecvError::Empty) => break,
        Err(mpsc::error::TryRecvError::Disconnected) => {
          // Task finished; the terminal update (if any) was already drained.
          self.receiver = None;
          break;
        }
      }
    }
    changed
  }

  /// Drive the query until the background fetch reaches a terminal state.
  ///
  /// Poll-loop convenience for callers without an event loop.
  pub async fn wait_settled(&mut self) {
    while self.loading {
      self.poll();
      if !self.loading {
        break;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
  }

  fn apply(&mut self, update: FetchUpdate<T>) {
    match update {
      FetchUpdate::Fresh(records) => {
        self.records = records;
        self.error = None;
        self.connected = true;
        self.serving_from_cache = false;
        self.retry_attempt = 0;
        self.loading = false;
        self.phase = FetchPhase::Settled;
      }
      FetchUpdate::Retrying { attempt } => {
        self.connected = false;
        self.retry_attempt = attempt;
        self.loading = true;
        self.phase = FetchPhase::Fetching(attempt);
      }
      FetchUpdate::DegradedCache { records, message } => {
        self.records = records;
        self.error = Some(message);
        self.connected = false;
        self.serving_from_cache = true;
        self.loading = false;
        self.phase = FetchPhase::Degraded;
      }
      FetchUpdate::DegradedSeed { message } => {
        self.records = self.seed.clone();
        self.error = Some(message);
        self.connected = false;
        self.serving_from_cache = false;
        self.loading = false;
        self.phase = FetchPhase::Degraded;
      }
      FetchUpdate::Rejected { message } => {
        self.error = Some(message);
        self.connected = false;
        self.loading = false;
        self.phase = FetchPhase::Degraded;
      }
    }
  }

  /// Internal: start the background fetch task for the current run.
  fn spawn_fetch(&mut self) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);

    let fetcher = Arc::clone(&self.fetcher);
    let storage = Arc::clone(&self.storage);
    let key = self.cache_key.clone();
    let policy = self.policy;

    tokio::spawn(async move {
      let mut failed_attempts = 0u32;
      loop {
        match fetcher().await {
          Ok(records) => {
            // Persist even if the owner is gone; the snapshot is durable
            // state, not consumer state.
            persist(storage.as_ref(), &key, &records);
            let _ = tx.send(FetchUpdate::Fresh(records));
            return;
          }
          Err(err) if err.is_transient() && failed_attempts < policy.max_retries => {
            let delay = policy.delay_for(failed_attempts);
            failed_attempts += 1;
            debug!(key = %key, attempt = failed_attempts, "remote read failed, retrying in {:?}: {}", delay, err);
            if tx
              .send(FetchUpdate::Retrying {
                attempt: failed_attempts,
              })
              .is_err()
            {
              // Owner dropped the query; stop retrying on its behalf.
              return;
            }
            tokio::time::sleep(delay).await;
          }
          Err(err) if err.is_transient() => {
            let message = format!(
              "remote store unavailable after {} attempts: {}",
              failed_attempts + 1,
              err
            );
            warn!(key = %key, "{}", message);
            let update = match read_entry::<T, S>(storage.as_ref(), &key, None) {
              Some(records) => FetchUpdate::DegradedCache { records, message },
              None => FetchUpdate::DegradedSeed { message },
            };
            let _ = tx.send(update);
            return;
          }
          Err(err) => {
            warn!(key = %key, "remote store rejected query: {}", err);
            let _ = tx.send(FetchUpdate::Rejected {
              message: err.to_string(),
            });
            return;
          }
        }
      }
    });
  }
}

/// Read and decode a cached snapshot. With `fresh_within` set, entries older
/// than the window are ignored; with `None`, any entry qualifies (the
/// degraded-fallback path).
fn read_entry<T, S>(storage: &S, key: &str, fresh_within: Option<chrono::Duration>) -> Option<Vec<T>>
where
  T: DeserializeOwned,
  S: CacheStore,
{
  let entry = match storage.get(key) {
    Ok(Some(entry)) => entry,
    Ok(None) => return None,
    Err(err) => {
      warn!(key = %key, "cache read failed: {}", err);
      return None;
    }
  };

  if let Some(window) = fresh_within {
    if Utc::now() - entry.stored_at >= window {
      return None;
    }
  }

  match serde_json::from_slice(&entry.payload) {
    Ok(records) => Some(records),
    Err(err) => {
      // A malformed payload is a cache miss, never a user-facing failure.
      warn!(key = %key, "discarding malformed cache payload: {}", err);
      None
    }
  }
}

fn persist<T: Serialize, S: CacheStore>(storage: &S, key: &str, records: &[T]) {
  let payload = match serde_json::to_vec(records) {
    Ok(payload) => payload,
    Err(err) => {
      warn!(key = %key, "failed to serialize snapshot: {}", err);
      return;
    }
  };
  if let Err(err) = storage.set(key, &payload, Utc::now()) {
    // A failed write degrades future availability but not this fetch.
    warn!(key = %key, "cache write failed: {}", err);
  }
}

impl<T: std::fmt::Debug, S: CacheStore> std::fmt::Debug for RecordQuery<T, S> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RecordQuery")
      .field("cache_key", &self.cache_key)
      .field("phase", &self.phase)
      .field("retry_attempt", &self.retry_attempt)
      .field("serving_from_cache", &self.serving_from_cache)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStore;
  use crate::store::FailureKind;
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
  use std::sync::Mutex;
  use std::time::Instant;

  fn transient() -> StoreError {
    StoreError::new(FailureKind::Network, "connection refused")
  }

  fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
      max_retries,
      base_delay: Duration::from_millis(10),
    }
  }

  fn seed_cache(storage: &MemoryStore, key: &str, records: &[u32], age: chrono::Duration) {
    let payload = serde_json::to_vec(records).unwrap();
    storage.set(key, &payload, Utc::now() - age).unwrap();
  }

  #[tokio::test]
  async fn success_replaces_records_and_persists_snapshot() {
    let storage = Arc::new(MemoryStore::new());
    let before = Utc::now();
    let mut query = RecordQuery::new("k", Arc::clone(&storage), || async {
      Ok::<_, StoreError>(vec![1u32, 2, 3])
    });

    query.start();
    assert!(query.is_loading());
    query.wait_settled().await;

    assert_eq!(query.records(), &[1, 2, 3]);
    assert_eq!(query.phase(), FetchPhase::Settled);
    assert!(query.connected());
    assert!(!query.serving_from_cache());
    assert!(query.error().is_none());

    let entry = storage.get("k").unwrap().expect("snapshot should persist");
    let cached: Vec<u32> = serde_json::from_slice(&entry.payload).unwrap();
    assert_eq!(cached, vec![1, 2, 3]);
    assert!(entry.stored_at >= before);
  }

  #[tokio::test]
  async fn fresh_cache_served_synchronously_then_superseded() {
    let storage = Arc::new(MemoryStore::new());
    seed_cache(&storage, "k", &[10, 20], chrono::Duration::minutes(1));

    let mut query = RecordQuery::new("k", Arc::clone(&storage), || async {
      tokio::time::sleep(Duration::from_millis(50)).await;
      Ok::<_, StoreError>(vec![30u32])
    });

    query.start();

    // Cached snapshot visible before the remote read lands
    assert_eq!(query.records(), &[10, 20]);
    assert!(query.serving_from_cache());
    assert_eq!(query.phase(), FetchPhase::CacheHit);
    assert!(query.is_loading());

    query.wait_settled().await;

    assert_eq!(query.records(), &[30]);
    assert!(!query.serving_from_cache());
    assert_eq!(query.phase(), FetchPhase::Settled);
  }

  #[tokio::test]
  async fn stale_entry_is_not_served_fresh_but_wins_over_seed_on_exhaustion() {
    let storage = Arc::new(MemoryStore::new());
    // 11 minutes old against the default 10-minute TTL
    seed_cache(&storage, "k", &[7, 8], chrono::Duration::minutes(11));

    let mut query = RecordQuery::new("k", Arc::clone(&storage), || async {
      Err::<Vec<u32>, _>(transient())
    })
    .with_policy(fast_policy(2))
    .with_seed(vec![99]);

    query.start();

    // Stale entries are not the fast path
    assert!(query.records().is_empty());
    assert!(!query.serving_from_cache());
    assert_eq!(query.phase(), FetchPhase::Fetching(0));

    query.wait_settled().await;

    // Most-recently-known-real data beats the seed
    assert_eq!(query.records(), &[7, 8]);
    assert!(query.serving_from_cache());
    assert_eq!(query.phase(), FetchPhase::Degraded);
    assert!(!query.connected());
    assert!(query.error().is_some());
  }

  #[tokio::test]
  async fn exhaustion_with_no_cache_falls_back_to_seed() {
    let storage = Arc::new(MemoryStore::new());
    let mut query = RecordQuery::new("k", Arc::clone(&storage), || async {
      Err::<Vec<u32>, _>(transient())
    })
    .with_policy(fast_policy(1))
    .with_seed(vec![1, 2]);

    query.start();
    query.wait_settled().await;

    assert_eq!(query.records(), &[1, 2]);
    assert!(!query.serving_from_cache());
    assert_eq!(query.phase(), FetchPhase::Degraded);
    assert!(query.error().is_some());

    // Fallback paths never write the cache
    assert!(storage.get("k").unwrap().is_none());
  }

  #[tokio::test]
  async fn retries_back_off_exponentially_and_stop_at_the_cap() {
    let storage = Arc::new(MemoryStore::new());
    let calls: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
    let calls_in_fetch = Arc::clone(&calls);

    let mut query = RecordQuery::new("k", Arc::clone(&storage), move || {
      let calls = Arc::clone(&calls_in_fetch);
      async move {
        calls.lock().unwrap().push(Instant::now());
        Err::<Vec<u32>, _>(transient())
      }
    })
    .with_policy(RetryPolicy {
      max_retries: 2,
      base_delay: Duration::from_millis(40),
    });

    query.start();
    query.wait_settled().await;

    let calls = calls.lock().unwrap();
    // Total attempts never exceed max_retries + 1
    assert_eq!(calls.len(), 3);
    // The n-th retry fires no earlier than base * 2^(n-1) after the failure
    assert!(calls[1] - calls[0] >= Duration::from_millis(40));
    assert!(calls[2] - calls[1] >= Duration::from_millis(80));
    assert_eq!(query.retry_attempt(), 2);
  }

  #[tokio::test]
  async fn rejected_query_is_not_retried_and_keeps_displayed_records() {
    let storage = Arc::new(MemoryStore::new());
    seed_cache(&storage, "k", &[5], chrono::Duration::minutes(1));
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in_fetch = Arc::clone(&calls);

    let mut query = RecordQuery::new("k", Arc::clone(&storage), move || {
      let calls = Arc::clone(&calls_in_fetch);
      async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Err::<Vec<u32>, _>(StoreError::new(FailureKind::Rejected(400), "bad filter"))
      }
    })
    .with_policy(fast_policy(3))
    .with_seed(vec![42]);

    query.start();
    query.wait_settled().await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(query.error().is_some());
    // No substitution beyond what was already displayed from cache
    assert_eq!(query.records(), &[5]);
    assert!(query.serving_from_cache());
  }

  #[tokio::test]
  async fn refetch_resets_attempts_and_fires_immediately() {
    let storage = Arc::new(MemoryStore::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let succeed = Arc::new(AtomicBool::new(false));
    let calls_in_fetch = Arc::clone(&calls);
    let succeed_in_fetch = Arc::clone(&succeed);

    let mut query = RecordQuery::new("k", Arc::clone(&storage), move || {
      let calls = Arc::clone(&calls_in_fetch);
      let succeed = Arc::clone(&succeed_in_fetch);
      async move {
        calls.fetch_add(1, Ordering::SeqCst);
        if succeed.load(Ordering::SeqCst) {
          Ok(vec![1u32])
        } else {
          Err(transient())
        }
      }
    })
    .with_policy(fast_policy(2));

    query.start();
    query.wait_settled().await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(query.phase(), FetchPhase::Degraded);

    succeed.store(true, Ordering::SeqCst);
    let refetch_at = Instant::now();
    query.refetch();
    assert_eq!(query.retry_attempt(), 0);
    query.wait_settled().await;

    // One fresh attempt, no backoff carried over from the exhausted run
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert!(refetch_at.elapsed() < Duration::from_millis(500));
    assert_eq!(query.records(), &[1]);
    assert_eq!(query.phase(), FetchPhase::Settled);
  }

  #[tokio::test]
  async fn malformed_cache_payload_is_treated_as_a_miss() {
    let storage = Arc::new(MemoryStore::new());
    storage.set("k", b"not json", Utc::now()).unwrap();

    let mut query = RecordQuery::new("k", Arc::clone(&storage), || async {
      Err::<Vec<u32>, _>(transient())
    })
    .with_policy(fast_policy(1))
    .with_seed(vec![4]);

    query.start();
    // Not served despite being "fresh" by age
    assert!(query.records().is_empty());

    query.wait_settled().await;
    // The degraded path also skips it and lands on the seed
    assert_eq!(query.records(), &[4]);
    assert!(!query.serving_from_cache());
  }

  #[tokio::test]
  async fn dropped_query_still_persists_a_successful_fetch() {
    let storage = Arc::new(MemoryStore::new());
    let mut query = RecordQuery::new("k", Arc::clone(&storage), || async {
      tokio::time::sleep(Duration::from_millis(30)).await;
      Ok::<_, StoreError>(vec![1u32])
    });

    query.start();
    drop(query);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(storage.get("k").unwrap().is_some());
  }

  #[tokio::test]
  async fn start_is_a_noop_while_a_fetch_is_running() {
    let storage = Arc::new(MemoryStore::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in_fetch = Arc::clone(&calls);

    let mut query = RecordQuery::new("k", Arc::clone(&storage), move || {
      let calls = Arc::clone(&calls_in_fetch);
      async move {
        calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok::<_, StoreError>(vec![1u32])
      }
    });

    query.start();
    query.start();
    query.wait_settled().await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }
}
