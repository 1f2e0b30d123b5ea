//! Memoized link validation with single-flight probing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tracing::debug;
use url::Url;

use crate::store::types::Article;

use super::probe::LinkProbe;
use super::trust::{TrustTable, TrustedSourceRecord};

/// Reachability and trust verdict for one normalized URL.
///
/// Verdicts are immutable; an expired one is superseded by the next probe,
/// never mutated in place.
#[derive(Clone, Debug)]
pub struct LinkVerdict {
  pub valid: bool,
  /// HTTP status, or 0 when the probe could not produce one.
  pub status_code: u16,
  /// Final URL when the probe was redirected away from the requested one.
  pub redirect_target: Option<String>,
  /// Static trust weight for the URL's domain, 0-100.
  pub authority_score: u8,
  pub checked_at: DateTime<Utc>,
  pub failure_reason: Option<String>,
}

/// Link health service.
///
/// Caches verdicts for a TTL window and coalesces concurrent probes of the
/// same URL into one outstanding request. Every failure mode resolves to a
/// verdict; this service never errors outward.
pub struct LinkHealthCache {
  probe: Arc<dyn LinkProbe>,
  trust: TrustTable,
  ttl: Duration,
  verdicts: Mutex<HashMap<String, LinkVerdict>>,
  in_flight: Mutex<HashMap<String, watch::Receiver<Option<LinkVerdict>>>>,
}

enum Flight {
  /// This caller runs the probe and publishes the verdict.
  Leader(watch::Sender<Option<LinkVerdict>>),
  /// Another caller's probe is outstanding; wait for its verdict.
  Follower(watch::Receiver<Option<LinkVerdict>>),
}

impl LinkHealthCache {
  pub fn new(probe: Arc<dyn LinkProbe>, trust: TrustTable) -> Self {
    Self {
      probe,
      trust,
      ttl: Duration::hours(24),
      verdicts: Mutex::new(HashMap::new()),
      in_flight: Mutex::new(HashMap::new()),
    }
  }

  /// Set how long a verdict stays fresh.
  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  /// Classify a URL, probing it at most once per TTL window.
  pub async fn validate(&self, url: &str) -> LinkVerdict {
    let key = normalize_url(url);

    if let Some(verdict) = self.cached(&key) {
      return verdict;
    }

    let flight = {
      let mut in_flight = lock(&self.in_flight);
      match in_flight.get(&key) {
        Some(rx) => Flight::Follower(rx.clone()),
        None => {
          let (tx, rx) = watch::channel(None);
          in_flight.insert(key.clone(), rx);
          Flight::Leader(tx)
        }
      }
    };

    match flight {
      Flight::Leader(tx) => {
        let verdict = self.run_probe(url).await;
        lock(&self.verdicts).insert(key.clone(), verdict.clone());
        lock(&self.in_flight).remove(&key);
        let _ = tx.send(Some(verdict.clone()));
        verdict
      }
      Flight::Follower(mut rx) => {
        debug!(url = %key, "joining in-flight probe");
        let shared = match rx.wait_for(|value| value.is_some()).await {
          Ok(value) => value.clone(),
          Err(_) => None,
        };
        match shared {
          Some(verdict) => verdict,
          // Leader vanished without publishing; probe directly.
          None => {
            let verdict = self.run_probe(url).await;
            lock(&self.verdicts).insert(key, verdict.clone());
            verdict
          }
        }
      }
    }
  }

  /// Active trusted sources, optionally narrowed to one category.
  pub fn trusted_sources(&self, category: Option<&str>) -> Vec<TrustedSourceRecord> {
    self.trust.sources(category)
  }

  /// Editorial substitute articles for a category with no validated live
  /// content. Always non-empty and never touches the network.
  pub fn fallback_articles(&self, category: &str) -> Vec<Article> {
    self.trust.fallback_articles(category)
  }

  fn cached(&self, key: &str) -> Option<LinkVerdict> {
    let verdicts = lock(&self.verdicts);
    verdicts
      .get(key)
      .filter(|verdict| Utc::now() - verdict.checked_at < self.ttl)
      .cloned()
  }

  async fn run_probe(&self, url: &str) -> LinkVerdict {
    // Authority never needs the network, so it survives probe failures.
    let authority_score = domain_of(url)
      .map(|domain| self.trust.authority_score(&domain))
      .unwrap_or(0);

    match self.probe.head(url).await {
      Ok(response) => {
        let valid = (200..300).contains(&response.status);
        LinkVerdict {
          valid,
          status_code: response.status,
          redirect_target: response.redirected.then(|| response.final_url.clone()),
          authority_score,
          checked_at: Utc::now(),
          failure_reason: (!valid).then(|| format!("status {}", response.status)),
        }
      }
      Err(reason) => {
        // Expected for cross-origin or offline checks: unknown, not invalid.
        debug!(url = %url, "link probe failed: {}", reason);
        LinkVerdict {
          valid: false,
          status_code: 0,
          redirect_target: None,
          authority_score,
          checked_at: Utc::now(),
          failure_reason: Some(reason),
        }
      }
    }
  }
}

/// Recover the guard from a poisoned lock; verdict maps stay usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  match mutex.lock() {
    Ok(guard) => guard,
    Err(poisoned) => poisoned.into_inner(),
  }
}

/// Canonical cache key for a URL: parsed form with the fragment dropped and
/// a bare root path trimmed. Unparseable input is keyed as given.
fn normalize_url(raw: &str) -> String {
  match Url::parse(raw.trim()) {
    Ok(mut url) => {
      url.set_fragment(None);
      let mut normalized = url.to_string();
      if url.path() == "/" && normalized.ends_with('/') {
        normalized.pop();
      }
      normalized
    }
    Err(_) => raw.trim().to_string(),
  }
}

fn domain_of(url: &str) -> Option<String> {
  Url::parse(url.trim())
    .ok()
    .and_then(|parsed| parsed.host_str().map(|host| host.to_string()))
}
