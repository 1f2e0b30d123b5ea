//! Lightweight reachability probe for external links.

use std::time::Duration;

use color_eyre::{eyre::eyre, Result};

/// Outcome of a probe that got an HTTP response.
#[derive(Clone, Debug)]
pub struct ProbeResponse {
  pub status: u16,
  /// URL after following redirects.
  pub final_url: String,
  pub redirected: bool,
}

/// Trait for probe backends.
///
/// Probe errors are reachability verdicts, not faults: a timeout or a
/// blocked request means "unknown", and callers must not escalate it.
#[async_trait::async_trait]
pub trait LinkProbe: Send + Sync {
  async fn head(&self, url: &str) -> Result<ProbeResponse, String>;
}

/// Probe backed by a shared reqwest client issuing HEAD requests.
pub struct ReqwestProbe {
  http: reqwest::Client,
}

impl ReqwestProbe {
  pub fn new(timeout: Duration) -> Result<Self> {
    let http = reqwest::Client::builder()
      .connect_timeout(timeout)
      .timeout(timeout)
      .redirect(reqwest::redirect::Policy::limited(5))
      .build()
      .map_err(|e| eyre!("Failed to build probe HTTP client: {}", e))?;

    Ok(Self { http })
  }
}

#[async_trait::async_trait]
impl LinkProbe for ReqwestProbe {
  async fn head(&self, url: &str) -> Result<ProbeResponse, String> {
    let response = self.http.head(url).send().await.map_err(|err| {
      if err.is_timeout() {
        format!("probe timed out: {}", err)
      } else if err.is_redirect() {
        format!("redirect limit exceeded: {}", err)
      } else {
        format!("probe failed: {}", err)
      }
    })?;

    let final_url = response.url().to_string();
    Ok(ProbeResponse {
      status: response.status().as_u16(),
      redirected: final_url.trim_end_matches('/') != url.trim_end_matches('/'),
      final_url,
    })
  }
}
