//! Link health checks: memoized reachability probes backed by a static
//! trust table, so external links can be ranked even when probing fails.

mod health;
mod probe;
mod trust;

pub use health::{LinkHealthCache, LinkVerdict};
pub use probe::{LinkProbe, ProbeResponse, ReqwestProbe};
pub use trust::{TrustTable, TrustedSourceRecord};
