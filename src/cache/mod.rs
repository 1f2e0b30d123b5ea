//! Durable snapshot cache backing the record fetch layer.
//!
//! Payloads are opaque serialized blobs keyed by the owning query's cache
//! key. The store never decides freshness; readers compare `stored_at`
//! against their own TTL, so an entry can be "stale" for the fast path and
//! still usable as a degraded fallback.

mod storage;

pub use storage::{CacheEntry, CacheStore, MemoryStore, SqliteStore};
