//! Scoped in-memory TTL cache.
//!
//! One [`RunCache`] is created at the start of a reconciliation run, scoped to
//! the identity of the torrent client connection, and dropped when the run
//! ends. Components receive it by reference; there is no process-wide cache.

mod key;
mod run;
mod ttl;

pub use key::{CacheKey, CacheScope};
pub use run::RunCache;
pub use ttl::{cached_call, CacheSettings, CacheStats, Lookup, TtlCache};
