//! Offline-first caching for country data.
//!
//! - `policy` decides, per call, whether to serve the cache, hit the network,
//!   and fall back to the cache when the network fails
//! - `storage` persists countries in SQLite and publishes change notifications
//! - `clock` supplies "now" for staleness checks

mod clock;
mod layer;
mod policy;
mod storage;

#[cfg(test)]
pub use clock::ManualClock;
pub use layer::CacheLayer;
pub use policy::{CachePolicy, DEFAULT_VALIDITY_HOURS};
pub use storage::{CountryStore, SqliteStorage};
