//! Persistent stores behind the offline layer.
//!
//! - Static asset cache: full responses keyed by request, grouped by cache generation
//! - Local response store: last successful JSON payload per API URL
//!
//! Neither store expires entries; stale asset generations are removed wholesale
//! on activation.

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::SqliteStorage;
pub use traits::{CacheStorage, CachedApiPayload};
