//! Generation result caching with TTL expiry and file persistence.

pub mod response_cache;

pub use response_cache::{CacheEntry, CacheStats, ResponseCache};
