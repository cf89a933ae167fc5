//! Local caching module for offline data access.
//!
//! `CacheManager` keeps the last response for each transactions query so
//! it can be shown again when Plaid is unreachable. Entries are JSON files
//! in the cache directory and are reported as stale after 60 minutes.

pub mod manager;

pub use manager::{CacheManager, CachedTransactions};
