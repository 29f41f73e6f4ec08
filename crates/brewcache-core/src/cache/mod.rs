//! In-memory caching module for hot entities.
//!
//! This module provides the `GenericCache` used by the entity managers to
//! avoid redundant document store reads. Entries expire after a per-cache
//! default TTL (5 minutes unless configured) and the cache never holds more
//! than `max_size` entries.
//!
//! Cached data types include:
//! - Custom equipment lists
//! - Method lists per equipment
//! - Coffee beans and brewing notes

pub mod generic;

pub use generic::{CacheOptions, CacheStats, EvictionCallback, GenericCache};
