//! # Cache System
//!
//! Cache tiers, the aggregator that fans requests out over an ordered list
//! of tiers, and the serializer hook used when storing to disk.

// Module declarations
pub mod aggregator;
pub mod providers;
mod serializer;
mod tiered;
mod types;

// Re-export primary types from our various modules
pub use aggregator::{AggregationPolicy, CachePolicies, CachesAggregator};
pub use providers::{FileCache, MemoryCache, ResourceCache};
pub use serializer::{CacheSerializer, PayloadSerializer};
pub use tiered::TieredCache;
pub use types::{CacheConfig, CacheEntry, CacheKey, CacheResult, CacheType, EntryMetadata};
