//! # Request Options
//!
//! Per-request flags. Flags are independent of each other; the only
//! documented interaction is `FROM_CACHE_ONLY | FROM_LOADER_ONLY`, which
//! consults neither source and fails with `NotCached`.

bitflags::bitflags! {
    /// Request-scoped option mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RequestOptions: u32 {
        /// Ignore the failed-key registry and try loading again
        const RETRY_FAILED = 1 << 0;
        /// Hint that this request may be scheduled after others
        const LOW_PRIORITY = 1 << 1;
        /// Deliver decoded partial payloads while the loader streams
        const PROGRESSIVE_LOAD = 1 << 2;
        /// Deliver the cached copy non-terminally, then load a fresh copy
        const REFRESH_CACHED = 1 << 3;
        /// Let disk tiers read inline instead of through the async file API
        const QUERY_DISK_SYNC = 1 << 4;
        /// Never invoke a loader
        const FROM_CACHE_ONLY = 1 << 5;
        /// Never query the caches
        const FROM_LOADER_ONLY = 1 << 6;
        /// Store the result in memory tiers only
        const AVOID_DISK_STORE = 1 << 7;
        /// Skip the decoder and hand back the raw payload
        const AVOID_DECODE = 1 << 8;
        /// Complete before the cache store finishes
        const DETACH_STORE = 1 << 9;
    }
}

impl RequestOptions {
    /// Whether the caller wants partial results
    pub fn is_progressive(&self) -> bool {
        self.contains(RequestOptions::PROGRESSIVE_LOAD)
    }
}
