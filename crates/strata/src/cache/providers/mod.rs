//! # Cache Providers
//!
//! This module contains the cache tier trait and its single-tier
//! implementations.

// Re-export providers for easier access
pub use self::file::FileCache;
pub use self::memory::MemoryCache;
pub use self::provider::ResourceCache;

// Provider interface
pub mod provider;

// Individual provider implementations
pub mod file;
pub mod memory;
