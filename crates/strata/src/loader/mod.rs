//! # Loaders
//!
//! Loaders fetch the bytes behind an identifier when no cache tier has them.

pub mod aggregator;
pub mod http;
pub mod provider;

pub use aggregator::LoadersAggregator;
pub use http::HttpLoader;
pub use provider::{LoadRequest, LoaderEvent, LoaderEvents, ResourceLoader};
