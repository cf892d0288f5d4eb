//! # retsio-cache
//!
//! Metadata cache for the RETS client.
//!
//! This crate provides:
//! - Cache entries stamped with metadata version and timestamp
//! - The staleness rule deciding when an entry is refetched
//! - File-backed and in-memory storage behind a common trait

pub mod entry;
pub mod error;
pub mod store;

pub use entry::{is_stale, CacheStamp, MetadataCacheEntry};
pub use error::CacheError;
pub use store::{CacheStore, FileCacheStore, MemoryCacheStore, MetadataCache};
