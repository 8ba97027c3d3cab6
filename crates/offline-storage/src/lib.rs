//! Offline Cache Storage Layer
//!
//! This crate provides the bucketed response store used by the offline
//! cache, with a durable local-disk backend and an in-memory backend.

pub mod backend;
pub mod entry;
pub mod error;
pub mod local;
pub mod memory;

pub use backend::{CacheStore, bucket_name, parse_bucket_name, validate_bucket_name};
pub use entry::{CacheEntry, CacheKey, EntrySummary};
pub use error::StorageError;
pub use local::LocalStore;
pub use memory::MemoryStore;
