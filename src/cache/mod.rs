//! Session-scoped dataset cache.
//!
//! This module keeps one snapshot per dataset key:
//! - Stores collections as serialized text in a pluggable session storage
//! - Normalizes the envelope shapes upstream responses arrive in
//! - Treats undecodable entries as absent and purges them on read
//! - Tracks a per-key generation so invalidation wins over in-flight writes

mod envelope;
mod storage;
mod store;
mod traits;

pub use envelope::{DecodeError, Envelope};
pub use storage::{CacheStorage, MemoryStorage, SqliteStorage};
pub use store::CacheStore;
pub use traits::{CacheEntry, LoadError, LoadResult, Notice, Origin, Record, SourceShape};
