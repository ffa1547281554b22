//! Persistent key-value storage and the per-collection snapshot cache.
//!
//! The engine persists opaque strings under string keys: cached row snapshots,
//! per-collection sync timestamps, and the quota counter. [`KvStore`] is the
//! seam; [`MemoryKvStore`] backs tests and [`FileKvStore`] backs a real cache
//! directory. [`SnapshotCache`] layers the snapshot key scheme on top.

mod kv;
mod snapshot;

pub use kv::{FileKvStore, KvStore, MemoryKvStore};
pub use snapshot::{age_display, CachedSnapshot, SnapshotCache};
