//! checkin-sync - client-side synchronization and caching engine.
//!
//! Keeps a local working set of check-in collections (guests, meals, showers,
//! ...) mirrored from a remote relational store under a daily read budget,
//! while staying responsive offline. Each UI-bound collection mounts a
//! [`controller::CollectionSyncController`] that installs the cached snapshot
//! immediately, then refreshes on a jittered cadence whenever the
//! [`coordinator::SyncCoordinator`] admits it: online, tab visible, quota
//! available, inside business hours where required, and stale.
//!
//! The engine is best-effort by design: the quota is a soft budget shared
//! non-atomically across tabs, conflict resolution is last-write-wins, and
//! every failure degrades to serving the last good cached snapshot.

pub mod clock;
pub mod config;
pub mod controller;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod policy;
pub mod quota;
pub mod remote;
pub mod rows;
pub mod scheduler;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use controller::CollectionSyncController;
pub use coordinator::{Admission, InstallFn, SubscriptionGuard, SyncCoordinator};
pub use engine::{LifecycleEvent, SyncEngine};
pub use error::SyncError;
pub use policy::{CollectionPolicy, PolicyTable, Priority};
pub use quota::QuotaTracker;
pub use remote::{FilterDescriptor, HttpRemoteStore, RemoteStore};
pub use rows::{merge_by_newest, normalize_row, normalize_rows, NormalizedRow};
pub use store::{CachedSnapshot, FileKvStore, KvStore, MemoryKvStore, SnapshotCache};
