//! Cached row snapshots.
//!
//! Each collection persists its full normalized row set under
//! `<namespace>-<table>` and the time of the last successful sync under
//! `<namespace>-<table>-lastSync`. Snapshots are only ever overwritten, never
//! deleted; a corrupt snapshot reads as "no cache".

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::SyncError;
use crate::rows::NormalizedRow;
use crate::store::KvStore;

/// A collection's last persisted row set.
#[derive(Debug, Clone)]
pub struct CachedSnapshot {
    pub rows: Vec<NormalizedRow>,
    /// Epoch milliseconds of the fetch that produced these rows.
    pub cached_at: i64,
}

impl CachedSnapshot {
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.cached_at
    }

    pub fn is_stale(&self, now_ms: i64, refresh_interval_ms: i64) -> bool {
        self.age_ms(now_ms) > refresh_interval_ms
    }
}

/// Snapshot reader/writer for one namespace.
#[derive(Clone)]
pub struct SnapshotCache {
    kv: Arc<dyn KvStore>,
    namespace: String,
}

impl SnapshotCache {
    pub fn new(kv: Arc<dyn KvStore>, namespace: impl Into<String>) -> Self {
        Self {
            kv,
            namespace: namespace.into(),
        }
    }

    fn rows_key(&self, table: &str) -> String {
        format!("{}-{}", self.namespace, table)
    }

    fn last_sync_key(&self, table: &str) -> String {
        format!("{}-{}-lastSync", self.namespace, table)
    }

    /// Load the cached snapshot for `table`, if any.
    ///
    /// Storage failures and malformed JSON both degrade to `None`; the load
    /// path must never fail the caller (the UI installs whatever we return).
    pub fn load(&self, table: &str) -> Option<CachedSnapshot> {
        let raw = match self.kv.get(&self.rows_key(table)) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(table, error = %e, "Failed to read cached snapshot");
                return None;
            }
        };

        let rows: Vec<NormalizedRow> = match serde_json::from_str(&raw) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(table, error = %e, "Corrupt cached snapshot, treating as empty");
                return None;
            }
        };

        let cached_at = match self.kv.get(&self.last_sync_key(table)) {
            Ok(Some(ts)) => ts.trim().parse::<i64>().unwrap_or(0),
            _ => 0,
        };

        debug!(table, rows = rows.len(), cached_at, "Loaded cached snapshot");
        Some(CachedSnapshot { rows, cached_at })
    }

    /// Overwrite the snapshot for `table` and record the sync time.
    pub fn save(&self, table: &str, rows: &[NormalizedRow], now_ms: i64) -> Result<(), SyncError> {
        let raw = serde_json::to_string(rows)?;
        self.kv.set(&self.rows_key(table), &raw)?;
        self.kv.set(&self.last_sync_key(table), &now_ms.to_string())?;
        Ok(())
    }
}

/// Humanize a snapshot age for status display.
pub fn age_display(now_ms: i64, cached_at: i64) -> String {
    let minutes = (now_ms - cached_at) / 60_000;
    if minutes < 1 {
        // Also covers clock skew
        "just now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else if minutes < 1440 {
        format!("{}h ago", minutes / 60)
    } else {
        format!("{}d ago", minutes / 1440)
    }
}
