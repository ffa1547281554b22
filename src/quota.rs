//! Daily read-quota tracking.
//!
//! Every remote fetch reports how many rows it read; the counter persists in
//! the shared key-value store so that new tabs pick up the running total.
//! The budget is soft: concurrent tabs can race the read-modify-write and
//! overshoot slightly, and `Critical` collections are admitted regardless.

use std::sync::Arc;
use std::sync::Mutex;

use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::policy::Priority;
use crate::store::KvStore;

/// Fraction of the daily limit at which non-critical refreshes stop.
const SOFT_THROTTLE_RATIO: f64 = 0.8;

pub struct QuotaTracker {
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    daily_limit: u32,
    reads_key: String,
    reset_key: String,
    // Guards the rollover-check-then-mutate sequence within this process.
    state: Mutex<()>,
}

impl QuotaTracker {
    pub fn new(
        kv: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        namespace: &str,
        daily_limit: u32,
    ) -> Self {
        Self {
            kv,
            clock,
            daily_limit,
            reads_key: format!("{}_daily_reads", namespace),
            reset_key: format!("{}_last_reset", namespace),
            state: Mutex::new(()),
        }
    }

    /// Load the persisted counter, clamping anything unparseable or negative
    /// to zero.
    fn load_count(&self) -> u32 {
        match self.kv.get(&self.reads_key) {
            Ok(Some(raw)) => raw.trim().parse::<i64>().unwrap_or(0).max(0) as u32,
            Ok(None) => 0,
            Err(e) => {
                warn!(error = %e, "Failed to read quota counter, assuming 0");
                0
            }
        }
    }

    fn store_count(&self, count: u32) {
        if let Err(e) = self.kv.set(&self.reads_key, &count.to_string()) {
            warn!(error = %e, "Failed to persist quota counter");
        }
    }

    /// Zero the counter if the calendar day has changed since the last reset.
    ///
    /// Idempotent, and safe to run from a tracker reconstructed mid-session
    /// in a new tab: the reset day lives in the shared store.
    fn check_rollover(&self) {
        let today = self.clock.today();
        let stored = match self.kv.get(&self.reset_key) {
            Ok(Some(day)) => day,
            Ok(None) => String::new(),
            Err(e) => {
                warn!(error = %e, "Failed to read quota reset day");
                String::new()
            }
        };

        if stored != today {
            info!(previous = %stored, today = %today, "Daily quota rollover");
            self.store_count(0);
            if let Err(e) = self.kv.set(&self.reset_key, &today) {
                warn!(error = %e, "Failed to persist quota reset day");
            }
        }
    }

    /// Record `n` remote row reads against today's budget.
    pub fn record_read(&self, n: u32) {
        let _guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.check_rollover();
        let count = self.load_count().saturating_add(n);
        self.store_count(count);
        debug!(reads = n, total = count, limit = self.daily_limit, "Recorded remote reads");
    }

    /// Soft admission check: false once the counter passes 80% of the daily
    /// limit, except for `Critical` collections which always pass.
    pub fn should_sync(&self, priority: Priority) -> bool {
        let _guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.check_rollover();

        if priority == Priority::Critical {
            return true;
        }

        let threshold = (self.daily_limit as f64 * SOFT_THROTTLE_RATIO) as u32;
        let count = self.load_count();
        if count > threshold {
            debug!(
                count,
                threshold,
                priority = priority.as_str(),
                "Quota soft throttle engaged"
            );
            false
        } else {
            true
        }
    }

    /// Reads left in today's budget, for diagnostics only.
    pub fn remaining_quota(&self) -> u32 {
        let _guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.check_rollover();
        self.daily_limit.saturating_sub(self.load_count())
    }
}
