//! Session-wide sync coordination.
//!
//! One [`SyncCoordinator`] exists per application session, constructed at
//! startup and handed by reference to every controller (no module-level
//! globals). It owns the network/visibility flags, the per-collection
//! last-synced map, the subscription registry, and the admission decision that
//! gates every refresh.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::policy::{PolicyTable, Priority};
use crate::quota::QuotaTracker;
use crate::rows::NormalizedRow;

/// Callback installing a collection's full normalized row set into
/// application-visible state.
pub type InstallFn = Arc<dyn Fn(Vec<NormalizedRow>) + Send + Sync>;

/// Why a collection was (or was not) admitted for a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Eligible,
    Offline,
    TabHidden,
    ManualOnly,
    QuotaExhausted,
    OutsideBusinessHours,
    NotStale,
    UnknownCollection,
}

impl Admission {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Admission::Eligible)
    }
}

#[derive(Debug, Default)]
struct CoordinatorState {
    last_synced_at: HashMap<String, i64>,
    online: bool,
    visible: bool,
}

pub struct SyncCoordinator {
    state: Mutex<CoordinatorState>,
    registry: Mutex<HashMap<String, InstallFn>>,
    quota: QuotaTracker,
    policies: PolicyTable,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    global_sync_busy: AtomicBool,
}

impl SyncCoordinator {
    pub fn new(
        config: EngineConfig,
        policies: PolicyTable,
        quota: QuotaTracker,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            state: Mutex::new(CoordinatorState {
                last_synced_at: HashMap::new(),
                online: true,
                visible: true,
            }),
            registry: Mutex::new(HashMap::new()),
            quota,
            policies,
            config,
            clock,
            global_sync_busy: AtomicBool::new(false),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_registry(&self) -> std::sync::MutexGuard<'_, HashMap<String, InstallFn>> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register a collection's install callback for the lifetime of the
    /// returned guard. Dropping the guard deregisters, so an unmounted
    /// controller's callback cannot be retained.
    pub fn register(
        self: &Arc<Self>,
        name: impl Into<String>,
        install: InstallFn,
    ) -> SubscriptionGuard {
        let name = name.into();
        self.lock_registry().insert(name.clone(), install);
        debug!(collection = %name, "Collection registered");
        SubscriptionGuard {
            coordinator: Arc::clone(self),
            name,
        }
    }

    fn unregister(&self, name: &str) {
        self.lock_registry().remove(name);
        self.lock_state().last_synced_at.remove(name);
        debug!(collection = %name, "Collection deregistered");
    }

    pub fn registered_names(&self) -> Vec<String> {
        self.lock_registry().keys().cloned().collect()
    }

    /// Install rows through the registry. Silently dropped if the collection
    /// has deregistered since the fetch started.
    pub fn dispatch(&self, name: &str, rows: Vec<NormalizedRow>) {
        let install = self.lock_registry().get(name).cloned();
        match install {
            Some(install) => install(rows),
            None => debug!(collection = %name, "Dropping install for deregistered collection"),
        }
    }

    // =========================================================================
    // Admission
    // =========================================================================

    /// Evaluate the idle-to-eligible transition for a collection.
    pub fn admission(&self, name: &str) -> Admission {
        let Some(policy) = self.policies.get(name) else {
            return Admission::UnknownCollection;
        };

        {
            let state = self.lock_state();
            if !state.online {
                return Admission::Offline;
            }
            if !state.visible {
                return Admission::TabHidden;
            }
        }

        if policy.priority == Priority::Manual {
            return Admission::ManualOnly;
        }

        if !self.quota.should_sync(policy.priority) {
            return Admission::QuotaExhausted;
        }

        if policy.business_hours_only && !self.config.is_business_hour(self.clock.local_hour()) {
            return Admission::OutsideBusinessHours;
        }

        let elapsed = self.clock.now_ms() - self.last_synced_at(name);
        if elapsed <= policy.refresh_interval_ms {
            return Admission::NotStale;
        }

        Admission::Eligible
    }

    pub fn last_synced_at(&self, name: &str) -> i64 {
        self.lock_state()
            .last_synced_at
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    /// Record a successful fetch.
    pub fn mark_synced(&self, name: &str, now_ms: i64) {
        self.lock_state()
            .last_synced_at
            .insert(name.to_string(), now_ms);
    }

    /// Zero a collection's last-synced time so its next check is eligible.
    pub fn force_stale(&self, name: &str) {
        self.lock_state().last_synced_at.insert(name.to_string(), 0);
    }

    // =========================================================================
    // Network and visibility transitions
    // =========================================================================

    pub fn is_online(&self) -> bool {
        self.lock_state().online
    }

    pub fn is_visible(&self) -> bool {
        self.lock_state().visible
    }

    /// Connectivity change. Going offline pauses admission without touching
    /// cached state or scheduled positions. Coming back online zeroes every
    /// registered collection's last-synced time so the next wake-up is
    /// immediately eligible; it does not fetch by itself.
    pub fn set_online(&self, online: bool) {
        let was_online = {
            let mut state = self.lock_state();
            let was = state.online;
            state.online = online;
            was
        };

        if online && !was_online {
            info!("Network restored, marking all registered collections stale");
            let names = self.registered_names();
            let mut state = self.lock_state();
            for name in names {
                state.last_synced_at.insert(name, 0);
            }
        } else if !online && was_online {
            info!("Network lost, pausing refresh");
        }
    }

    pub fn set_visible(&self, visible: bool) {
        self.lock_state().visible = visible;
        debug!(visible, "Tab visibility changed");
    }

    /// Tab-focus priority boost: force only the critical collections stale.
    /// Called by the driver after the visibility debounce elapses.
    pub fn boost_critical(&self) {
        let critical = self.policies.critical_names();
        if critical.is_empty() {
            return;
        }
        info!(collections = ?critical, "Tab visible, boosting critical collections");
        let mut state = self.lock_state();
        for name in critical {
            state.last_synced_at.insert(name, 0);
        }
    }

    // =========================================================================
    // Manual sync trigger
    // =========================================================================

    /// Force every registered collection to treat itself as stale.
    ///
    /// Does not fetch; each controller's next scheduled check performs the
    /// actual refresh. No-op while offline or while a previous trigger is
    /// still being serviced. Returns whether the trigger was applied.
    pub fn trigger_global_sync(&self) -> bool {
        if !self.is_online() {
            debug!("Global sync ignored while offline");
            return false;
        }
        if self.global_sync_busy.swap(true, Ordering::SeqCst) {
            debug!("Global sync already in progress");
            return false;
        }

        let names = self.registered_names();
        info!(collections = names.len(), "Manual global sync triggered");
        {
            let mut state = self.lock_state();
            for name in names {
                state.last_synced_at.insert(name, 0);
            }
        }
        true
    }

    /// Clear the global-sync busy flag once the follow-up pass completes.
    pub fn finish_global_sync(&self) {
        self.global_sync_busy.store(false, Ordering::SeqCst);
    }
}

/// Registration handle; dropping it removes the collection from the registry.
pub struct SubscriptionGuard {
    coordinator: Arc<SyncCoordinator>,
    name: String,
}

impl SubscriptionGuard {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.coordinator.unregister(&self.name);
    }
}
