//! Engine driver.
//!
//! [`SyncEngine`] wires the coordinator, the wake scheduler, and one
//! controller per registered collection into a single cooperative loop:
//! nothing in the engine runs concurrently with anything else, controllers
//! interleave through their scheduled wakes. Browser-style lifecycle signals
//! arrive over an mpsc channel and are translated into coordinator state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::controller::CollectionSyncController;
use crate::coordinator::{InstallFn, SyncCoordinator};
use crate::error::SyncError;
use crate::policy::{PolicyTable, Priority};
use crate::quota::QuotaTracker;
use crate::remote::{FilterDescriptor, RemoteStore};
use crate::scheduler::Scheduler;
use crate::store::{KvStore, SnapshotCache};

/// Fallback sleep when no wake is armed, so the driver stays responsive to
/// late registrations.
const IDLE_POLL_MS: u64 = 500;

/// Connectivity and visibility signals consumed from the host environment.
/// The engine only reacts to these; it never originates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Online,
    Offline,
    TabVisible,
    TabHidden,
}

pub struct SyncEngine {
    coordinator: Arc<SyncCoordinator>,
    remote: Arc<dyn RemoteStore>,
    cache: SnapshotCache,
    clock: Arc<dyn Clock>,
    controllers: Mutex<HashMap<String, Arc<CollectionSyncController>>>,
    scheduler: Mutex<Scheduler>,
    // Deadline for the debounced tab-focus boost; cleared if the tab hides
    // again before it elapses.
    pending_boost_at: Mutex<Option<i64>>,
}

impl SyncEngine {
    pub fn new(
        config: EngineConfig,
        policies: PolicyTable,
        kv: Arc<dyn KvStore>,
        remote: Arc<dyn RemoteStore>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let quota = QuotaTracker::new(
            Arc::clone(&kv),
            Arc::clone(&clock),
            &config.namespace,
            config.daily_read_limit,
        );
        let cache = SnapshotCache::new(Arc::clone(&kv), config.namespace.clone());
        let coordinator = Arc::new(SyncCoordinator::new(config, policies, quota, clock.clone()));

        Arc::new(Self {
            coordinator,
            remote,
            cache,
            clock,
            controllers: Mutex::new(HashMap::new()),
            scheduler: Mutex::new(Scheduler::new()),
            pending_boost_at: Mutex::new(None),
        })
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    pub fn is_online(&self) -> bool {
        self.coordinator.is_online()
    }

    /// Reads left in today's budget, for diagnostics.
    pub fn remaining_quota(&self) -> u32 {
        self.coordinator.quota().remaining_quota()
    }

    fn lock_controllers(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, Arc<CollectionSyncController>>> {
        self.controllers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_scheduler(&self) -> std::sync::MutexGuard<'_, Scheduler> {
        self.scheduler.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_pending_boost(&self) -> std::sync::MutexGuard<'_, Option<i64>> {
        self.pending_boost_at
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    // =========================================================================
    // Collection lifecycle
    // =========================================================================

    /// Mount a collection: install its cached snapshot, fetch if stale, and
    /// arm its refresh wake. The collection must have a policy.
    pub async fn register_collection(
        &self,
        name: &str,
        filter: Option<FilterDescriptor>,
        install: InstallFn,
    ) -> Result<(), SyncError> {
        let policy = self
            .coordinator
            .policies()
            .get(name)
            .cloned()
            .ok_or_else(|| SyncError::UnknownCollection(name.to_string()))?;

        let controller = Arc::new(CollectionSyncController::new(
            policy,
            filter,
            Arc::clone(&self.coordinator),
            Arc::clone(&self.remote),
            self.cache.clone(),
            Arc::clone(&self.clock),
            install,
        ));

        let delay = controller.start().await;

        self.lock_controllers()
            .insert(name.to_string(), Arc::clone(&controller));
        if let Some(delay) = delay {
            self.lock_scheduler()
                .schedule(name, self.clock.now_ms() + delay);
        }
        info!(collection = %name, scheduled = delay.is_some(), "Collection mounted");
        Ok(())
    }

    /// Unmount a collection: cancel its wake, stop it installing results,
    /// and drop its registration.
    pub fn unregister_collection(&self, name: &str) {
        self.lock_scheduler().cancel(name);
        if let Some(controller) = self.lock_controllers().remove(name) {
            controller.shutdown();
        }
        info!(collection = %name, "Collection unmounted");
    }

    // =========================================================================
    // Driving loop
    // =========================================================================

    /// Run the critical boost once the visibility debounce has elapsed.
    /// A hide event during the debounce cancels the pending boost.
    fn apply_pending_boost(&self) {
        let now = self.clock.now_ms();
        {
            let mut pending = self.lock_pending_boost();
            match *pending {
                Some(due) if due <= now => *pending = None,
                _ => return,
            }
        }
        if self.coordinator.is_visible() {
            self.coordinator.boost_critical();
        }
    }

    /// Service every wake due at the current time, one collection at a time.
    /// Returns how many collections were ticked.
    pub async fn pump(&self) -> usize {
        self.apply_pending_boost();
        let mut ticked = 0;
        loop {
            let now = self.clock.now_ms();
            let due = self.lock_scheduler().pop_due(now);
            let Some(name) = due else {
                break;
            };

            let controller = self.lock_controllers().get(&name).cloned();
            let Some(controller) = controller else {
                // Unregistered between scheduling and firing.
                continue;
            };

            ticked += 1;
            if let Some(delay) = controller.tick().await {
                self.lock_scheduler()
                    .schedule(&name, self.clock.now_ms() + delay);
            }
        }
        ticked
    }

    /// Run the engine: service scheduled wakes and react to lifecycle events
    /// until the event channel closes.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<LifecycleEvent>) {
        info!("Sync engine running");
        loop {
            let sleep_ms = {
                let now = self.clock.now_ms();
                match self.lock_scheduler().next_due() {
                    Some(due) => (due - now).clamp(0, IDLE_POLL_MS as i64) as u64,
                    None => IDLE_POLL_MS,
                }
            };

            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => {
                            info!("Lifecycle channel closed, sync engine stopping");
                            return;
                        }
                    }
                }
                _ = tokio::time::sleep(Duration::from_millis(sleep_ms)) => {}
            }

            self.pump().await;
        }
    }

    /// Apply a connectivity or visibility transition.
    pub async fn handle_event(&self, event: LifecycleEvent) {
        debug!(?event, "Lifecycle event");
        match event {
            LifecycleEvent::Offline => self.coordinator.set_online(false),
            // Resume is passive: zeroed sync times make the next wakes
            // eligible, the wakes themselves stay where they were.
            LifecycleEvent::Online => self.coordinator.set_online(true),
            LifecycleEvent::TabHidden => {
                self.coordinator.set_visible(false);
                *self.lock_pending_boost() = None;
            }
            // The boost is deferred, not slept on: the driver keeps servicing
            // events through the debounce, and a hide cancels the deadline.
            LifecycleEvent::TabVisible => {
                self.coordinator.set_visible(true);
                let debounce = self.coordinator.config().visibility_debounce_ms as i64;
                *self.lock_pending_boost() = Some(self.clock.now_ms() + debounce);
            }
        }
    }

    // =========================================================================
    // Manual triggers
    // =========================================================================

    /// Explicit "refresh now" for a single collection.
    pub async fn trigger_collection_sync(&self, name: &str) {
        let controller = self.lock_controllers().get(name).cloned();
        if let Some(controller) = controller {
            controller.trigger_sync().await;
        }
    }

    /// Explicit "refresh everything now".
    ///
    /// Marks every registered collection stale, then services them all in one
    /// pass: auto-scheduled collections get an immediate wake, manual-priority
    /// ones are fetched directly since they have no scheduled path. No-op if
    /// offline or if a previous global sync is still running.
    pub async fn trigger_global_sync(&self) -> bool {
        if !self.coordinator.trigger_global_sync() {
            return false;
        }

        let controllers: Vec<Arc<CollectionSyncController>> =
            self.lock_controllers().values().cloned().collect();

        let now = self.clock.now_ms();
        for controller in &controllers {
            if controller.priority() == Priority::Manual {
                controller.sync_now().await;
            } else {
                self.lock_scheduler().schedule(controller.name(), now);
            }
        }

        self.pump().await;
        self.coordinator.finish_global_sync();
        true
    }
}
