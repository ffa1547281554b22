//! Per-collection sync controller.
//!
//! One controller per UI-bound collection. It installs the cached snapshot
//! synchronously at mount so the UI never blanks, then runs the
//! load -> admission -> fetch -> normalize -> install -> persist loop, falling
//! back to cache on any fetch failure. Fetches for one collection are strictly
//! serialized: the controller only runs when its single scheduler wake fires.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, error, info};

use crate::clock::Clock;
use crate::coordinator::{Admission, InstallFn, SubscriptionGuard, SyncCoordinator};
use crate::policy::{CollectionPolicy, Priority};
use crate::remote::{FilterDescriptor, RemoteStore};
use crate::rows::{merge_by_newest, normalize_rows};
use crate::scheduler::jittered_delay;
use crate::store::SnapshotCache;

pub struct CollectionSyncController {
    policy: CollectionPolicy,
    filter: Option<FilterDescriptor>,
    coordinator: Arc<SyncCoordinator>,
    remote: Arc<dyn RemoteStore>,
    cache: SnapshotCache,
    clock: Arc<dyn Clock>,
    active: AtomicBool,
    // True while a fetch is outstanding; overlapping attempts are dropped.
    fetching: AtomicBool,
    last_error: Mutex<Option<String>>,
    // Held for the controller's lifetime; dropping it deregisters.
    _subscription: SubscriptionGuard,
}

// Clears the in-flight flag on every exit path of `fetch_and_install`.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl CollectionSyncController {
    pub fn new(
        policy: CollectionPolicy,
        filter: Option<FilterDescriptor>,
        coordinator: Arc<SyncCoordinator>,
        remote: Arc<dyn RemoteStore>,
        cache: SnapshotCache,
        clock: Arc<dyn Clock>,
        install: InstallFn,
    ) -> Self {
        let subscription = coordinator.register(policy.name.clone(), install);
        Self {
            policy,
            filter,
            coordinator,
            remote,
            cache,
            clock,
            active: AtomicBool::new(true),
            fetching: AtomicBool::new(false),
            last_error: Mutex::new(None),
            _subscription: subscription,
        }
    }

    pub fn name(&self) -> &str {
        &self.policy.name
    }

    pub fn priority(&self) -> Priority {
        self.policy.priority
    }

    /// Whether the engine currently has connectivity, for status display.
    pub fn is_connected(&self) -> bool {
        self.coordinator.is_online()
    }

    /// Last fetch error, for diagnostic display. Cleared on the next success.
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop installing results and rescheduling. Called at unmount; an
    /// in-flight fetch that resolves afterwards is discarded.
    pub fn shutdown(&self) {
        self.active.store(false, Ordering::SeqCst);
        debug!(collection = %self.policy.name, "Controller shut down");
    }

    /// Cold start: install whatever is cached, then fetch immediately if the
    /// cache is missing or older than the refresh interval (subject to
    /// admission). Returns the delay until the next scheduled check, or
    /// `None` for manual-priority collections which are never auto-scheduled.
    pub async fn start(&self) -> Option<i64> {
        let now = self.clock.now_ms();
        let snapshot = self.cache.load(&self.policy.name);

        let needs_fetch = match snapshot {
            Some(snapshot) => {
                let stale = snapshot.is_stale(now, self.policy.refresh_interval_ms);
                info!(
                    collection = %self.policy.name,
                    rows = snapshot.rows.len(),
                    stale,
                    "Installed cached snapshot"
                );
                self.coordinator.dispatch(&self.policy.name, snapshot.rows);
                stale
            }
            None => true,
        };

        if needs_fetch && self.coordinator.admission(&self.policy.name).is_eligible() {
            self.fetch_and_install().await;
        }

        self.next_delay()
    }

    /// Scheduled wake-up: re-evaluate admission and fetch if eligible,
    /// otherwise silently skip. Either way, returns the delay for the next
    /// check so the loop keeps its cadence.
    pub async fn tick(&self) -> Option<i64> {
        if !self.is_active() {
            return None;
        }

        match self.coordinator.admission(&self.policy.name) {
            Admission::Eligible => {
                self.fetch_and_install().await;
            }
            reason => {
                debug!(collection = %self.policy.name, ?reason, "Refresh skipped");
            }
        }

        if self.is_active() {
            self.next_delay()
        } else {
            None
        }
    }

    /// Explicit per-collection refresh: treat the collection as stale and
    /// fetch now, still subject to the admission rules.
    pub async fn trigger_sync(&self) {
        self.coordinator.force_stale(&self.policy.name);
        match self.coordinator.admission(&self.policy.name) {
            Admission::Eligible => self.fetch_and_install().await,
            reason => {
                debug!(collection = %self.policy.name, ?reason, "Manual refresh not admitted");
            }
        }
    }

    /// Fetch on behalf of the global manual trigger. Unlike [`trigger_sync`]
    /// this admits manual-priority collections, which have no other sync path;
    /// the remaining gates (connectivity, visibility, quota) still apply.
    ///
    /// [`trigger_sync`]: CollectionSyncController::trigger_sync
    pub async fn sync_now(&self) {
        if !self.is_active() {
            return;
        }
        self.coordinator.force_stale(&self.policy.name);
        match self.coordinator.admission(&self.policy.name) {
            Admission::Eligible | Admission::ManualOnly => self.fetch_and_install().await,
            reason => {
                debug!(collection = %self.policy.name, ?reason, "Global refresh not admitted");
            }
        }
    }

    fn next_delay(&self) -> Option<i64> {
        if self.policy.priority == Priority::Manual {
            return None;
        }
        Some(jittered_delay(
            self.policy.refresh_interval_ms,
            self.coordinator.config().jitter_ms,
        ))
    }

    /// One fetch attempt. On success the remote result is authoritative for
    /// the fetched range: unfiltered fetches replace the snapshot outright,
    /// filtered (partial) fetches merge into it by newest timestamp so rows
    /// outside the range survive. On failure the previous snapshot stays
    /// installed and the failure only surfaces through logs and `last_error`.
    ///
    /// At most one fetch per collection is in flight: a manual trigger racing
    /// a scheduled wake is dropped while the first fetch is outstanding, so a
    /// stale result can never install over a newer one.
    async fn fetch_and_install(&self) {
        if self.fetching.swap(true, Ordering::SeqCst) {
            debug!(collection = %self.policy.name, "Fetch already in flight, skipping");
            return;
        }
        let _in_flight = InFlight(&self.fetching);

        let name = self.policy.name.clone();
        let result = self.remote.fetch_rows(&name, self.filter.as_ref()).await;

        let raw = match result {
            Ok(raw) => raw,
            Err(e) => {
                error!(collection = %name, error = %e, "Fetch failed, keeping cached data");
                *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) =
                    Some(e.to_string());
                return;
            }
        };

        let now = self.clock.now_ms();
        self.coordinator.quota().record_read(raw.len() as u32);

        let date_field = self.filter.as_ref().and_then(|f| f.date_field.as_deref());
        let fetched = normalize_rows(&raw, date_field, now);

        let rows = if self.filter.is_some() {
            let cached = self
                .cache
                .load(&name)
                .map(|s| s.rows)
                .unwrap_or_default();
            merge_by_newest(cached, fetched)
        } else {
            fetched
        };

        // The component may have unmounted while the fetch was in flight.
        if !self.is_active() {
            debug!(collection = %name, "Discarding fetch result after shutdown");
            return;
        }

        info!(collection = %name, rows = rows.len(), "Collection refreshed");
        self.coordinator.dispatch(&name, rows.clone());
        if let Err(e) = self.cache.save(&name, &rows, now) {
            error!(collection = %name, error = %e, "Failed to persist snapshot");
        }
        self.coordinator.mark_synced(&name, now);
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::EngineConfig;
    use crate::error::SyncError;
    use crate::policy::PolicyTable;
    use crate::quota::QuotaTracker;
    use crate::rows::NormalizedRow;
    use crate::store::MemoryKvStore;

    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    use futures::future::BoxFuture;
    use futures::FutureExt;
    use serde_json::{json, Value};

    const HOUR_MS: i64 = 3_600_000;
    const NOON: i64 = 12 * HOUR_MS;

    /// Remote store that replays a scripted sequence of responses.
    struct ScriptedRemote {
        responses: StdMutex<VecDeque<Result<Vec<Value>, SyncError>>>,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl ScriptedRemote {
        fn new(responses: Vec<Result<Vec<Value>, SyncError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: StdMutex::new(responses.into()),
                calls: std::sync::atomic::AtomicUsize::new(0),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl RemoteStore for ScriptedRemote {
        fn fetch_rows<'a>(
            &'a self,
            _table: &'a str,
            _filter: Option<&'a FilterDescriptor>,
        ) -> BoxFuture<'a, Result<Vec<Value>, SyncError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let response = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(vec![]));
            async move { response }.boxed()
        }
    }

    /// Remote store that blocks every fetch until a permit is released.
    struct GatedRemote {
        gate: tokio::sync::Semaphore,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl GatedRemote {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                gate: tokio::sync::Semaphore::new(0),
                calls: std::sync::atomic::AtomicUsize::new(0),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl RemoteStore for GatedRemote {
        fn fetch_rows<'a>(
            &'a self,
            _table: &'a str,
            _filter: Option<&'a FilterDescriptor>,
        ) -> BoxFuture<'a, Result<Vec<Value>, SyncError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            async move {
                let _permit = self.gate.acquire().await;
                Ok(vec![json!({ "id": "1" })])
            }
            .boxed()
        }
    }

    struct Harness {
        coordinator: Arc<SyncCoordinator>,
        cache: SnapshotCache,
        clock: Arc<ManualClock>,
        kv: Arc<MemoryKvStore>,
        installed: Arc<StdMutex<Vec<Vec<NormalizedRow>>>>,
    }

    fn harness(policies: Vec<CollectionPolicy>) -> Harness {
        let clock = ManualClock::new(NOON);
        let kv = Arc::new(MemoryKvStore::new());
        let quota = QuotaTracker::new(kv.clone(), clock.clone(), "checkin", 10_000);
        let mut config = EngineConfig::default();
        config.jitter_ms = 0;
        let coordinator = Arc::new(SyncCoordinator::new(
            config,
            PolicyTable::new(policies),
            quota,
            clock.clone(),
        ));
        let cache = SnapshotCache::new(kv.clone(), "checkin");
        Harness {
            coordinator,
            cache,
            clock,
            kv,
            installed: Arc::new(StdMutex::new(Vec::new())),
        }
    }

    fn controller(
        h: &Harness,
        policy: CollectionPolicy,
        filter: Option<FilterDescriptor>,
        remote: Arc<ScriptedRemote>,
    ) -> CollectionSyncController {
        let installed = Arc::clone(&h.installed);
        CollectionSyncController::new(
            policy,
            filter,
            Arc::clone(&h.coordinator),
            remote,
            h.cache.clone(),
            h.clock.clone(),
            Arc::new(move |rows| installed.lock().unwrap().push(rows)),
        )
    }

    fn meals_policy() -> CollectionPolicy {
        CollectionPolicy::new("meals", 300_000, Priority::Normal)
    }

    #[tokio::test]
    async fn test_cold_start_without_cache_fetches() {
        let h = harness(vec![meals_policy()]);
        let remote = ScriptedRemote::new(vec![Ok(vec![
            json!({ "id": "1", "lastUpdated": 100 }),
            json!({ "id": "2", "lastUpdated": 200 }),
        ])]);
        let ctrl = controller(&h, meals_policy(), None, remote.clone());

        let delay = ctrl.start().await;
        assert_eq!(remote.call_count(), 1);
        assert_eq!(delay, Some(300_000));

        let installs = h.installed.lock().unwrap();
        assert_eq!(installs.len(), 1);
        assert_eq!(installs[0].len(), 2);
        drop(installs);

        // Snapshot persisted and sync time recorded.
        assert!(h.cache.load("meals").is_some());
        assert_eq!(h.coordinator.last_synced_at("meals"), NOON);
        // Quota charged for the rows read.
        assert_eq!(h.coordinator.quota().remaining_quota(), 9_998);
    }

    #[tokio::test]
    async fn test_cold_start_with_fresh_cache_skips_fetch() {
        let h = harness(vec![meals_policy()]);
        let rows = vec![NormalizedRow {
            id: "1".to_string(),
            last_updated: 100,
            data: json!({ "id": "1" }),
        }];
        h.cache.save("meals", &rows, NOON - 60_000).unwrap();

        let remote = ScriptedRemote::new(vec![]);
        let ctrl = controller(&h, meals_policy(), None, remote.clone());

        ctrl.start().await;
        assert_eq!(remote.call_count(), 0);
        // Cached rows still installed for immediate display.
        assert_eq!(h.installed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_cached_rows() {
        let h = harness(vec![meals_policy()]);
        let rows: Vec<NormalizedRow> = (1..=3)
            .map(|i| NormalizedRow {
                id: i.to_string(),
                last_updated: 100,
                data: json!({ "id": i.to_string() }),
            })
            .collect();
        // Stale cache forces an immediate fetch attempt.
        h.cache.save("meals", &rows, NOON - HOUR_MS).unwrap();

        let remote = ScriptedRemote::new(vec![Err(SyncError::ServerError("boom".to_string()))]);
        let ctrl = controller(&h, meals_policy(), None, remote.clone());

        ctrl.start().await;
        assert_eq!(remote.call_count(), 1);

        // Cached rows remain the installed state.
        let installs = h.installed.lock().unwrap();
        assert_eq!(installs.len(), 1);
        assert_eq!(installs[0].len(), 3);
        drop(installs);

        // Failure leaves the collection eligible for the next attempt.
        assert_eq!(h.coordinator.last_synced_at("meals"), 0);
        assert!(ctrl.last_error().unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_success_clears_last_error() {
        let h = harness(vec![meals_policy()]);
        let remote = ScriptedRemote::new(vec![
            Err(SyncError::RateLimited),
            Ok(vec![json!({ "id": "1" })]),
        ]);
        let ctrl = controller(&h, meals_policy(), None, remote.clone());

        ctrl.start().await;
        assert!(ctrl.last_error().is_some());

        ctrl.trigger_sync().await;
        assert!(ctrl.last_error().is_none());
    }

    #[tokio::test]
    async fn test_tick_skips_when_not_stale() {
        let h = harness(vec![meals_policy()]);
        let remote = ScriptedRemote::new(vec![Ok(vec![json!({ "id": "1" })])]);
        let ctrl = controller(&h, meals_policy(), None, remote.clone());

        ctrl.start().await;
        assert_eq!(remote.call_count(), 1);

        // Wake fires early (jitter disabled): silent skip, still rescheduled.
        let delay = ctrl.tick().await;
        assert_eq!(remote.call_count(), 1);
        assert_eq!(delay, Some(300_000));

        h.clock.advance(300_001);
        ctrl.tick().await;
        assert_eq!(remote.call_count(), 2);
    }

    #[tokio::test]
    async fn test_trigger_during_outstanding_fetch_is_dropped() {
        let h = harness(vec![meals_policy()]);
        let remote = GatedRemote::new();
        let installed = Arc::clone(&h.installed);
        let ctrl = Arc::new(CollectionSyncController::new(
            meals_policy(),
            None,
            Arc::clone(&h.coordinator),
            remote.clone(),
            h.cache.clone(),
            h.clock.clone(),
            Arc::new(move |rows| installed.lock().unwrap().push(rows)),
        ));

        let bg = Arc::clone(&ctrl);
        let task = tokio::spawn(async move { bg.start().await });
        while remote.call_count() == 0 {
            tokio::task::yield_now().await;
        }

        // A manual trigger while the first fetch is outstanding is dropped.
        ctrl.trigger_sync().await;
        assert_eq!(remote.call_count(), 1);

        remote.gate.add_permits(1);
        task.await.unwrap();
        assert_eq!(h.installed.lock().unwrap().len(), 1);

        // Once the fetch settles, triggers fetch again.
        ctrl.trigger_sync().await;
        assert_eq!(remote.call_count(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_discards_inflight_result() {
        let h = harness(vec![meals_policy()]);
        let remote = ScriptedRemote::new(vec![Ok(vec![json!({ "id": "1" })])]);
        let ctrl = controller(&h, meals_policy(), None, remote.clone());

        ctrl.shutdown();
        let delay = ctrl.tick().await;
        assert_eq!(delay, None);
        assert_eq!(remote.call_count(), 0);
        assert!(h.installed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_filtered_fetch_merges_with_cache() {
        let h = harness(vec![meals_policy()]);
        // Cached rows: one inside and one outside the fetch window.
        let cached = vec![
            NormalizedRow {
                id: "old".to_string(),
                last_updated: 100,
                data: json!({ "id": "old", "createdAt": 100 }),
            },
            NormalizedRow {
                id: "recent".to_string(),
                last_updated: 500,
                data: json!({ "id": "recent", "createdAt": 500 }),
            },
        ];
        h.cache.save("meals", &cached, NOON - HOUR_MS).unwrap();

        // Remote returns a newer copy of "recent" only.
        let remote = ScriptedRemote::new(vec![Ok(vec![
            json!({ "id": "recent", "lastUpdated": 900, "createdAt": 500 }),
        ])]);
        let filter = FilterDescriptor::since("mealDate", NOON - HOUR_MS);
        let ctrl = controller(&h, meals_policy(), Some(filter), remote.clone());

        ctrl.start().await;

        let installs = h.installed.lock().unwrap();
        let latest = installs.last().unwrap();
        assert_eq!(latest.len(), 2);
        let recent = latest.iter().find(|r| r.id == "recent").unwrap();
        assert_eq!(recent.last_updated, 900);
        assert!(latest.iter().any(|r| r.id == "old"));
    }

    #[tokio::test]
    async fn test_unfiltered_fetch_replaces_cache() {
        let h = harness(vec![meals_policy()]);
        let cached = vec![NormalizedRow {
            id: "gone".to_string(),
            last_updated: 100,
            data: json!({ "id": "gone" }),
        }];
        h.cache.save("meals", &cached, NOON - HOUR_MS).unwrap();

        let remote = ScriptedRemote::new(vec![Ok(vec![json!({ "id": "fresh" })])]);
        let ctrl = controller(&h, meals_policy(), None, remote.clone());

        ctrl.start().await;

        let installs = h.installed.lock().unwrap();
        let latest = installs.last().unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].id, "fresh");
        drop(installs);

        let _ = h.kv; // shared store kept alive for the cache assertions above
    }
}
