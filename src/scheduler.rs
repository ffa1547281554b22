//! Wake-up scheduling.
//!
//! One priority queue of `(next_due, collection)` wakes, polled by the engine
//! driver, instead of an independent timer per collection. A collection holds
//! at most one live wake at a time, which is what serializes its fetches;
//! re-arming replaces any earlier wake and stale heap entries are dropped
//! lazily on pop.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use rand::Rng;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Wake {
    due_at_ms: i64,
    collection: String,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    heap: BinaryHeap<Reverse<Wake>>,
    // Current live wake per collection; heap entries that disagree are stale.
    armed: HashMap<String, i64>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) the wake for a collection.
    pub fn schedule(&mut self, collection: impl Into<String>, due_at_ms: i64) {
        let collection = collection.into();
        self.armed.insert(collection.clone(), due_at_ms);
        self.heap.push(Reverse(Wake {
            due_at_ms,
            collection,
        }));
    }

    /// Cancel a collection's pending wake.
    pub fn cancel(&mut self, collection: &str) {
        self.armed.remove(collection);
    }

    /// Pop the next collection whose wake is due at or before `now_ms`.
    pub fn pop_due(&mut self, now_ms: i64) -> Option<String> {
        while let Some(Reverse(wake)) = self.heap.pop() {
            if wake.due_at_ms > now_ms {
                self.heap.push(Reverse(wake));
                return None;
            }
            match self.armed.get(&wake.collection) {
                Some(&due) if due == wake.due_at_ms => {
                    self.armed.remove(&wake.collection);
                    return Some(wake.collection);
                }
                // Stale entry: superseded by a later schedule() or cancelled.
                _ => continue,
            }
        }
        None
    }

    /// Earliest armed wake, for the driver's sleep computation.
    pub fn next_due(&self) -> Option<i64> {
        self.armed.values().copied().min()
    }
}

/// Base interval plus uniform random jitter in `0..=jitter_max_ms`.
pub fn jittered_delay(base_ms: i64, jitter_max_ms: u64) -> i64 {
    if jitter_max_ms == 0 {
        return base_ms;
    }
    base_ms + rand::thread_rng().gen_range(0..=jitter_max_ms) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pops_in_due_order() {
        let mut sched = Scheduler::new();
        sched.schedule("meals", 300);
        sched.schedule("guests", 100);
        sched.schedule("showers", 200);

        assert_eq!(sched.pop_due(1_000).as_deref(), Some("guests"));
        assert_eq!(sched.pop_due(1_000).as_deref(), Some("showers"));
        assert_eq!(sched.pop_due(1_000).as_deref(), Some("meals"));
        assert_eq!(sched.pop_due(1_000), None);
    }

    #[test]
    fn test_not_due_yet() {
        let mut sched = Scheduler::new();
        sched.schedule("meals", 500);
        assert_eq!(sched.pop_due(499), None);
        assert_eq!(sched.pop_due(500).as_deref(), Some("meals"));
    }

    #[test]
    fn test_reschedule_replaces_earlier_wake() {
        let mut sched = Scheduler::new();
        sched.schedule("meals", 100);
        sched.schedule("meals", 400);

        // The superseded wake at 100 must not fire.
        assert_eq!(sched.pop_due(200), None);
        assert_eq!(sched.pop_due(400).as_deref(), Some("meals"));
        assert_eq!(sched.pop_due(1_000), None);
    }

    #[test]
    fn test_cancel_drops_wake() {
        let mut sched = Scheduler::new();
        sched.schedule("meals", 100);
        sched.cancel("meals");
        assert_eq!(sched.pop_due(1_000), None);
        assert_eq!(sched.next_due(), None);
    }

    #[test]
    fn test_next_due_tracks_live_wakes() {
        let mut sched = Scheduler::new();
        assert_eq!(sched.next_due(), None);
        sched.schedule("meals", 300);
        sched.schedule("guests", 100);
        assert_eq!(sched.next_due(), Some(100));
        sched.cancel("guests");
        assert_eq!(sched.next_due(), Some(300));
    }

    #[test]
    fn test_jitter_bounds() {
        for _ in 0..50 {
            let delay = jittered_delay(1_000, 100);
            assert!((1_000..=1_100).contains(&delay));
        }
        assert_eq!(jittered_delay(1_000, 0), 1_000);
    }
}
