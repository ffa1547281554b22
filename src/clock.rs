//! Time source abstraction.
//!
//! Every time-dependent decision in the engine (staleness, admission, quota
//! rollover, business hours) goes through a [`Clock`] so that tests can pin the
//! clock instead of mocking wall time.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{Local, TimeZone, Timelike, Utc};

/// Time source consulted by the engine.
pub trait Clock: Send + Sync {
    /// Current time as epoch milliseconds.
    fn now_ms(&self) -> i64;

    /// Hour of day (0-23) in the user's local timezone, for business-hours
    /// gating.
    fn local_hour(&self) -> u32;

    /// Calendar day string (`YYYY-MM-DD`, local time) used for quota rollover.
    fn today(&self) -> String;
}

/// Wall-clock implementation backed by `chrono`.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    fn local_hour(&self) -> u32 {
        Local::now().hour()
    }

    fn today(&self) -> String {
        Local::now().format("%Y-%m-%d").to_string()
    }
}

/// Settable clock for deterministic tests and simulations.
///
/// The local hour and day string are derived from the stored instant in UTC,
/// so advancing past midnight rolls the day over just like the real clock.
#[derive(Debug)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Arc<Self> {
        Arc::new(Self {
            now_ms: AtomicI64::new(now_ms),
        })
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }

    fn local_hour(&self) -> u32 {
        let now = self.now_ms.load(Ordering::SeqCst);
        Utc.timestamp_millis_opt(now)
            .single()
            .map(|t| t.hour())
            .unwrap_or(0)
    }

    fn today(&self) -> String {
        let now = self.now_ms.load(Ordering::SeqCst);
        Utc.timestamp_millis_opt(now)
            .single()
            .map(|t| t.format("%Y-%m-%d").to_string())
            .unwrap_or_default()
    }
}
