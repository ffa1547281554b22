//! Static per-collection sync policy.
//!
//! Each collection kind (guests, meals, showers, ...) gets one
//! [`CollectionPolicy`] describing how often it refreshes, how it competes for
//! the read quota, and whether it refreshes outside business hours. Policies
//! are defined once at startup and never change for the life of the session.

use std::collections::HashMap;

/// Priority class of a collection, consulted by quota throttling and by the
/// tab-focus boost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    /// Always admitted past the soft quota throttle; force-refreshed when the
    /// tab regains focus.
    Critical,
    Normal,
    Low,
    /// Never auto-scheduled; syncs only on an explicit trigger.
    Manual,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::Normal => "normal",
            Priority::Low => "low",
            Priority::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CollectionPolicy {
    /// Collection (table) name, also the cache key suffix.
    pub name: String,
    /// Minimum elapsed time between automatic refreshes.
    pub refresh_interval_ms: i64,
    pub priority: Priority,
    /// When true the collection only refreshes inside the configured
    /// business-hours window, serving cached data outside it.
    pub business_hours_only: bool,
}

impl CollectionPolicy {
    pub fn new(name: impl Into<String>, refresh_interval_ms: i64, priority: Priority) -> Self {
        Self {
            name: name.into(),
            refresh_interval_ms,
            priority,
            business_hours_only: false,
        }
    }

    pub fn business_hours_only(mut self) -> Self {
        self.business_hours_only = true;
        self
    }
}

/// Read-only lookup table of collection policies.
#[derive(Debug, Default)]
pub struct PolicyTable {
    policies: HashMap<String, CollectionPolicy>,
}

impl PolicyTable {
    pub fn new(policies: Vec<CollectionPolicy>) -> Self {
        Self {
            policies: policies
                .into_iter()
                .map(|p| (p.name.clone(), p))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&CollectionPolicy> {
        self.policies.get(name)
    }

    /// Names of all collections in the `Critical` class, used by the
    /// tab-focus boost.
    pub fn critical_names(&self) -> Vec<String> {
        self.policies
            .values()
            .filter(|p| p.priority == Priority::Critical)
            .map(|p| p.name.clone())
            .collect()
    }
}
