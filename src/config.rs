//! Engine configuration.
//!
//! Covers the knobs shared by every collection: the storage namespace used to
//! key cached snapshots, the daily read budget, the business-hours window, and
//! scheduling jitter. Per-collection cadence lives in
//! [`CollectionPolicy`](crate::policy::CollectionPolicy).
//!
//! Configuration is stored at `~/.config/checkin-sync/config.json`.

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "checkin-sync";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Default daily remote-read budget (rows per day).
/// Sized against the free tier of the hosted data store with headroom for
/// manual refreshes.
const DEFAULT_DAILY_READ_LIMIT: u32 = 45_000;

/// Default row cap applied when a collection has no filter descriptor.
const DEFAULT_ROW_CAP: u32 = 500;

/// Default jitter bound added to every reschedule, in milliseconds.
/// Keeps multiple tabs and collections from firing in lockstep.
const DEFAULT_JITTER_MS: u64 = 10_000;

/// Default debounce applied to tab-visibility transitions, in milliseconds.
const DEFAULT_VISIBILITY_DEBOUNCE_MS: u64 = 1_500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Prefix for every persisted key (snapshots, quota counter).
    pub namespace: String,
    /// Daily remote row-read budget.
    pub daily_read_limit: u32,
    /// Business hours window, local time, inclusive start / exclusive end.
    pub business_hours_start: u32,
    pub business_hours_end: u32,
    /// Upper bound of the random jitter added to each reschedule.
    pub jitter_ms: u64,
    /// Row cap used when a collection has no filter descriptor.
    pub default_row_cap: u32,
    /// Debounce before reacting to a tab-visible transition.
    pub visibility_debounce_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            namespace: "checkin".to_string(),
            daily_read_limit: DEFAULT_DAILY_READ_LIMIT,
            business_hours_start: 6,
            business_hours_end: 20,
            jitter_ms: DEFAULT_JITTER_MS,
            default_row_cap: DEFAULT_ROW_CAP,
            visibility_debounce_ms: DEFAULT_VISIBILITY_DEBOUNCE_MS,
        }
    }
}

impl EngineConfig {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME).join(&self.namespace))
    }

    /// True if `hour` falls inside the configured business-hours window.
    pub fn is_business_hour(&self, hour: u32) -> bool {
        hour >= self.business_hours_start && hour < self.business_hours_end
    }
}
