use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Polling period used when nothing else is configured.
pub const DEFAULT_SLEEP_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatcherConfig {
    /// Time between two process snapshots. Fixed for the lifetime of a watcher.
    pub sleep_interval: Duration,
}

impl WatcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sleep_interval(mut self, sleep_interval: Duration) -> Self {
        self.sleep_interval = sleep_interval;
        self
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            sleep_interval: DEFAULT_SLEEP_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportConfig {
    /// Directory that receives export files. Created on first export.
    pub output_dir: PathBuf,
}

impl ExportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: std::env::temp_dir().join("procwatch"),
        }
    }
}
