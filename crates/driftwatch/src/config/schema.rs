use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resource::SyncWindow;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub datastore: DatastoreConfig,
    /// Directory of resource manifests loaded into the store at startup.
    #[serde(default)]
    pub manifests_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfig {
    #[serde(default)]
    pub timers: TimersConfig,
    /// Retry budget used when neither the layer nor its repository sets one.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Number of runs kept in a layer's status history.
    #[serde(default = "default_run_history_limit")]
    pub run_history_limit: usize,
    /// Windows applied to every repository, after its own windows.
    #[serde(default)]
    pub default_sync_windows: Vec<SyncWindow>,
}

fn default_max_retries() -> u32 {
    5
}

fn default_run_history_limit() -> usize {
    5
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            timers: TimersConfig::default(),
            max_retries: default_max_retries(),
            run_history_limit: default_run_history_limit(),
            default_sync_windows: Vec::new(),
        }
    }
}

/// Requeue intervals, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimersConfig {
    #[serde(default = "default_drift_detection")]
    pub drift_detection: u64,
    #[serde(default = "default_wait_action")]
    pub wait_action: u64,
    #[serde(default = "default_on_error")]
    pub on_error: u64,
}

fn default_drift_detection() -> u64 {
    20 * 60
}

fn default_wait_action() -> u64 {
    60
}

fn default_on_error() -> u64 {
    60
}

impl TimersConfig {
    /// Interval between drift checks of a settled layer.
    pub fn drift_detection_interval(&self) -> Duration {
        Duration::from_secs(self.drift_detection)
    }

    /// Delay before looking at a layer after starting a run.
    pub fn wait_action_interval(&self) -> Duration {
        Duration::from_secs(self.wait_action)
    }

    /// Delay before retrying after an error.
    pub fn on_error_interval(&self) -> Duration {
        Duration::from_secs(self.on_error)
    }
}

impl Default for TimersConfig {
    fn default() -> Self {
        Self {
            drift_detection: default_drift_detection(),
            wait_action: default_wait_action(),
            on_error: default_on_error(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_addr")]
    pub addr: String,
    /// Quiescence window of the snapshot debounce.
    #[serde(default = "default_debounce_millis")]
    pub debounce_millis: u64,
    /// Queue capacity of each event stream subscriber.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
    #[serde(default = "default_initial_sync_timeout")]
    pub initial_sync_timeout_secs: u64,
}

fn default_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_debounce_millis() -> u64 {
    200
}

fn default_subscriber_buffer() -> usize {
    10
}

fn default_initial_sync_timeout() -> u64 {
    30
}

impl ServerConfig {
    /// Quiet period before a snapshot is rebuilt.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_millis)
    }

    /// Time allowed for the watchers' initial listings.
    pub fn initial_sync_timeout(&self) -> Duration {
        Duration::from_secs(self.initial_sync_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            debounce_millis: default_debounce_millis(),
            subscriber_buffer: default_subscriber_buffer(),
            initial_sync_timeout_secs: default_initial_sync_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatastoreConfig {
    /// Root directory of stored plan outputs.
    #[serde(default = "default_plans_dir")]
    pub plans_dir: String,
}

fn default_plans_dir() -> String {
    // Use platform-specific data directory from dirs crate
    dirs::data_dir()
        .or_else(|| dirs::home_dir().map(|p| p.join(".local").join("share")))
        .map(|p| {
            p.join("driftwatch")
                .join("plans")
                .to_string_lossy()
                .to_string()
        })
        .unwrap_or_else(|| "/tmp/driftwatch/plans".to_string())
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            plans_dir: default_plans_dir(),
        }
    }
}
