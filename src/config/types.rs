use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// OS scheduling priority applied to the Syncthing process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessPriority {
    AboveNormal,
    #[default]
    Normal,
    BelowNormal,
    Idle,
}

impl ProcessPriority {
    /// Unix nice value for this priority level.
    pub fn nice_value(self) -> i32 {
        match self {
            ProcessPriority::AboveNormal => -5,
            ProcessPriority::Normal => 0,
            ProcessPriority::BelowNormal => 10,
            ProcessPriority::Idle => 19,
        }
    }
}

/// Configuration consumed by the manager when Syncthing is started.
///
/// Values are read once per `Manager::start` and never re-read mid-session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Path to the Syncthing executable. Resolved next to the app when unset.
    #[serde(default)]
    pub syncthing_path: Option<String>,

    /// Preferred `host:port` for the GUI/REST listener.
    #[serde(default = "default_address")]
    pub address: String,

    /// Custom Syncthing home directory (`--home`).
    #[serde(default)]
    pub syncthing_home: Option<String>,

    #[serde(default)]
    pub extra_flags: Vec<String>,

    #[serde(default)]
    pub extra_env: BTreeMap<String, String>,

    #[serde(default)]
    pub deny_upgrade: bool,

    #[serde(default)]
    pub priority: ProcessPriority,

    /// Debug facilities exported through `STTRACE`.
    #[serde(default)]
    pub debug_facilities: Vec<String>,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,

    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    #[serde(default)]
    pub event_poll_interval_ms: u64,

    #[serde(default = "default_event_long_poll_secs")]
    pub event_long_poll_secs: u64,

    #[serde(default = "default_connections_poll_interval_ms")]
    pub connections_poll_interval_ms: u64,

    #[serde(default = "default_poll_error_backoff_ms")]
    pub poll_error_backoff_ms: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            syncthing_path: None,
            address: default_address(),
            syncthing_home: None,
            extra_flags: Vec::new(),
            extra_env: BTreeMap::new(),
            deny_upgrade: false,
            priority: ProcessPriority::default(),
            debug_facilities: Vec::new(),
            connect_timeout_ms: default_connect_timeout_ms(),
            probe_interval_ms: default_probe_interval_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
            event_poll_interval_ms: 0,
            event_long_poll_secs: default_event_long_poll_secs(),
            connections_poll_interval_ms: default_connections_poll_interval_ms(),
            poll_error_backoff_ms: default_poll_error_backoff_ms(),
        }
    }
}

fn default_address() -> String {
    "127.0.0.1:8384".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    60_000
}

fn default_probe_interval_ms() -> u64 {
    500
}

fn default_stop_timeout_ms() -> u64 {
    10_000
}

fn default_event_long_poll_secs() -> u64 {
    60
}

fn default_connections_poll_interval_ms() -> u64 {
    10_000
}

fn default_poll_error_backoff_ms() -> u64 {
    5_000
}

impl ManagerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms.max(1))
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn event_poll_interval(&self) -> Duration {
        Duration::from_millis(self.event_poll_interval_ms)
    }

    /// Server-side long-poll timeout for `/rest/events`, clamped like the API allows.
    pub fn event_long_poll(&self) -> Duration {
        Duration::from_secs(self.event_long_poll_secs.clamp(1, 300))
    }

    pub fn connections_poll_interval(&self) -> Duration {
        Duration::from_millis(self.connections_poll_interval_ms)
    }

    pub fn poll_error_backoff(&self) -> Duration {
        Duration::from_millis(self.poll_error_backoff_ms)
    }
}
