use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::ManagerError;
use crate::syncthing_client::api::{
    ConnectionState, ConnectionTotals, ConnectionsResponse, DebugResponse, DeviceConfig,
    FolderConfig, FolderDevice, IgnoresResponse, RawEvent, SyncthingConfig, VersionResponse,
};
use crate::syncthing_client::{ApiConnector, DaemonApi, FolderStatus, SystemInfo};

/// Upper bound on how long an empty long-poll blocks.
const EMPTY_LONG_POLL: Duration = Duration::from_millis(20);

#[derive(Default)]
struct FakeState {
    ping_failures: usize,
    version: String,
    my_id: String,
    config: SyncthingConfig,
    statuses: HashMap<String, FolderStatus>,
    ignores: HashMap<String, Vec<String>>,
    events: Vec<RawEvent>,
    next_event_id: u64,
    batches: VecDeque<Vec<RawEvent>>,
    connections: ConnectionsResponse,
    connections_fail: bool,
    debug: DebugResponse,
    stop_file: Option<PathBuf>,
    restart_file: Option<PathBuf>,
    scans: Vec<(String, Option<String>)>,
    calls: HashMap<String, usize>,
}

/// In-memory daemon API with scriptable answers and call counters.
pub struct FakeDaemon {
    state: Mutex<FakeState>,
}

impl Default for FakeDaemon {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDaemon {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                version: "v1.27.3".to_string(),
                my_id: "SELF-DEVICE".to_string(),
                ..FakeState::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: &str) {
        *self.state().calls.entry(call.to_string()).or_insert(0) += 1;
    }

    pub fn calls(&self, call: &str) -> usize {
        self.state().calls.get(call).copied().unwrap_or(0)
    }

    pub fn raw_event(id: u64, event_type: &str, data: Value) -> RawEvent {
        RawEvent {
            id,
            event_type: event_type.to_string(),
            time: "2024-05-01T10:00:00Z".to_string(),
            data,
        }
    }

    /// The next `count` pings fail as if nothing listened yet.
    pub fn fail_pings(&self, count: usize) {
        self.state().ping_failures = count;
    }

    pub fn set_version(&self, version: &str) {
        self.state().version = version.to_string();
    }

    pub fn set_my_id(&self, id: &str) {
        self.state().my_id = id.to_string();
    }

    pub fn set_config(&self, config: SyncthingConfig) {
        self.state().config = config;
    }

    pub fn config_snapshot(&self) -> SyncthingConfig {
        self.state().config.clone()
    }

    /// Adds (or replaces) a folder in the config together with its status.
    pub fn add_folder(&self, id: &str, label: &str, path: &str, state: &str) {
        let mut guard = self.state();
        let my_id = guard.my_id.clone();
        guard.config.folders.retain(|f| f.id != id);
        guard.config.folders.push(FolderConfig {
            id: id.to_string(),
            label: Some(label.to_string()),
            path: Some(path.to_string()),
            paused: Some(false),
            devices: vec![FolderDevice { device_id: my_id }],
        });
        guard.statuses.insert(
            id.to_string(),
            FolderStatus {
                state: state.to_string(),
                ..FolderStatus::default()
            },
        );
    }

    pub fn remove_folder(&self, id: &str) {
        let mut guard = self.state();
        guard.config.folders.retain(|f| f.id != id);
        guard.statuses.remove(id);
    }

    pub fn set_folder_status(&self, id: &str, status: FolderStatus) {
        self.state().statuses.insert(id.to_string(), status);
    }

    pub fn set_ignores(&self, id: &str, patterns: &[&str]) {
        self.state().ignores.insert(
            id.to_string(),
            patterns.iter().map(|p| p.to_string()).collect(),
        );
    }

    /// Adds (or replaces) a device in the config.
    pub fn add_device(&self, id: &str, name: &str) {
        let mut guard = self.state();
        guard.config.devices.retain(|d| d.device_id != id);
        guard.config.devices.push(DeviceConfig {
            device_id: id.to_string(),
            name: Some(name.to_string()),
            paused: Some(false),
        });
    }

    pub fn set_connection(&self, id: &str, connected: bool, address: Option<&str>) {
        self.state().connections.connections.insert(
            id.to_string(),
            ConnectionState {
                connected,
                address: address.map(|a| a.to_string()),
                ..ConnectionState::default()
            },
        );
    }

    pub fn set_connection_totals(&self, in_bytes: u64, out_bytes: u64) {
        self.state().connections.total = ConnectionTotals {
            in_bytes_total: in_bytes,
            out_bytes_total: out_bytes,
        };
    }

    pub fn fail_connections(&self, fail: bool) {
        self.state().connections_fail = fail;
    }

    pub fn set_debug_facilities(&self, enabled: &[&str]) {
        let mut guard = self.state();
        guard.debug.enabled = Some(enabled.iter().map(|f| f.to_string()).collect());
        for facility in enabled {
            guard
                .debug
                .facilities
                .insert(facility.to_string(), format!("{facility} debugging"));
        }
    }

    /// File touched when the API is asked to shut down.
    pub fn set_stop_file(&self, path: PathBuf) {
        self.state().stop_file = Some(path);
    }

    /// File touched when the API is asked to restart.
    pub fn set_restart_file(&self, path: PathBuf) {
        self.state().restart_file = Some(path);
    }

    /// Appends an event to the log with the next id and returns that id.
    pub fn push_event(&self, event_type: &str, data: Value) -> u64 {
        let mut guard = self.state();
        guard.next_event_id += 1;
        let id = guard.next_event_id;
        guard.events.push(Self::raw_event(id, event_type, data));
        id
    }

    /// Serves `batch` verbatim to the next non-baseline event request.
    pub fn queue_batch(&self, batch: Vec<RawEvent>) {
        let mut guard = self.state();
        if let Some(max) = batch.iter().map(|e| e.id).max() {
            guard.next_event_id = guard.next_event_id.max(max);
        }
        guard.batches.push_back(batch);
    }

    pub fn scans(&self) -> Vec<(String, Option<String>)> {
        self.state().scans.clone()
    }
}

fn refused() -> ManagerError {
    ManagerError::Io(std::io::Error::new(
        std::io::ErrorKind::ConnectionRefused,
        "fake daemon not listening",
    ))
}

fn touch(path: Option<PathBuf>) -> Result<(), ManagerError> {
    if let Some(path) = path {
        std::fs::write(path, b"")?;
    }
    Ok(())
}

#[async_trait]
impl DaemonApi for FakeDaemon {
    async fn ping(&self) -> Result<(), ManagerError> {
        self.record("ping");
        let mut guard = self.state();
        if guard.ping_failures > 0 {
            guard.ping_failures -= 1;
            return Err(refused());
        }
        Ok(())
    }

    async fn version(&self) -> Result<VersionResponse, ManagerError> {
        self.record("version");
        Ok(VersionResponse {
            version: self.state().version.clone(),
            long_version: None,
            os: Some("linux".to_string()),
            arch: Some("arm".to_string()),
        })
    }

    async fn system_status(&self) -> Result<SystemInfo, ManagerError> {
        self.record("system_status");
        let my_id = self.state().my_id.clone();
        Ok(SystemInfo::from_value(&json!({
            "myID": my_id,
            "startTime": "2024-05-01T10:00:00Z",
            "uptime": 1.0,
            "goroutines": 12
        })))
    }

    async fn config(&self) -> Result<SyncthingConfig, ManagerError> {
        self.record("config");
        Ok(self.state().config.clone())
    }

    async fn events(
        &self,
        since: u64,
        limit: Option<u32>,
        timeout: Option<Duration>,
    ) -> Result<Vec<RawEvent>, ManagerError> {
        self.record("events");
        let found = {
            let mut guard = self.state();
            let baseline = since == 0 && limit.is_some();
            match guard.batches.pop_front() {
                Some(batch) if !baseline => batch,
                other => {
                    if let Some(batch) = other {
                        guard.batches.push_front(batch);
                    }
                    let mut found: Vec<RawEvent> = guard
                        .events
                        .iter()
                        .filter(|e| e.id > since)
                        .cloned()
                        .collect();
                    if let Some(limit) = limit {
                        let keep = limit as usize;
                        if found.len() > keep {
                            found.drain(..found.len() - keep);
                        }
                    }
                    found
                }
            }
        };
        if found.is_empty() {
            if let Some(timeout) = timeout {
                tokio::time::sleep(timeout.min(EMPTY_LONG_POLL)).await;
            }
        }
        Ok(found)
    }

    async fn folder_status(&self, folder_id: &str) -> Result<FolderStatus, ManagerError> {
        self.record("folder_status");
        self.record(&format!("folder_status:{folder_id}"));
        self.state()
            .statuses
            .get(folder_id)
            .cloned()
            .ok_or_else(|| ManagerError::Syncthing(format!("/rest/db/status returned 404 for {folder_id}")))
    }

    async fn folder_ignores(&self, folder_id: &str) -> Result<IgnoresResponse, ManagerError> {
        self.record(&format!("folder_ignores:{folder_id}"));
        let patterns = self.state().ignores.get(folder_id).cloned();
        Ok(IgnoresResponse {
            expanded: patterns.clone(),
            ignore: patterns,
        })
    }

    async fn connections(&self) -> Result<ConnectionsResponse, ManagerError> {
        self.record("connections");
        let guard = self.state();
        if guard.connections_fail {
            return Err(refused());
        }
        Ok(guard.connections.clone())
    }

    async fn debug_facilities(&self) -> Result<DebugResponse, ManagerError> {
        self.record("debug");
        Ok(self.state().debug.clone())
    }

    async fn scan(&self, folder_id: &str, sub_path: Option<&str>) -> Result<(), ManagerError> {
        self.record("scan");
        let mut guard = self.state();
        if !guard.config.folders.iter().any(|f| f.id == folder_id) {
            return Err(ManagerError::Syncthing("/rest/db/scan returned 500".to_string()));
        }
        guard
            .scans
            .push((folder_id.to_string(), sub_path.map(|s| s.to_string())));
        Ok(())
    }

    async fn restart(&self) -> Result<(), ManagerError> {
        self.record("restart");
        let path = self.state().restart_file.clone();
        touch(path)
    }

    async fn shutdown(&self) -> Result<(), ManagerError> {
        self.record("shutdown");
        let path = self.state().stop_file.clone();
        touch(path)
    }
}

/// Hands out the same [`FakeDaemon`] for every connect and remembers the keys.
pub struct FakeConnector {
    daemon: Arc<FakeDaemon>,
    connects: Mutex<Vec<(String, String)>>,
}

impl FakeConnector {
    pub fn new(daemon: Arc<FakeDaemon>) -> Self {
        Self {
            daemon,
            connects: Mutex::new(Vec::new()),
        }
    }

    pub fn daemon(&self) -> &Arc<FakeDaemon> {
        &self.daemon
    }

    /// `(base_url, api_key)` of every session built so far.
    pub fn connects(&self) -> Vec<(String, String)> {
        self.connects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl ApiConnector for FakeConnector {
    fn connect(&self, base_url: &str, api_key: &str) -> Result<Arc<dyn DaemonApi>, ManagerError> {
        self.connects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((base_url.to_string(), api_key.to_string()));
        Ok(self.daemon.clone())
    }
}
