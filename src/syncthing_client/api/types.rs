use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct SyncthingConfig {
    #[serde(default)]
    pub folders: Vec<FolderConfig>,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct FolderConfig {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub paused: Option<bool>,
    #[serde(default)]
    pub devices: Vec<FolderDevice>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct FolderDevice {
    #[serde(rename = "deviceID")]
    pub device_id: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DeviceConfig {
    #[serde(rename = "deviceID")]
    pub device_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub paused: Option<bool>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConnectionsResponse {
    #[serde(default)]
    pub total: ConnectionTotals,
    #[serde(default)]
    pub connections: HashMap<String, ConnectionState>,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionTotals {
    #[serde(default, rename = "inBytesTotal")]
    pub in_bytes_total: u64,
    #[serde(default, rename = "outBytesTotal")]
    pub out_bytes_total: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConnectionState {
    #[serde(default)]
    pub connected: bool,
    #[serde(default)]
    pub paused: bool,
    #[serde(default, rename = "clientVersion")]
    pub client_version: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default, rename = "inBytesTotal")]
    pub in_bytes_total: u64,
    #[serde(default, rename = "outBytesTotal")]
    pub out_bytes_total: u64,
}

/// One entry of `/rest/events` before it is decoded into a typed event.
#[derive(Debug, Deserialize, Clone)]
pub struct RawEvent {
    pub id: u64,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub data: Value,
}

/// `/rest/system/version`
#[derive(Debug, Deserialize, Clone, Default)]
pub struct VersionResponse {
    pub version: String,
    #[serde(default, rename = "longVersion")]
    pub long_version: Option<String>,
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default)]
    pub arch: Option<String>,
}

/// `/rest/db/ignores`
#[derive(Debug, Deserialize, Clone, Default)]
pub struct IgnoresResponse {
    #[serde(default)]
    pub ignore: Option<Vec<String>>,
    #[serde(default)]
    pub expanded: Option<Vec<String>>,
}

/// `/rest/system/debug`
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DebugResponse {
    #[serde(default)]
    pub enabled: Option<Vec<String>>,
    #[serde(default)]
    pub facilities: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
pub struct FolderErrorEntry {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub error: String,
}
