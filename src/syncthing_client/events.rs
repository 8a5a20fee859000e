//! Typed view of the daemon's event log.
//!
//! Every entry of `/rest/events` is decoded into an [`Event`] whose payload is
//! the closed [`EventKind`] union. Types this crate does not reconcile on, and
//! known types whose payload fails to decode, land in [`EventKind::Unknown`]
//! so a new daemon version never breaks the event stream.

use chrono::{DateTime, FixedOffset};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::api::{FolderErrorEntry, RawEvent};
use super::models::{FolderStatus, SyncState};

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: u64,
    pub time: Option<DateTime<FixedOffset>>,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    StateChanged {
        folder: String,
        from: SyncState,
        to: SyncState,
    },
    ItemStarted {
        folder: String,
        item: String,
        item_type: String,
        action: String,
    },
    ItemFinished {
        folder: String,
        item: String,
        item_type: String,
        action: String,
        error: Option<String>,
    },
    DeviceConnected {
        device: String,
        address: Option<String>,
    },
    DeviceDisconnected {
        device: String,
        error: Option<String>,
    },
    DeviceRejected {
        device: String,
        name: Option<String>,
        address: Option<String>,
    },
    FolderRejected {
        device: String,
        folder: String,
        folder_label: Option<String>,
    },
    ConfigSaved,
    FolderErrors {
        folder: String,
        errors: Vec<FolderErrorEntry>,
    },
    FolderSummary {
        folder: String,
        summary: FolderStatus,
    },
    DevicePaused {
        device: String,
    },
    DeviceResumed {
        device: String,
    },
    StartupComplete {
        my_id: Option<String>,
    },
    Unknown {
        event_type: String,
        data: Value,
    },
}

impl EventKind {
    pub fn name(&self) -> &str {
        match self {
            EventKind::StateChanged { .. } => "StateChanged",
            EventKind::ItemStarted { .. } => "ItemStarted",
            EventKind::ItemFinished { .. } => "ItemFinished",
            EventKind::DeviceConnected { .. } => "DeviceConnected",
            EventKind::DeviceDisconnected { .. } => "DeviceDisconnected",
            EventKind::DeviceRejected { .. } => "DeviceRejected",
            EventKind::FolderRejected { .. } => "FolderRejected",
            EventKind::ConfigSaved => "ConfigSaved",
            EventKind::FolderErrors { .. } => "FolderErrors",
            EventKind::FolderSummary { .. } => "FolderSummary",
            EventKind::DevicePaused { .. } => "DevicePaused",
            EventKind::DeviceResumed { .. } => "DeviceResumed",
            EventKind::StartupComplete { .. } => "StartupComplete",
            EventKind::Unknown { event_type, .. } => event_type.as_str(),
        }
    }
}

#[derive(Deserialize)]
struct StateChangedData {
    folder: String,
    #[serde(default)]
    from: String,
    to: String,
}

#[derive(Deserialize)]
struct ItemData {
    folder: String,
    item: String,
    #[serde(default, rename = "type")]
    item_type: String,
    #[serde(default)]
    action: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct DeviceConnectedData {
    id: String,
    #[serde(default)]
    addr: Option<String>,
}

#[derive(Deserialize)]
struct DeviceDisconnectedData {
    id: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct DeviceRejectedData {
    device: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    address: Option<String>,
}

#[derive(Deserialize)]
struct FolderRejectedData {
    device: String,
    folder: String,
    #[serde(default, rename = "folderLabel")]
    folder_label: Option<String>,
}

#[derive(Deserialize)]
struct FolderErrorsData {
    folder: String,
    #[serde(default)]
    errors: Option<Vec<FolderErrorEntry>>,
}

#[derive(Deserialize)]
struct FolderSummaryData {
    folder: String,
    summary: FolderStatus,
}

#[derive(Deserialize)]
struct DeviceData {
    device: String,
}

#[derive(Deserialize)]
struct StartupCompleteData {
    #[serde(default, rename = "myID")]
    my_id: Option<String>,
}

impl Event {
    pub fn decode(raw: RawEvent) -> Self {
        let time = DateTime::parse_from_rfc3339(&raw.time).ok();
        let kind = decode_kind(&raw.event_type, &raw.data).unwrap_or_else(|| {
            EventKind::Unknown {
                event_type: raw.event_type.clone(),
                data: raw.data.clone(),
            }
        });
        Self {
            id: raw.id,
            time,
            kind,
        }
    }
}

fn decode_kind(event_type: &str, data: &Value) -> Option<EventKind> {
    let kind = match event_type {
        "StateChanged" => {
            let d: StateChangedData = payload(event_type, data)?;
            EventKind::StateChanged {
                folder: d.folder,
                from: SyncState::parse(&d.from),
                to: SyncState::parse(&d.to),
            }
        }
        "ItemStarted" => {
            let d: ItemData = payload(event_type, data)?;
            EventKind::ItemStarted {
                folder: d.folder,
                item: d.item,
                item_type: d.item_type,
                action: d.action,
            }
        }
        "ItemFinished" => {
            let d: ItemData = payload(event_type, data)?;
            EventKind::ItemFinished {
                folder: d.folder,
                item: d.item,
                item_type: d.item_type,
                action: d.action,
                error: d.error.filter(|e| !e.is_empty()),
            }
        }
        "DeviceConnected" => {
            let d: DeviceConnectedData = payload(event_type, data)?;
            EventKind::DeviceConnected {
                device: d.id,
                address: d.addr,
            }
        }
        "DeviceDisconnected" => {
            let d: DeviceDisconnectedData = payload(event_type, data)?;
            EventKind::DeviceDisconnected {
                device: d.id,
                error: d.error,
            }
        }
        "DeviceRejected" => {
            let d: DeviceRejectedData = payload(event_type, data)?;
            EventKind::DeviceRejected {
                device: d.device,
                name: d.name,
                address: d.address,
            }
        }
        "FolderRejected" => {
            let d: FolderRejectedData = payload(event_type, data)?;
            EventKind::FolderRejected {
                device: d.device,
                folder: d.folder,
                folder_label: d.folder_label,
            }
        }
        "ConfigSaved" => EventKind::ConfigSaved,
        "FolderErrors" => {
            let d: FolderErrorsData = payload(event_type, data)?;
            EventKind::FolderErrors {
                folder: d.folder,
                errors: d.errors.unwrap_or_default(),
            }
        }
        "FolderSummary" => {
            let d: FolderSummaryData = payload(event_type, data)?;
            EventKind::FolderSummary {
                folder: d.folder,
                summary: d.summary,
            }
        }
        "DevicePaused" => {
            let d: DeviceData = payload(event_type, data)?;
            EventKind::DevicePaused { device: d.device }
        }
        "DeviceResumed" => {
            let d: DeviceData = payload(event_type, data)?;
            EventKind::DeviceResumed { device: d.device }
        }
        "StartupComplete" => {
            let d: StartupCompleteData = payload(event_type, data)?;
            EventKind::StartupComplete { my_id: d.my_id }
        }
        _ => return None,
    };
    Some(kind)
}

fn payload<T: DeserializeOwned>(event_type: &str, data: &Value) -> Option<T> {
    match T::deserialize(data) {
        Ok(decoded) => Some(decoded),
        Err(err) => {
            debug!(event_type, error = %err, "Undecodable event payload, treating as unknown");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(id: u64, event_type: &str, data: Value) -> RawEvent {
        RawEvent {
            id,
            event_type: event_type.to_string(),
            time: "2024-05-01T10:00:00.123456789+02:00".to_string(),
            data,
        }
    }

    #[test]
    fn decodes_state_changed() {
        let event = Event::decode(raw(
            7,
            "StateChanged",
            json!({"folder": "docs", "from": "idle", "to": "scanning", "duration": 0.5}),
        ));
        assert_eq!(event.id, 7);
        assert!(event.time.is_some());
        assert_eq!(
            event.kind,
            EventKind::StateChanged {
                folder: "docs".to_string(),
                from: SyncState::Idle,
                to: SyncState::Scanning,
            }
        );
    }

    #[test]
    fn item_finished_with_null_error() {
        let event = Event::decode(raw(
            1,
            "ItemFinished",
            json!({"folder": "docs", "item": "a/b.txt", "type": "file", "action": "update", "error": null}),
        ));
        match event.kind {
            EventKind::ItemFinished { item, error, .. } => {
                assert_eq!(item, "a/b.txt");
                assert!(error.is_none());
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn device_connected_uses_id_field() {
        let event = Event::decode(raw(
            2,
            "DeviceConnected",
            json!({"id": "DEV-A", "addr": "10.0.0.2:22000", "deviceName": "laptop"}),
        ));
        assert_eq!(
            event.kind,
            EventKind::DeviceConnected {
                device: "DEV-A".to_string(),
                address: Some("10.0.0.2:22000".to_string()),
            }
        );
    }

    #[test]
    fn folder_errors_null_list_is_empty() {
        let event = Event::decode(raw(3, "FolderErrors", json!({"folder": "docs", "errors": null})));
        assert_eq!(
            event.kind,
            EventKind::FolderErrors {
                folder: "docs".to_string(),
                errors: Vec::new(),
            }
        );
    }

    #[test]
    fn unrecognized_type_is_unknown() {
        let event = Event::decode(raw(4, "RemoteDownloadProgress", json!({"x": 1})));
        assert_eq!(event.kind.name(), "RemoteDownloadProgress");
        assert!(matches!(event.kind, EventKind::Unknown { .. }));
    }

    #[test]
    fn malformed_known_type_degrades_to_unknown() {
        let event = Event::decode(raw(5, "StateChanged", json!({"unexpected": true})));
        assert!(matches!(
            event.kind,
            EventKind::Unknown { ref event_type, .. } if event_type == "StateChanged"
        ));
    }

    #[test]
    fn bad_timestamp_does_not_fail_decoding() {
        let mut event = raw(6, "ConfigSaved", json!({}));
        event.time = "yesterday".to_string();
        let decoded = Event::decode(event);
        assert!(decoded.time.is_none());
        assert_eq!(decoded.kind, EventKind::ConfigSaved);
    }
}
