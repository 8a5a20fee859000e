use serde::{Deserialize, Serialize};

/// Sync state of a folder as reported by the daemon.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    #[default]
    Unknown,
    Idle,
    WaitingToScan,
    Scanning,
    WaitingToSync,
    PreparingToSync,
    Syncing,
    Cleaning,
    Error,
}

impl SyncState {
    /// Parses the daemon's raw state string (`idle`, `scan-waiting`, `sync-preparing`, ...).
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_ascii_lowercase();
        if normalized.contains("waiting") && normalized.contains("scan") {
            return SyncState::WaitingToScan;
        }
        if normalized.contains("waiting") && normalized.contains("sync") {
            return SyncState::WaitingToSync;
        }
        if normalized.contains("preparing") && normalized.contains("sync") {
            return SyncState::PreparingToSync;
        }
        if normalized.contains("clean") {
            return SyncState::Cleaning;
        }

        match normalized.as_str() {
            "idle" => SyncState::Idle,
            "scanning" => SyncState::Scanning,
            "syncing" => SyncState::Syncing,
            "error" => SyncState::Error,
            _ => SyncState::Unknown,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SyncState::Unknown => "Unknown state",
            SyncState::Idle => "Up to date",
            SyncState::WaitingToScan => "Waiting to scan",
            SyncState::Scanning => "Scanning",
            SyncState::WaitingToSync => "Waiting to sync",
            SyncState::PreparingToSync => "Preparing to sync",
            SyncState::Syncing => "Syncing",
            SyncState::Cleaning => "Cleaning",
            SyncState::Error => "Error",
        }
    }

    pub fn is_error(self) -> bool {
        self == SyncState::Error
    }
}

/// Byte and file counters of a folder, from `/rest/db/status` or a `FolderSummary` event.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FolderStatus {
    #[serde(default)]
    pub global_bytes: u64,
    #[serde(default)]
    pub global_files: u64,
    #[serde(default)]
    pub local_bytes: u64,
    #[serde(default)]
    pub local_files: u64,
    #[serde(default)]
    pub need_bytes: u64,
    #[serde(default)]
    pub need_files: u64,
    #[serde(default)]
    pub in_sync_bytes: u64,
    #[serde(default)]
    pub in_sync_files: u64,
    #[serde(default)]
    pub pull_errors: u64,
    #[serde(default)]
    pub sequence: u64,
    #[serde(default)]
    pub state: String,
}

impl FolderStatus {
    pub fn sync_state(&self) -> SyncState {
        SyncState::parse(&self.state)
    }

    /// Folder completion percentage based on global and needed bytes.
    pub fn completion(&self) -> f64 {
        if self.global_bytes == 0 {
            return if self.need_bytes == 0 { 100.0 } else { 0.0 };
        }
        let complete = self.global_bytes.saturating_sub(self.need_bytes);
        ((complete as f64 / self.global_bytes as f64) * 100.0).clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_daemon_states() {
        assert_eq!(SyncState::parse("idle"), SyncState::Idle);
        assert_eq!(SyncState::parse("Scanning"), SyncState::Scanning);
        assert_eq!(SyncState::parse("scan-waiting"), SyncState::WaitingToScan);
        assert_eq!(SyncState::parse("sync-waiting"), SyncState::WaitingToSync);
        assert_eq!(SyncState::parse("sync-preparing"), SyncState::PreparingToSync);
        assert_eq!(SyncState::parse("clean-waiting"), SyncState::Cleaning);
        assert_eq!(SyncState::parse("error"), SyncState::Error);
        assert_eq!(SyncState::parse("something-new"), SyncState::Unknown);
    }

    #[test]
    fn completion_tracks_need_bytes() {
        let status = FolderStatus {
            global_bytes: 200,
            need_bytes: 50,
            ..FolderStatus::default()
        };
        assert_eq!(status.completion(), 75.0);

        let empty = FolderStatus::default();
        assert_eq!(empty.completion(), 100.0);
    }

    #[test]
    fn decodes_db_status_payload() {
        let status: FolderStatus = serde_json::from_value(serde_json::json!({
            "globalBytes": 1024,
            "globalFiles": 3,
            "needBytes": 0,
            "inSyncBytes": 1024,
            "state": "idle",
            "ignorePatterns": false
        }))
        .unwrap();
        assert_eq!(status.global_files, 3);
        assert_eq!(status.sync_state(), SyncState::Idle);
    }
}
