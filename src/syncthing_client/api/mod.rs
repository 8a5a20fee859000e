mod queries;
mod types;

pub use queries::{EventStreamQuery, FolderQuery, ScanQuery};
pub use types::{
    ConnectionState, ConnectionTotals, ConnectionsResponse, DebugResponse, DeviceConfig,
    FolderConfig, FolderDevice, FolderErrorEntry, IgnoresResponse, RawEvent, SyncthingConfig,
    VersionResponse,
};
