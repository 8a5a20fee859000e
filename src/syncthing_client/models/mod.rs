mod folder;
mod overview;
mod version;

pub use folder::{FolderStatus, SyncState};
pub use overview::SystemInfo;
pub use version::DaemonVersion;
