//! Control plane for a Syncthing daemon running as a child process.
//!
//! [`Manager`] launches and supervises the daemon, keeps an authenticated API
//! session while it is reachable, drains its event log into in-memory folder
//! and device mirrors, and publishes [`Notification`]s about all of it.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod manager;
pub mod mirror;
pub mod notifications;
pub mod poller;
pub mod session;
pub mod supervisor;
pub mod syncthing_client;
pub mod telemetry;
pub mod watchers;

#[cfg(any(test, feature = "test-support"))]
pub mod test_harness;

pub use config::{ManagerConfig, ProcessPriority};
pub use error::{ManagerError, Result};
pub use lifecycle::LifecycleState;
pub use manager::Manager;
pub use mirror::{DeviceSnapshot, FolderError, FolderIgnores, FolderSnapshot};
pub use notifications::{Notification, SubscriptionId};
pub use supervisor::ExitStatus;
pub use syncthing_client::{DaemonVersion, FolderStatus, SyncState, SystemInfo};
pub use watchers::{ConnectionStats, ConnectionsSnapshot};
