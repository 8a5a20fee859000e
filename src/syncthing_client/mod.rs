pub mod api;
mod client;
mod core;
pub mod events;
mod helpers;
pub mod models;

pub use client::{ApiConnector, DaemonApi, RestClient, RestConnector};
pub use events::{Event, EventKind};
pub use helpers::{base_url_for, generate_api_key};
pub use models::{DaemonVersion, FolderStatus, SyncState, SystemInfo};
