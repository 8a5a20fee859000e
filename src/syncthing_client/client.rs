use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ManagerError;

use super::api::{
    ConnectionsResponse, DebugResponse, EventStreamQuery, FolderQuery, IgnoresResponse, RawEvent,
    ScanQuery, SyncthingConfig, VersionResponse,
};
use super::core::http::HttpClient;
use super::models::{FolderStatus, SystemInfo};

/// Slack added on top of the server-side long-poll timeout for `/rest/events`.
const LONG_POLL_MARGIN: Duration = Duration::from_secs(10);

/// The subset of the Syncthing REST API the control plane consumes.
#[async_trait]
pub trait DaemonApi: Send + Sync {
    /// Cheap reachability probe; succeeds once the GUI listener answers.
    async fn ping(&self) -> Result<(), ManagerError>;

    async fn version(&self) -> Result<VersionResponse, ManagerError>;

    async fn system_status(&self) -> Result<SystemInfo, ManagerError>;

    async fn config(&self) -> Result<SyncthingConfig, ManagerError>;

    /// Events with id greater than `since`. `limit` keeps only the newest entries.
    async fn events(
        &self,
        since: u64,
        limit: Option<u32>,
        timeout: Option<Duration>,
    ) -> Result<Vec<RawEvent>, ManagerError>;

    async fn folder_status(&self, folder_id: &str) -> Result<FolderStatus, ManagerError>;

    async fn folder_ignores(&self, folder_id: &str) -> Result<IgnoresResponse, ManagerError>;

    async fn connections(&self) -> Result<ConnectionsResponse, ManagerError>;

    async fn debug_facilities(&self) -> Result<DebugResponse, ManagerError>;

    async fn scan(&self, folder_id: &str, sub_path: Option<&str>) -> Result<(), ManagerError>;

    async fn restart(&self) -> Result<(), ManagerError>;

    async fn shutdown(&self) -> Result<(), ManagerError>;
}

/// Builds API clients for a daemon address once its key is known.
pub trait ApiConnector: Send + Sync {
    fn connect(&self, base_url: &str, api_key: &str) -> Result<Arc<dyn DaemonApi>, ManagerError>;
}

/// `DaemonApi` over HTTP.
#[derive(Clone)]
pub struct RestClient {
    http: HttpClient,
}

impl RestClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, ManagerError> {
        Ok(Self {
            http: HttpClient::new(base_url, api_key)?,
        })
    }

    pub fn base_url(&self) -> &str {
        self.http.base_url()
    }
}

#[async_trait]
impl DaemonApi for RestClient {
    async fn ping(&self) -> Result<(), ManagerError> {
        self.http.get_noauth("/rest/noauth/health").await
    }

    async fn version(&self) -> Result<VersionResponse, ManagerError> {
        self.http.get_json("/rest/system/version").await
    }

    async fn system_status(&self) -> Result<SystemInfo, ManagerError> {
        let status: Value = self.http.get_json("/rest/system/status").await?;
        Ok(SystemInfo::from_value(&status))
    }

    async fn config(&self) -> Result<SyncthingConfig, ManagerError> {
        self.http.get_json("/rest/config").await
    }

    async fn events(
        &self,
        since: u64,
        limit: Option<u32>,
        timeout: Option<Duration>,
    ) -> Result<Vec<RawEvent>, ManagerError> {
        let query = EventStreamQuery {
            since,
            limit,
            timeout: timeout.map(|t| t.as_secs().clamp(1, 300)),
        };
        let request_timeout = timeout.map(|t| t + LONG_POLL_MARGIN);
        let events: Option<Vec<RawEvent>> = self
            .http
            .get_json_with_query("/rest/events", &query, request_timeout)
            .await?;
        Ok(events.unwrap_or_default())
    }

    async fn folder_status(&self, folder_id: &str) -> Result<FolderStatus, ManagerError> {
        let query = FolderQuery { folder: folder_id };
        self.http
            .get_json_with_query("/rest/db/status", &query, None)
            .await
    }

    async fn folder_ignores(&self, folder_id: &str) -> Result<IgnoresResponse, ManagerError> {
        let query = FolderQuery { folder: folder_id };
        self.http
            .get_json_with_query("/rest/db/ignores", &query, None)
            .await
    }

    async fn connections(&self) -> Result<ConnectionsResponse, ManagerError> {
        self.http.get_json("/rest/system/connections").await
    }

    async fn debug_facilities(&self) -> Result<DebugResponse, ManagerError> {
        self.http.get_json("/rest/system/debug").await
    }

    async fn scan(&self, folder_id: &str, sub_path: Option<&str>) -> Result<(), ManagerError> {
        let query = ScanQuery {
            folder: folder_id,
            sub_path,
        };
        self.http.post_with_query("/rest/db/scan", &query).await
    }

    async fn restart(&self) -> Result<(), ManagerError> {
        self.http.post_with_query("/rest/system/restart", &()).await
    }

    async fn shutdown(&self) -> Result<(), ManagerError> {
        self.http.post_with_query("/rest/system/shutdown", &()).await
    }
}

/// Connector producing [`RestClient`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct RestConnector;

impl ApiConnector for RestConnector {
    fn connect(&self, base_url: &str, api_key: &str) -> Result<Arc<dyn DaemonApi>, ManagerError> {
        Ok(Arc::new(RestClient::new(base_url, api_key)?))
    }
}
