use std::path::Path;

use serde_json::Value;
use tokio::fs;
use tracing::{info, warn};

use crate::error::ManagerError;

use super::ManagerConfig;

impl ManagerConfig {
    /// Load configuration from a JSON file.
    /// Falls back to defaults if the file doesn't exist or can't be parsed
    pub async fn load(path: &Path) -> Self {
        match Self::try_load(path).await {
            Ok(config) => {
                info!(
                    address = %config.address,
                    home = ?config.syncthing_home,
                    "Loaded configuration"
                );
                config
            }
            Err(err) => {
                warn!(error = ?err, "Failed to load configuration, using defaults");
                Self::default()
            }
        }
    }

    pub async fn try_load(path: &Path) -> Result<Self, ManagerError> {
        if !path.exists() {
            warn!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .await
            .map_err(|err| ManagerError::Config(format!("Failed to read config file: {err}")))?;

        Self::from_json_str(&contents)
    }

    pub fn from_json_str(contents: &str) -> Result<Self, ManagerError> {
        let value: Value = serde_json::from_str(contents)
            .map_err(|err| ManagerError::Config(format!("Failed to parse config: {err}")))?;

        let config: ManagerConfig = serde_json::from_value(value).map_err(|err| {
            ManagerError::Config(format!("Failed to deserialize config: {err}"))
        })?;

        if config.address.trim().is_empty() {
            return Err(ManagerError::Config("address must not be empty".to_string()));
        }

        Ok(config)
    }
}
