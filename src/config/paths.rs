use std::path::PathBuf;
use tracing::{debug, warn};

use crate::error::ManagerError;

use super::ManagerConfig;

#[cfg(windows)]
const SYNCTHING_BINARY: &str = "syncthing.exe";
#[cfg(not(windows))]
const SYNCTHING_BINARY: &str = "syncthing";

impl ManagerConfig {
    /// Get the path to the Syncthing binary
    pub fn resolved_syncthing_path(&self) -> Result<PathBuf, ManagerError> {
        match self.syncthing_path.as_deref().map(str::trim) {
            Some(path) if !path.is_empty() => Ok(PathBuf::from(path)),
            _ => default_syncthing_path(),
        }
    }
}

/// Get the path to the config file
/// Looks for config.json in the app directory (parent of the binary's folder)
pub fn default_config_path() -> PathBuf {
    // Executable is at: app_root/bin/entry
    // Config should be at: app_root/config.json
    if let Some(app_root) = app_root_dir() {
        let config_path = app_root.join("config.json");
        debug!(path = %config_path.display(), "Looking for config");
        return config_path;
    }

    warn!("Using fallback: looking for config.json in current directory");
    PathBuf::from("config.json")
}

/// Syncthing binary shipped alongside the application.
pub fn default_syncthing_path() -> Result<PathBuf, ManagerError> {
    match app_root_dir() {
        Some(root) => Ok(root.join(SYNCTHING_BINARY)),
        None => std::env::current_dir()
            .map(|dir| dir.join(SYNCTHING_BINARY))
            .map_err(|err| ManagerError::Config(format!("Failed to determine app root: {err}"))),
    }
}

fn app_root_dir() -> Option<PathBuf> {
    let exe_path = std::env::current_exe().ok()?;
    debug!(path = %exe_path.display(), "Executable path detected");
    let bin_dir = exe_path.parent()?;
    let root = bin_dir.parent()?;
    if root.as_os_str().is_empty() {
        None
    } else {
        Some(root.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_path_wins() {
        let config = ManagerConfig {
            syncthing_path: Some("/opt/syncthing/syncthing".to_string()),
            ..ManagerConfig::default()
        };
        assert_eq!(
            config.resolved_syncthing_path().unwrap(),
            PathBuf::from("/opt/syncthing/syncthing")
        );
    }

    #[test]
    fn blank_path_falls_back_to_app_root() {
        let config = ManagerConfig {
            syncthing_path: Some("   ".to_string()),
            ..ManagerConfig::default()
        };
        let resolved = config.resolved_syncthing_path().unwrap();
        assert!(resolved.ends_with(SYNCTHING_BINARY));
    }
}
