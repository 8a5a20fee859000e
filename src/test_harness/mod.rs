//! Shared fixtures for unit and integration tests.
//!
//! Not part of the supported API.

mod fake_daemon;
#[cfg(unix)]
mod script;

use std::time::Duration;

pub use fake_daemon::{FakeConnector, FakeDaemon};
#[cfg(unix)]
pub use script::{write_executable, ScriptDaemon};

use crate::config::ManagerConfig;

/// Polls `check` every few milliseconds until it holds or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Manager settings tuned for tests: fast probing and polling.
pub fn fast_config(syncthing_path: &str) -> ManagerConfig {
    ManagerConfig {
        syncthing_path: Some(syncthing_path.to_string()),
        address: "127.0.0.1:0".to_string(),
        connect_timeout_ms: 2_000,
        probe_interval_ms: 10,
        stop_timeout_ms: 2_000,
        event_poll_interval_ms: 0,
        event_long_poll_secs: 1,
        connections_poll_interval_ms: 50,
        poll_error_backoff_ms: 20,
        ..ManagerConfig::default()
    }
}
