use std::path::PathBuf;
use std::process::ExitCode;

use syncthing_manager::config::default_config_path;
use syncthing_manager::telemetry::init_tracing;
use syncthing_manager::{Manager, ManagerConfig, Notification};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);
    let config = ManagerConfig::load(&config_path).await;

    let manager = match Manager::new(config) {
        Ok(manager) => manager,
        Err(err) => {
            error!(error = %err, "Failed to set up the Syncthing manager");
            return ExitCode::FAILURE;
        }
    };

    manager.subscribe(|notification| match notification {
        Notification::MessageLogged(_) => {}
        Notification::ConnectionStatsChanged(stats) => info!(
            in_rate = stats.total.in_bytes_per_second,
            out_rate = stats.total.out_bytes_per_second,
            "Throughput"
        ),
        Notification::ProcessExitedWithError(status) => {
            warn!(?status, "Syncthing exited with an error")
        }
        other => info!(notification = ?other, "Syncthing notification"),
    });

    if let Err(err) = manager.start().await {
        error!(error = %err, "Syncthing failed to start");
        return ExitCode::FAILURE;
    }
    info!(
        address = ?manager.gui_address(),
        version = ?manager.version().map(|v| v.version),
        "Syncthing is running, press Ctrl-C to stop"
    );

    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "Failed to listen for Ctrl-C, stopping now");
    }
    info!("Stopping Syncthing");
    if let Err(err) = manager.stop_and_wait().await {
        error!(error = %err, "Failed to stop Syncthing cleanly");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
