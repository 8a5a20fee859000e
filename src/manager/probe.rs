use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, trace};

use crate::error::ManagerError;
use crate::syncthing_client::DaemonApi;

/// Pings the API every `interval` until it answers, `timeout` elapses, or
/// `still_wanted` turns false.
pub(crate) async fn wait_until_reachable<F>(
    api: &dyn DaemonApi,
    timeout: Duration,
    interval: Duration,
    still_wanted: F,
) -> Result<u32, ManagerError>
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + timeout;
    let mut attempts = 0u32;

    loop {
        if !still_wanted() {
            return Err(ManagerError::StartupAborted);
        }
        attempts += 1;
        match api.ping().await {
            Ok(()) => {
                debug!(attempts, "Syncthing API reachable");
                return Ok(attempts);
            }
            Err(err) => trace!(attempt = attempts, error = %err, "API not reachable yet"),
        }
        if Instant::now() + interval > deadline {
            return Err(ManagerError::DaemonDidNotStart { timeout });
        }
        sleep(interval).await;
    }
}
