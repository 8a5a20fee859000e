//! Generic "poll forever" loop.
//!
//! A concrete poller implements [`Poll`]; [`Poller`] owns the task that calls
//! it repeatedly through the current session, waits `interval` after a
//! successful poll and `error_backoff` after a failed one. Only [`Poller::stop`]
//! (or dropping the poller) ends the loop.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ManagerError;
use crate::session::{Session, SessionHandle};

#[async_trait]
pub trait Poll: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Called by the loop before its first poll after every start.
    fn on_start(&self) {}

    async fn poll_once(&self, session: &Session) -> Result<(), ManagerError>;
}

#[derive(Debug, Clone, Copy)]
pub struct PollerSettings {
    pub interval: Duration,
    pub error_backoff: Duration,
}

struct RunningLoop {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

pub struct Poller<P: Poll> {
    inner: Arc<P>,
    sessions: Arc<SessionHandle>,
    settings: PollerSettings,
    running: Mutex<Option<RunningLoop>>,
}

impl<P: Poll> Poller<P> {
    pub fn new(inner: Arc<P>, sessions: Arc<SessionHandle>, settings: PollerSettings) -> Self {
        Self {
            inner,
            sessions,
            settings,
            running: Mutex::new(None),
        }
    }

    pub fn inner(&self) -> &Arc<P> {
        &self.inner
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|running| !running.task.is_finished())
            .unwrap_or(false)
    }

    /// Spawns the loop on the current runtime. No-op when already running.
    pub fn start(&self) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.as_ref().is_some_and(|r| !r.task.is_finished()) {
            return;
        }
        let stop = CancellationToken::new();
        let task = tokio::spawn(run_loop(
            Arc::clone(&self.inner),
            Arc::clone(&self.sessions),
            self.settings,
            stop.clone(),
        ));
        debug!(poller = self.inner.name(), "Poller started");
        *running = Some(RunningLoop { stop, task });
    }

    /// Signals the loop to end. No-op when already stopped.
    pub fn stop(&self) {
        let taken = self.running.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(running) = taken {
            running.stop.cancel();
            debug!(poller = self.inner.name(), "Poller stop requested");
        }
    }

    /// Stops the loop and waits for its task to finish.
    pub async fn stop_and_join(&self) {
        let taken = self.running.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(running) = taken {
            running.stop.cancel();
            let _ = running.task.await;
        }
    }
}

impl<P: Poll> Drop for Poller<P> {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_loop<P: Poll>(
    inner: Arc<P>,
    sessions: Arc<SessionHandle>,
    settings: PollerSettings,
    stop: CancellationToken,
) {
    inner.on_start();

    loop {
        let delay = match sessions.current() {
            // Nothing to poll through yet; don't spin when interval is zero.
            None => settings.interval.max(settings.error_backoff),
            Some(session) => {
                let result = tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    _ = session.cancellation().cancelled() => Err(ManagerError::Cancelled),
                    result = inner.poll_once(&session) => result,
                };
                match result {
                    Ok(()) => settings.interval,
                    Err(err) if err.is_transient() => {
                        debug!(poller = inner.name(), error = %err, "Transient polling error, backing off");
                        settings.error_backoff
                    }
                    Err(err) => {
                        warn!(poller = inner.name(), error = ?err, "Polling failed, backing off");
                        settings.error_backoff
                    }
                }
            }
        };

        if delay.is_zero() {
            if stop.is_cancelled() {
                break;
            }
            tokio::task::yield_now().await;
            continue;
        }

        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = sleep(delay) => {}
        }
    }

    debug!(poller = inner.name(), "Poller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_harness::FakeDaemon;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
        starts: AtomicUsize,
        fail_first: usize,
    }

    impl Counting {
        fn new(fail_first: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                starts: AtomicUsize::new(0),
                fail_first,
            }
        }
    }

    #[async_trait]
    impl Poll for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn on_start(&self) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        async fn poll_once(&self, _session: &Session) -> Result<(), ManagerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err(ManagerError::Syncthing("boom".to_string()))
            } else {
                Ok(())
            }
        }
    }

    struct Hanging;

    #[async_trait]
    impl Poll for Hanging {
        fn name(&self) -> &'static str {
            "hanging"
        }

        async fn poll_once(&self, _session: &Session) -> Result<(), ManagerError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn settings(interval_ms: u64, backoff_ms: u64) -> PollerSettings {
        PollerSettings {
            interval: Duration::from_millis(interval_ms),
            error_backoff: Duration::from_millis(backoff_ms),
        }
    }

    fn sessions_with_fake() -> Arc<SessionHandle> {
        let sessions = Arc::new(SessionHandle::new());
        sessions.install(Arc::new(FakeDaemon::new()), "http://fake");
        sessions
    }

    async fn wait_for_calls(counting: &Counting, at_least: usize) {
        for _ in 0..200 {
            if counting.calls.load(Ordering::SeqCst) >= at_least {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("poller did not reach {at_least} calls");
    }

    #[tokio::test]
    async fn keeps_polling_through_errors() {
        let counting = Arc::new(Counting::new(3));
        let poller = Poller::new(Arc::clone(&counting), sessions_with_fake(), settings(1, 1));
        poller.start();
        wait_for_calls(&counting, 6).await;
        assert!(poller.is_running());
        poller.stop_and_join().await;
        assert!(!poller.is_running());
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let counting = Arc::new(Counting::new(0));
        let poller = Poller::new(Arc::clone(&counting), sessions_with_fake(), settings(5, 5));
        poller.start();
        poller.start();
        wait_for_calls(&counting, 1).await;
        assert_eq!(counting.starts.load(Ordering::SeqCst), 1);
        poller.stop();
        poller.stop();
        poller.stop_and_join().await;

        poller.start();
        wait_for_calls(&counting, counting.calls.load(Ordering::SeqCst) + 1).await;
        assert_eq!(counting.starts.load(Ordering::SeqCst), 2);
        poller.stop_and_join().await;
    }

    #[tokio::test]
    async fn waits_while_no_session() {
        let counting = Arc::new(Counting::new(0));
        let sessions = Arc::new(SessionHandle::new());
        let poller = Poller::new(Arc::clone(&counting), Arc::clone(&sessions), settings(1, 1));
        poller.start();
        sleep(Duration::from_millis(30)).await;
        assert_eq!(counting.calls.load(Ordering::SeqCst), 0);

        sessions.install(Arc::new(FakeDaemon::new()), "http://fake");
        wait_for_calls(&counting, 1).await;
        poller.stop_and_join().await;
    }

    #[tokio::test]
    async fn stop_interrupts_an_in_flight_poll() {
        let poller = Poller::new(Arc::new(Hanging), sessions_with_fake(), settings(1, 1));
        poller.start();
        sleep(Duration::from_millis(10)).await;
        tokio::time::timeout(Duration::from_secs(1), poller.stop_and_join())
            .await
            .expect("stop should abort the pending poll");
    }

    #[tokio::test]
    async fn epoch_cancellation_is_transient() {
        let sessions = sessions_with_fake();
        let poller = Poller::new(Arc::new(Hanging), Arc::clone(&sessions), settings(1, 1));
        poller.start();
        sleep(Duration::from_millis(10)).await;
        sessions.clear();
        sleep(Duration::from_millis(20)).await;
        assert!(poller.is_running(), "epoch end must not terminate the loop");
        poller.stop_and_join().await;
    }
}
