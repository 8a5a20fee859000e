//! The control plane: owns the daemon process, the API session, the pollers
//! and the mirrors, and drives the lifecycle state machine.

mod address;
mod probe;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ManagerConfig;
use crate::error::ManagerError;
use crate::lifecycle::{LifecycleState, Transition};
use crate::mirror::{DeviceManager, DeviceSnapshot, FolderManager, FolderSnapshot};
use crate::notifications::{Dispatcher, Notification, Notifier, SubscriptionId};
use crate::poller::{Poller, PollerSettings};
use crate::session::{Session, SessionHandle};
use crate::supervisor::{
    ExitStatus, LaunchHook, LaunchParams, LaunchSpec, ProcessEvent, ProcessSupervisor,
};
use crate::syncthing_client::api::DebugResponse;
use crate::syncthing_client::{
    base_url_for, generate_api_key, ApiConnector, DaemonVersion, RestConnector, SystemInfo,
};
use crate::watchers::{ConnectionsSnapshot, ConnectionsWatcher, EventWatcher};

/// What the manager learned about the daemon during the last startup.
#[derive(Debug, Clone, Default)]
struct DaemonInfo {
    address: Option<String>,
    version: Option<DaemonVersion>,
    system: Option<SystemInfo>,
    started_at: Option<DateTime<Utc>>,
}

pub struct Manager {
    config: ManagerConfig,
    connector: Arc<dyn ApiConnector>,
    supervisor: ProcessSupervisor,
    sessions: Arc<SessionHandle>,
    event_poller: Poller<EventWatcher>,
    connections_poller: Poller<ConnectionsWatcher>,
    folders: Arc<FolderManager>,
    devices: Arc<DeviceManager>,
    notifier: Notifier,
    dispatcher: Dispatcher,
    state: Mutex<LifecycleState>,
    state_tx: watch::Sender<LifecycleState>,
    /// Bumped whenever a startup begins or the session ends; a startup only
    /// proceeds while the epoch it captured is still current.
    startup_epoch: AtomicU64,
    info: Mutex<DaemonInfo>,
    process_events: Mutex<Option<JoinHandle<()>>>,
}

impl Manager {
    /// Creates a manager talking to the daemon over HTTP. Must be called
    /// inside a tokio runtime.
    pub fn new(config: ManagerConfig) -> Result<Arc<Self>, ManagerError> {
        Self::with_connector(config, Arc::new(RestConnector))
    }

    pub fn with_connector(
        config: ManagerConfig,
        connector: Arc<dyn ApiConnector>,
    ) -> Result<Arc<Self>, ManagerError> {
        let spec = LaunchSpec::from_config(&config)?;
        let preferred = config.address.clone();
        let hook: LaunchHook = Arc::new(move || {
            Ok(LaunchParams {
                gui_address: address::finalize(&preferred)?,
                api_key: generate_api_key(),
            })
        });
        let (supervisor, process_rx) = ProcessSupervisor::new(spec, hook);

        let (notifier, dispatcher) = Dispatcher::spawn();
        let sessions = Arc::new(SessionHandle::new());
        let folders = Arc::new(FolderManager::new(notifier.clone()));
        let devices = Arc::new(DeviceManager::new(notifier.clone()));

        let event_watcher = Arc::new(EventWatcher::new(config.event_long_poll()));
        event_watcher.add_handler(folders.clone());
        event_watcher.add_handler(devices.clone());
        let event_poller = Poller::new(
            event_watcher,
            Arc::clone(&sessions),
            PollerSettings {
                interval: config.event_poll_interval(),
                error_backoff: config.poll_error_backoff(),
            },
        );
        let connections_poller = Poller::new(
            Arc::new(ConnectionsWatcher::new(notifier.clone())),
            Arc::clone(&sessions),
            PollerSettings {
                interval: config.connections_poll_interval(),
                error_backoff: config.poll_error_backoff(),
            },
        );

        let (state_tx, _) = watch::channel(LifecycleState::Stopped);
        let manager = Arc::new(Self {
            config,
            connector,
            supervisor,
            sessions,
            event_poller,
            connections_poller,
            folders,
            devices,
            notifier,
            dispatcher,
            state: Mutex::new(LifecycleState::Stopped),
            state_tx,
            startup_epoch: AtomicU64::new(0),
            info: Mutex::new(DaemonInfo::default()),
            process_events: Mutex::new(None),
        });

        let task = tokio::spawn(process_event_loop(Arc::downgrade(&manager), process_rx));
        *manager
            .process_events
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(task);
        Ok(manager)
    }

    // ---- lifecycle -------------------------------------------------------

    /// Launches the daemon and returns once it is `Running` with its data
    /// loaded. A no-op while already starting or running.
    pub async fn start(&self) -> Result<(), ManagerError> {
        let epoch = {
            let mut state = self.lock_state();
            match state.transition_to(LifecycleState::Starting) {
                Transition::Apply => {}
                Transition::Unchanged => return Ok(()),
                Transition::Forbidden if *state == LifecycleState::Running => return Ok(()),
                Transition::Forbidden => {
                    return Err(ManagerError::InvalidState(format!("{:?}", *state)));
                }
            }
            self.apply_locked(&mut state, LifecycleState::Starting);
            self.startup_epoch.fetch_add(1, Ordering::SeqCst) + 1
        };

        let params = match self.supervisor.start().await {
            Ok(params) => params,
            Err(err) => {
                warn!(error = %err, "Failed to launch Syncthing");
                self.set_state(LifecycleState::Stopped);
                return Err(err);
            }
        };
        self.run_startup(params, epoch).await
    }

    /// Asks the daemon to shut down. Returns once the request was sent; the
    /// state reaches `Stopped` when the process exits.
    pub async fn stop(&self) -> Result<(), ManagerError> {
        let session = self.sessions.current();
        match self.current_state() {
            LifecycleState::Stopped | LifecycleState::Stopping => return Ok(()),
            LifecycleState::Starting | LifecycleState::Restarting => {
                debug!("Stop requested before Syncthing was up, killing it");
                self.kill().await;
                return Ok(());
            }
            LifecycleState::Running => {}
        }
        if self.set_state(LifecycleState::Stopping) != Transition::Apply {
            return Ok(());
        }

        let Some(session) = session else {
            self.kill().await;
            return Ok(());
        };
        match session.api().shutdown().await {
            Ok(()) => info!("Requested Syncthing shutdown"),
            Err(err) if err.is_transient() => {
                debug!(error = %err, "Shutdown request interrupted, waiting for exit anyway");
            }
            Err(err) => warn!(error = %err, "Shutdown request failed, waiting for exit anyway"),
        }
        Ok(())
    }

    /// `stop`, then waits up to the configured stop timeout for the process
    /// to exit before killing it.
    pub async fn stop_and_wait(&self) -> Result<(), ManagerError> {
        let mut states = self.state_tx.subscribe();
        self.stop().await?;
        let exited = tokio::time::timeout(self.config.stop_timeout(), async {
            states
                .wait_for(|state| *state == LifecycleState::Stopped)
                .await
                .map(|_| ())
        })
        .await;
        if !matches!(exited, Ok(Ok(()))) {
            warn!(timeout = ?self.config.stop_timeout(), "Syncthing did not stop in time, killing it");
            self.kill().await;
        }
        Ok(())
    }

    /// Force-terminates the daemon tree. Valid in every state.
    pub async fn kill(&self) {
        self.set_state(LifecycleState::Stopped);
        self.supervisor.kill().await;
    }

    /// Asks the running daemon to restart itself; the supervisor relaunches it.
    pub async fn restart(&self) -> Result<(), ManagerError> {
        let session = self.running_session()?;
        session.api().restart().await?;
        info!("Requested Syncthing restart");
        Ok(())
    }

    // ---- commands --------------------------------------------------------

    pub async fn scan(&self, folder_id: &str, sub_path: Option<&str>) -> Result<(), ManagerError> {
        let session = self.running_session()?;
        session.api().scan(folder_id, sub_path).await
    }

    pub async fn reload_ignores(&self, folder_id: &str) -> Result<(), ManagerError> {
        let session = self.running_session()?;
        self.folders.reload_ignores(&session, folder_id).await
    }

    pub async fn debug_facilities(&self) -> Result<DebugResponse, ManagerError> {
        let session = self.running_session()?;
        session.api().debug_facilities().await
    }

    // ---- queries ---------------------------------------------------------

    pub fn state(&self) -> LifecycleState {
        self.current_state()
    }

    pub fn state_watch(&self) -> watch::Receiver<LifecycleState> {
        self.state_tx.subscribe()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.dispatcher.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.dispatcher.unsubscribe(id)
    }

    pub fn folders(&self) -> Vec<FolderSnapshot> {
        self.folders.snapshots()
    }

    pub fn folder(&self, folder_id: &str) -> Option<FolderSnapshot> {
        self.folders.snapshot(folder_id)
    }

    pub fn devices(&self) -> Vec<DeviceSnapshot> {
        self.devices.snapshots()
    }

    pub fn device(&self, device_id: &str) -> Option<DeviceSnapshot> {
        self.devices.snapshot(device_id)
    }

    pub fn connection_stats(&self) -> Option<ConnectionsSnapshot> {
        self.connections_poller.inner().latest()
    }

    pub fn version(&self) -> Option<DaemonVersion> {
        self.lock_info().version.clone()
    }

    pub fn system_info(&self) -> Option<SystemInfo> {
        self.lock_info().system.clone()
    }

    /// When the daemon last reached `Running`.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.lock_info().started_at
    }

    /// GUI address of the current launch.
    pub fn gui_address(&self) -> Option<String> {
        self.lock_info().address.clone()
    }

    // ---- internals -------------------------------------------------------

    fn lock_state(&self) -> MutexGuard<'_, LifecycleState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_info(&self) -> MutexGuard<'_, DaemonInfo> {
        self.info.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn current_state(&self) -> LifecycleState {
        *self.lock_state()
    }

    fn running_session(&self) -> Result<Session, ManagerError> {
        if self.current_state() != LifecycleState::Running {
            return Err(ManagerError::NotRunning);
        }
        self.sessions.current().ok_or(ManagerError::NotRunning)
    }

    fn set_state(&self, next: LifecycleState) -> Transition {
        let mut state = self.lock_state();
        let transition = state.transition_to(next);
        match transition {
            Transition::Apply => self.apply_locked(&mut state, next),
            Transition::Unchanged => {}
            Transition::Forbidden => {
                warn!(from = ?*state, to = ?next, "Ignoring forbidden lifecycle transition");
            }
        }
        transition
    }

    /// Moves to `next`, which must be a legal transition. Session-ending
    /// states tear the session down before anyone can observe them.
    fn apply_locked(&self, state: &mut MutexGuard<'_, LifecycleState>, next: LifecycleState) {
        let old = **state;
        if next.ends_session() {
            self.startup_epoch.fetch_add(1, Ordering::SeqCst);
            self.teardown(next);
        }
        **state = next;
        self.state_tx.send_replace(next);
        info!(from = ?old, to = ?next, "Syncthing state changed");
        self.notifier
            .publish(Notification::StateChanged { old, new: next });
    }

    fn teardown(&self, next: LifecycleState) {
        self.sessions.clear();
        self.event_poller.stop();
        self.connections_poller.stop();
        if next == LifecycleState::Stopped {
            self.connections_poller.inner().clear();
            self.folders.clear();
            self.devices.clear();
            self.lock_info().started_at = None;
        }
    }

    fn is_current_startup(&self, epoch: u64) -> bool {
        *self.lock_state() == LifecycleState::Starting
            && self.startup_epoch.load(Ordering::SeqCst) == epoch
    }

    async fn run_startup(&self, params: LaunchParams, epoch: u64) -> Result<(), ManagerError> {
        match self.startup_sequence(&params, epoch).await {
            Ok(()) => Ok(()),
            Err(err) => {
                if self.is_current_startup(epoch) {
                    warn!(error = %err, "Syncthing failed to start");
                    self.supervisor.kill().await;
                    self.set_state(LifecycleState::Stopped);
                } else {
                    debug!(error = %err, "Startup superseded");
                }
                Err(err)
            }
        }
    }

    async fn startup_sequence(&self, params: &LaunchParams, epoch: u64) -> Result<(), ManagerError> {
        let base_url = base_url_for(&params.gui_address);
        let api = self.connector.connect(&base_url, &params.api_key)?;
        self.lock_info().address = Some(params.gui_address.clone());

        probe::wait_until_reachable(
            api.as_ref(),
            self.config.connect_timeout(),
            self.config.probe_interval(),
            || self.is_current_startup(epoch),
        )
        .await?;

        let session = {
            let _state = self.lock_state();
            if self.startup_epoch.load(Ordering::SeqCst) != epoch {
                return Err(ManagerError::StartupAborted);
            }
            self.sessions.install(api, &base_url)
        };

        let loaded = tokio::select! {
            biased;
            _ = session.cancellation().cancelled() => Err(ManagerError::StartupAborted),
            loaded = self.load_session(&session, epoch) => loaded,
        };
        loaded?;

        let now_running = {
            let mut state = self.lock_state();
            let current = *state == LifecycleState::Starting
                && self.startup_epoch.load(Ordering::SeqCst) == epoch;
            if current {
                self.lock_info().started_at = Some(Utc::now());
                self.apply_locked(&mut state, LifecycleState::Running);
            }
            current
        };
        if !now_running {
            return Err(ManagerError::StartupAborted);
        }
        self.notifier.publish(Notification::DataLoaded);
        Ok(())
    }

    async fn load_session(&self, session: &Session, epoch: u64) -> Result<(), ManagerError> {
        let api = session.api();
        let version = DaemonVersion::from_response(api.version().await?);
        let system = api.system_status().await?;
        let config = api.config().await?;
        info!(version = %version.version, my_id = ?system.my_id, "Connected to Syncthing");
        let own_id = system.my_id.clone();
        {
            let mut info = self.lock_info();
            info.version = Some(version);
            info.system = Some(system);
        }

        {
            let _state = self.lock_state();
            if self.startup_epoch.load(Ordering::SeqCst) != epoch {
                return Err(ManagerError::StartupAborted);
            }
            self.event_poller.start();
            self.connections_poller.start();
        }

        self.folders.load(session, &config).await?;
        self.devices.load(session, &config, own_id.as_deref()).await?;
        Ok(())
    }

    fn on_process_event(self: &Arc<Self>, event: ProcessEvent) {
        match event {
            ProcessEvent::Output(line) => {
                self.notifier.publish(Notification::MessageLogged(line));
            }
            ProcessEvent::Restarted => {
                info!("Syncthing is restarting");
                self.set_state(LifecycleState::Restarting);
            }
            ProcessEvent::Starting(params) => {
                let epoch = {
                    let mut state = self.lock_state();
                    // Explicit starts already moved to Starting themselves.
                    if *state != LifecycleState::Restarting {
                        return;
                    }
                    self.apply_locked(&mut state, LifecycleState::Starting);
                    self.startup_epoch.fetch_add(1, Ordering::SeqCst) + 1
                };
                let manager = Arc::clone(self);
                tokio::spawn(async move {
                    if let Err(err) = manager.run_startup(params, epoch).await {
                        warn!(error = %err, "Syncthing did not come back after restarting");
                    }
                });
            }
            ProcessEvent::Stopped(status) => {
                if status == ExitStatus::Killed {
                    // Whoever killed it already moved the state.
                    return;
                }
                let was = self.current_state();
                self.set_state(LifecycleState::Stopped);
                if status.is_failure() && was != LifecycleState::Stopping {
                    warn!(?status, "Syncthing exited unexpectedly");
                    self.notifier
                        .publish(Notification::ProcessExitedWithError(status));
                }
            }
            ProcessEvent::LaunchFailed(reason) => {
                warn!(%reason, "Syncthing could not be relaunched");
                self.set_state(LifecycleState::Stopped);
            }
        }
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        if let Some(task) = self
            .process_events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
    }
}

async fn process_event_loop(manager: Weak<Manager>, mut events: mpsc::UnboundedReceiver<ProcessEvent>) {
    while let Some(event) = events.recv().await {
        let Some(manager) = manager.upgrade() else {
            break;
        };
        manager.on_process_event(event);
    }
}
