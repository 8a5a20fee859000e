use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::error::ManagerError;
use crate::notifications::{Notification, Notifier};
use crate::session::Session;
use crate::syncthing_client::api::{ConnectionsResponse, DeviceConfig, SyncthingConfig};
use crate::syncthing_client::{Event, EventKind};
use crate::watchers::EventHandler;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceSnapshot {
    pub id: String,
    pub name: String,
    pub connected: bool,
    pub address: Option<String>,
    pub paused: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct DeviceState {
    connected: bool,
    address: Option<String>,
    paused: bool,
}

/// One remote device. The own device is never mirrored.
#[derive(Debug)]
pub struct Device {
    id: String,
    name: String,
    state: Mutex<DeviceState>,
}

impl Device {
    fn new(config: &DeviceConfig, state: DeviceState) -> Self {
        Self {
            id: config.device_id.clone(),
            name: config
                .name
                .clone()
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| short_id(&config.device_id)),
            state: Mutex::new(state),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        let state = self.lock();
        DeviceSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            connected: state.connected,
            address: state.address.clone(),
            paused: state.paused,
        }
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// First block of a device id, the way the daemon abbreviates unnamed peers.
fn short_id(device_id: &str) -> String {
    device_id.split('-').next().unwrap_or(device_id).to_string()
}

type DeviceMap = HashMap<String, Arc<Device>>;

/// Mirror of the remote devices known to the daemon.
pub struct DeviceManager {
    devices: RwLock<Arc<DeviceMap>>,
    own_id: RwLock<Option<String>>,
    notifier: Notifier,
    resync: tokio::sync::Mutex<()>,
}

impl DeviceManager {
    pub fn new(notifier: Notifier) -> Self {
        Self {
            devices: RwLock::new(Arc::new(HashMap::new())),
            own_id: RwLock::new(None),
            notifier,
            resync: tokio::sync::Mutex::new(()),
        }
    }

    pub fn collection(&self) -> Arc<HashMap<String, Arc<Device>>> {
        Arc::clone(&self.devices.read().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn get(&self, device_id: &str) -> Option<Arc<Device>> {
        self.collection().get(device_id).cloned()
    }

    pub fn snapshot(&self, device_id: &str) -> Option<DeviceSnapshot> {
        self.get(device_id).map(|device| device.snapshot())
    }

    /// Every device, ordered by id.
    pub fn snapshots(&self) -> Vec<DeviceSnapshot> {
        let mut devices: Vec<DeviceSnapshot> = self
            .collection()
            .values()
            .map(|device| device.snapshot())
            .collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    /// The local device id, once known.
    pub fn own_id(&self) -> Option<String> {
        self.own_id
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Builds the collection from `config` merged with live connection state.
    pub async fn load(
        &self,
        session: &Session,
        config: &SyncthingConfig,
        own_id: Option<&str>,
    ) -> Result<(), ManagerError> {
        let _guard = self.resync.lock().await;
        *self.own_id.write().unwrap_or_else(|e| e.into_inner()) = own_id.map(str::to_string);
        let connections = fetch_connections(session).await?;
        let fresh = build_generation(config, &connections, own_id);
        debug!(devices = fresh.len(), "Device mirror loaded");
        self.install(fresh);
        Ok(())
    }

    pub fn clear(&self) {
        let had_devices = !self.collection().is_empty();
        *self.devices.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(HashMap::new());
        if had_devices {
            self.notifier.publish(Notification::DevicesChanged);
        }
    }

    pub async fn resync(&self, session: &Session) -> Result<(), ManagerError> {
        let _guard = self.resync.lock().await;
        let config = session.api().config().await?;
        let own_id = match self.own_id() {
            Some(id) => Some(id),
            None => session.api().system_status().await?.my_id,
        };
        let connections = fetch_connections(session).await?;
        let fresh = build_generation(&config, &connections, own_id.as_deref());
        let current = self.collection();

        let same = current.len() == fresh.len()
            && fresh.iter().all(|(id, device)| {
                current
                    .get(id)
                    .is_some_and(|existing| existing.name == device.name)
            });
        if !same {
            debug!(devices = fresh.len(), "Device set changed, replacing collection");
            self.install(fresh);
            return Ok(());
        }

        for (id, fresh_device) in fresh.iter() {
            if let Some(existing) = current.get(id) {
                let target = fresh_device.lock().clone();
                self.update_connection(existing, target.connected, target.address);
                self.update_paused(existing, target.paused);
            }
        }
        trace!("Device mirror resynced in place");
        Ok(())
    }

    fn install(&self, devices: DeviceMap) {
        *self.devices.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(devices);
        self.notifier.publish(Notification::DevicesChanged);
    }

    fn update_connection(&self, device: &Device, connected: bool, address: Option<String>) {
        let mut state = device.lock();
        let changed = state.connected != connected;
        state.connected = connected;
        state.address = if connected { address } else { None };
        if changed {
            self.notifier.publish(Notification::DeviceConnectionChanged {
                device_id: device.id.clone(),
                connected,
            });
        }
    }

    fn update_paused(&self, device: &Device, paused: bool) {
        let mut state = device.lock();
        if state.paused == paused {
            return;
        }
        state.paused = paused;
        self.notifier.publish(Notification::DevicePauseChanged {
            device_id: device.id.clone(),
            paused,
        });
    }

    async fn apply(&self, session: &Session, event: &Event) -> Result<(), ManagerError> {
        match &event.kind {
            EventKind::DeviceConnected { device, address } => {
                if let Some(entry) = self.get(device) {
                    self.update_connection(&entry, true, address.clone());
                }
            }
            EventKind::DeviceDisconnected { device, error } => {
                if let Some(entry) = self.get(device) {
                    if let Some(error) = error {
                        debug!(device = %device, error = %error, "Device disconnected");
                    }
                    self.update_connection(&entry, false, None);
                }
            }
            EventKind::DevicePaused { device } => {
                if let Some(entry) = self.get(device) {
                    self.update_paused(&entry, true);
                }
            }
            EventKind::DeviceResumed { device } => {
                if let Some(entry) = self.get(device) {
                    self.update_paused(&entry, false);
                }
            }
            EventKind::DeviceRejected {
                device,
                name,
                address,
            } => {
                self.notifier.publish(Notification::DeviceRejected {
                    device_id: device.clone(),
                    name: name.clone(),
                    address: address.clone(),
                });
            }
            EventKind::StartupComplete { my_id: Some(my_id) } => {
                let known = self.own_id();
                if known.as_deref() != Some(my_id.as_str()) {
                    *self.own_id.write().unwrap_or_else(|e| e.into_inner()) = Some(my_id.clone());
                    if self.get(my_id).is_some() {
                        self.resync(session).await?;
                    }
                }
            }
            EventKind::ConfigSaved => self.resync(session).await?,
            EventKind::StartupComplete { my_id: None }
            | EventKind::StateChanged { .. }
            | EventKind::ItemStarted { .. }
            | EventKind::ItemFinished { .. }
            | EventKind::FolderRejected { .. }
            | EventKind::FolderErrors { .. }
            | EventKind::FolderSummary { .. }
            | EventKind::Unknown { .. } => {}
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler for DeviceManager {
    async fn handle_event(&self, session: &Session, event: &Event) {
        if let Err(err) = self.apply(session, event).await {
            warn!(event = event.kind.name(), error = %err, "Failed to apply device event");
        }
    }

    async fn handle_events_skipped(&self, session: &Session) {
        if let Err(err) = self.resync(session).await {
            warn!(error = %err, "Device resync after skipped events failed");
        }
    }
}

async fn fetch_connections(session: &Session) -> Result<ConnectionsResponse, ManagerError> {
    match session.api().connections().await {
        Ok(connections) => Ok(connections),
        Err(err) if err.is_transient() => Err(err),
        Err(err) => {
            warn!(error = %err, "Failed to load connections, assuming all devices offline");
            Ok(ConnectionsResponse::default())
        }
    }
}

fn build_generation(
    config: &SyncthingConfig,
    connections: &ConnectionsResponse,
    own_id: Option<&str>,
) -> DeviceMap {
    config
        .devices
        .iter()
        .filter(|device| Some(device.device_id.as_str()) != own_id)
        .map(|device| {
            let connection = connections.connections.get(&device.device_id);
            let connected = connection.is_some_and(|c| c.connected);
            let state = DeviceState {
                connected,
                address: connection
                    .filter(|_| connected)
                    .and_then(|c| c.address.clone()),
                paused: device.paused.unwrap_or(false) || connection.is_some_and(|c| c.paused),
            };
            (device.device_id.clone(), Arc::new(Device::new(device, state)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::Dispatcher;
    use crate::session::SessionHandle;
    use crate::test_harness::FakeDaemon;
    use tokio::sync::mpsc;

    struct Fixture {
        daemon: Arc<FakeDaemon>,
        session: Session,
        manager: DeviceManager,
        rx: mpsc::UnboundedReceiver<Notification>,
        _dispatcher: Dispatcher,
    }

    async fn loaded() -> Fixture {
        let (notifier, dispatcher) = Dispatcher::spawn();
        let (tx, rx) = mpsc::unbounded_channel();
        dispatcher.subscribe(move |n| {
            let _ = tx.send(n.clone());
        });
        let daemon = Arc::new(FakeDaemon::new());
        daemon.set_my_id("SELF-DEVICE");
        daemon.add_device("SELF-DEVICE", "this machine");
        daemon.add_device("AAAAAAA-BBBBBBB", "laptop");
        daemon.add_device("CCCCCCC-DDDDDDD", "");
        daemon.set_connection("AAAAAAA-BBBBBBB", true, Some("10.0.0.2:22000"));
        let session = SessionHandle::new().install(daemon.clone(), "http://fake");
        let manager = DeviceManager::new(notifier);
        let config = daemon.config_snapshot();
        manager
            .load(&session, &config, Some("SELF-DEVICE"))
            .await
            .unwrap();
        let mut fixture = Fixture {
            daemon,
            session,
            manager,
            rx,
            _dispatcher: dispatcher,
        };
        drain(&mut fixture.rx).await;
        fixture
    }

    async fn drain(rx: &mut mpsc::UnboundedReceiver<Notification>) -> Vec<Notification> {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let mut seen = Vec::new();
        while let Ok(n) = rx.try_recv() {
            seen.push(n);
        }
        seen
    }

    fn event(kind: EventKind) -> Event {
        Event {
            id: 1,
            time: None,
            kind,
        }
    }

    #[tokio::test]
    async fn load_excludes_own_device_and_merges_connections() {
        let f = loaded().await;
        let devices = f.manager.snapshots();
        assert_eq!(devices.len(), 2);
        assert!(f.manager.snapshot("SELF-DEVICE").is_none());

        let laptop = f.manager.snapshot("AAAAAAA-BBBBBBB").unwrap();
        assert!(laptop.connected);
        assert_eq!(laptop.address.as_deref(), Some("10.0.0.2:22000"));
        assert_eq!(f.manager.snapshot("CCCCCCC-DDDDDDD").unwrap().name, "CCCCCCC");
    }

    #[tokio::test]
    async fn connection_and_pause_events_notify_on_change() {
        let mut f = loaded().await;
        let m = &f.manager;
        m.handle_event(
            &f.session,
            &event(EventKind::DeviceConnected {
                device: "CCCCCCC-DDDDDDD".into(),
                address: Some("10.0.0.3:22000".into()),
            }),
        )
        .await;
        // Already connected: address refresh only.
        m.handle_event(
            &f.session,
            &event(EventKind::DeviceConnected {
                device: "CCCCCCC-DDDDDDD".into(),
                address: Some("10.0.0.4:22000".into()),
            }),
        )
        .await;
        m.handle_event(
            &f.session,
            &event(EventKind::DevicePaused {
                device: "AAAAAAA-BBBBBBB".into(),
            }),
        )
        .await;
        m.handle_event(
            &f.session,
            &event(EventKind::DeviceDisconnected {
                device: "AAAAAAA-BBBBBBB".into(),
                error: Some("EOF".into()),
            }),
        )
        .await;

        assert_eq!(
            m.snapshot("CCCCCCC-DDDDDDD").unwrap().address.as_deref(),
            Some("10.0.0.4:22000")
        );
        let laptop = m.snapshot("AAAAAAA-BBBBBBB").unwrap();
        assert!(laptop.paused);
        assert!(!laptop.connected);
        assert!(laptop.address.is_none());

        assert_eq!(
            drain(&mut f.rx).await,
            vec![
                Notification::DeviceConnectionChanged {
                    device_id: "CCCCCCC-DDDDDDD".into(),
                    connected: true
                },
                Notification::DevicePauseChanged {
                    device_id: "AAAAAAA-BBBBBBB".into(),
                    paused: true
                },
                Notification::DeviceConnectionChanged {
                    device_id: "AAAAAAA-BBBBBBB".into(),
                    connected: false
                },
            ]
        );
    }

    #[tokio::test]
    async fn rejected_device_is_published() {
        let mut f = loaded().await;
        f.manager
            .handle_event(
                &f.session,
                &event(EventKind::DeviceRejected {
                    device: "EEEEEEE".into(),
                    name: Some("stranger".into()),
                    address: None,
                }),
            )
            .await;
        assert_eq!(
            drain(&mut f.rx).await,
            vec![Notification::DeviceRejected {
                device_id: "EEEEEEE".into(),
                name: Some("stranger".into()),
                address: None,
            }]
        );
    }

    #[tokio::test]
    async fn resync_converges_onto_fresh_build() {
        let mut f = loaded().await;
        f.daemon
            .set_connection("CCCCCCC-DDDDDDD", true, Some("192.168.1.9:22000"));
        f.daemon.set_connection("AAAAAAA-BBBBBBB", false, None);
        f.manager.handle_events_skipped(&f.session).await;

        let (notifier, _dispatcher) = Dispatcher::spawn();
        let fresh = DeviceManager::new(notifier);
        fresh
            .load(&f.session, &f.daemon.config_snapshot(), Some("SELF-DEVICE"))
            .await
            .unwrap();
        assert_eq!(f.manager.snapshots(), fresh.snapshots());

        let seen = drain(&mut f.rx).await;
        assert!(!seen.contains(&Notification::DevicesChanged));
        assert_eq!(seen.len(), 2);
    }

    #[tokio::test]
    async fn new_device_in_config_replaces_collection() {
        let mut f = loaded().await;
        f.daemon.add_device("FFFFFFF", "phone");
        f.manager
            .handle_event(&f.session, &event(EventKind::ConfigSaved))
            .await;
        assert!(f.manager.snapshot("FFFFFFF").is_some());
        assert_eq!(drain(&mut f.rx).await, vec![Notification::DevicesChanged]);
    }
}
