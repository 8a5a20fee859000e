use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::error::ManagerError;
use crate::notifications::{Notification, Notifier};
use crate::session::Session;
use crate::syncthing_client::api::{FolderConfig, FolderErrorEntry, SyncthingConfig};
use crate::syncthing_client::{Event, EventKind, FolderStatus, SyncState};
use crate::watchers::EventHandler;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderError {
    pub path: String,
    pub error: String,
}

impl From<FolderErrorEntry> for FolderError {
    fn from(entry: FolderErrorEntry) -> Self {
        Self {
            path: entry.path,
            error: entry.error,
        }
    }
}

/// Ignore patterns of a folder. `valid` is false while they are unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FolderIgnores {
    pub patterns: Vec<String>,
    pub valid: bool,
}

impl FolderIgnores {
    fn invalid() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FolderSnapshot {
    pub id: String,
    pub label: String,
    pub path: String,
    pub sync_state: SyncState,
    pub status: FolderStatus,
    pub ignores: FolderIgnores,
    pub syncing_paths: BTreeSet<String>,
    pub errors: Vec<FolderError>,
}

#[derive(Debug, Clone, Default)]
struct FolderState {
    sync_state: SyncState,
    status: FolderStatus,
    ignores: FolderIgnores,
    syncing_paths: BTreeSet<String>,
    errors: Vec<FolderError>,
}

/// One mirrored folder. Identity is fixed for the entry's lifetime; a change
/// of label or path replaces the entry.
#[derive(Debug)]
pub struct Folder {
    id: String,
    label: String,
    path: String,
    state: Mutex<FolderState>,
}

impl Folder {
    fn new(config: &FolderConfig, state: FolderState) -> Self {
        Self {
            id: config.id.clone(),
            label: config
                .label
                .clone()
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| config.id.clone()),
            path: config.path.clone().unwrap_or_default(),
            state: Mutex::new(state),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn sync_state(&self) -> SyncState {
        self.lock().sync_state
    }

    pub fn snapshot(&self) -> FolderSnapshot {
        let state = self.lock();
        FolderSnapshot {
            id: self.id.clone(),
            label: self.label.clone(),
            path: self.path.clone(),
            sync_state: state.sync_state,
            status: state.status.clone(),
            ignores: state.ignores.clone(),
            syncing_paths: state.syncing_paths.clone(),
            errors: state.errors.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FolderState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn identity(&self) -> (&str, &str, &str) {
        (&self.id, &self.label, &self.path)
    }
}

type FolderMap = HashMap<String, Arc<Folder>>;

/// What a sync state change requires from the ignore patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IgnoresAction {
    None,
    Reload,
}

/// Mirror of the daemon's folders for the current session.
pub struct FolderManager {
    folders: RwLock<Arc<FolderMap>>,
    notifier: Notifier,
    resync: tokio::sync::Mutex<()>,
}

impl FolderManager {
    pub fn new(notifier: Notifier) -> Self {
        Self {
            folders: RwLock::new(Arc::new(HashMap::new())),
            notifier,
            resync: tokio::sync::Mutex::new(()),
        }
    }

    /// The current generation of the collection.
    pub fn collection(&self) -> Arc<HashMap<String, Arc<Folder>>> {
        Arc::clone(&self.folders.read().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn get(&self, folder_id: &str) -> Option<Arc<Folder>> {
        self.collection().get(folder_id).cloned()
    }

    pub fn snapshot(&self, folder_id: &str) -> Option<FolderSnapshot> {
        self.get(folder_id).map(|folder| folder.snapshot())
    }

    /// Every folder, ordered by id.
    pub fn snapshots(&self) -> Vec<FolderSnapshot> {
        let collection = self.collection();
        let mut folders: Vec<FolderSnapshot> =
            collection.values().map(|folder| folder.snapshot()).collect();
        folders.sort_by(|a, b| a.id.cmp(&b.id));
        folders
    }

    /// Builds the collection from `config` and installs it as a whole.
    pub async fn load(&self, session: &Session, config: &SyncthingConfig) -> Result<(), ManagerError> {
        let _guard = self.resync.lock().await;
        let fresh = build_generation(session, config).await?;
        debug!(folders = fresh.len(), "Folder mirror loaded");
        self.install(fresh);
        Ok(())
    }

    /// Drops every folder, e.g. when the session ends.
    pub fn clear(&self) {
        let had_folders = !self.collection().is_empty();
        self.install_quietly(HashMap::new());
        if had_folders {
            self.notifier.publish(Notification::FoldersChanged);
        }
    }

    /// Re-reads config and statuses and converges the mirror onto them.
    pub async fn resync(&self, session: &Session) -> Result<(), ManagerError> {
        let _guard = self.resync.lock().await;
        let config = session.api().config().await?;
        let fresh = build_generation(session, &config).await?;
        let current = self.collection();

        if !same_identities(&current, &fresh) {
            debug!(folders = fresh.len(), "Folder set changed, replacing collection");
            self.install(fresh);
            return Ok(());
        }

        for (id, fresh_folder) in fresh.iter() {
            let Some(existing) = current.get(id) else {
                continue;
            };
            let target = fresh_folder.lock().clone();
            self.converge(existing, target);
        }
        trace!("Folder mirror resynced in place");
        Ok(())
    }

    fn install(&self, folders: FolderMap) {
        self.install_quietly(folders);
        self.notifier.publish(Notification::FoldersChanged);
    }

    fn install_quietly(&self, folders: FolderMap) {
        *self.folders.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(folders);
    }

    /// Brings `folder` to `target` through the per-field update paths.
    fn converge(&self, folder: &Folder, target: FolderState) {
        self.update_sync_state(folder, target.sync_state);
        self.update_status(folder, target.status);
        self.update_errors(folder, target.errors);
        let mut state = folder.lock();
        state.syncing_paths = target.syncing_paths;
        state.ignores = target.ignores;
    }

    fn update_sync_state(&self, folder: &Folder, new: SyncState) -> IgnoresAction {
        let mut state = folder.lock();
        let old = state.sync_state;
        if old == new {
            return IgnoresAction::None;
        }
        state.sync_state = new;
        if new == SyncState::Idle {
            state.syncing_paths.clear();
        }
        let action = if new.is_error() {
            state.ignores = FolderIgnores::invalid();
            IgnoresAction::None
        } else if old.is_error() {
            IgnoresAction::Reload
        } else {
            IgnoresAction::None
        };
        trace!(folder = %folder.id, from = old.label(), to = new.label(), "Folder state changed");
        self.notifier.publish(Notification::FolderSyncStateChanged {
            folder_id: folder.id.clone(),
            old,
            new,
        });
        action
    }

    fn update_status(&self, folder: &Folder, status: FolderStatus) {
        let mut state = folder.lock();
        if state.status == status {
            return;
        }
        state.status = status.clone();
        self.notifier.publish(Notification::FolderStatusChanged {
            folder_id: folder.id.clone(),
            status,
        });
    }

    fn update_errors(&self, folder: &Folder, errors: Vec<FolderError>) {
        let mut state = folder.lock();
        if state.errors == errors {
            return;
        }
        state.errors = errors.clone();
        self.notifier.publish(Notification::FolderErrorsChanged {
            folder_id: folder.id.clone(),
            errors,
        });
    }

    /// Refreshes one folder's ignore patterns unless it is in error.
    pub async fn reload_ignores(&self, session: &Session, folder_id: &str) -> Result<(), ManagerError> {
        let Some(folder) = self.get(folder_id) else {
            return Err(ManagerError::Syncthing(format!("unknown folder {folder_id}")));
        };
        if folder.sync_state().is_error() {
            return Ok(());
        }
        let ignores = fetch_ignores(session, folder_id).await?;
        let mut state = folder.lock();
        // The folder may have failed while the request was in flight.
        if !state.sync_state.is_error() {
            state.ignores = ignores;
        }
        Ok(())
    }

    async fn apply(&self, session: &Session, event: &Event) -> Result<(), ManagerError> {
        match &event.kind {
            EventKind::StateChanged { folder, to, .. } => {
                let Some(entry) = self.get(folder) else {
                    return Ok(());
                };
                if self.update_sync_state(&entry, *to) == IgnoresAction::Reload {
                    self.reload_ignores(session, folder).await?;
                }
            }
            EventKind::ItemStarted { folder, item, .. } => {
                if let Some(entry) = self.get(folder) {
                    entry.lock().syncing_paths.insert(item.clone());
                }
            }
            EventKind::ItemFinished {
                folder, item, error, ..
            } => {
                if let Some(entry) = self.get(folder) {
                    entry.lock().syncing_paths.remove(item);
                    if let Some(error) = error {
                        debug!(folder = %folder, item = %item, error = %error, "Item failed to sync");
                    }
                }
            }
            EventKind::FolderErrors { folder, errors } => {
                if let Some(entry) = self.get(folder) {
                    let errors = errors.iter().cloned().map(FolderError::from).collect();
                    self.update_errors(&entry, errors);
                }
            }
            EventKind::FolderSummary { folder, summary } => {
                if let Some(entry) = self.get(folder) {
                    self.update_status(&entry, summary.clone());
                }
            }
            EventKind::FolderRejected {
                device,
                folder,
                folder_label,
            } => {
                self.notifier.publish(Notification::FolderRejected {
                    device_id: device.clone(),
                    folder_id: folder.clone(),
                    folder_label: folder_label.clone(),
                });
            }
            EventKind::ConfigSaved => self.resync(session).await?,
            EventKind::DeviceConnected { .. }
            | EventKind::DeviceDisconnected { .. }
            | EventKind::DeviceRejected { .. }
            | EventKind::DevicePaused { .. }
            | EventKind::DeviceResumed { .. }
            | EventKind::StartupComplete { .. }
            | EventKind::Unknown { .. } => {}
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler for FolderManager {
    async fn handle_event(&self, session: &Session, event: &Event) {
        if let Err(err) = self.apply(session, event).await {
            warn!(event = event.kind.name(), error = %err, "Failed to apply folder event");
        }
    }

    async fn handle_events_skipped(&self, session: &Session) {
        if let Err(err) = self.resync(session).await {
            warn!(error = %err, "Folder resync after skipped events failed");
        }
    }
}

async fn build_generation(session: &Session, config: &SyncthingConfig) -> Result<FolderMap, ManagerError> {
    let mut folders = HashMap::with_capacity(config.folders.len());
    for folder_config in &config.folders {
        let status = match session.api().folder_status(&folder_config.id).await {
            Ok(status) => status,
            Err(err) if err.is_transient() => return Err(err),
            Err(err) => {
                warn!(folder = %folder_config.id, error = %err, "Failed to load folder status");
                FolderStatus::default()
            }
        };
        let sync_state = status.sync_state();
        let ignores = if sync_state.is_error() {
            FolderIgnores::invalid()
        } else {
            fetch_ignores(session, &folder_config.id).await?
        };
        let state = FolderState {
            sync_state,
            status,
            ignores,
            ..FolderState::default()
        };
        folders.insert(
            folder_config.id.clone(),
            Arc::new(Folder::new(folder_config, state)),
        );
    }
    Ok(folders)
}

async fn fetch_ignores(session: &Session, folder_id: &str) -> Result<FolderIgnores, ManagerError> {
    let response = session.api().folder_ignores(folder_id).await?;
    Ok(FolderIgnores {
        patterns: response.ignore.unwrap_or_default(),
        valid: true,
    })
}

fn same_identities(current: &FolderMap, fresh: &FolderMap) -> bool {
    current.len() == fresh.len()
        && fresh.iter().all(|(id, folder)| {
            current
                .get(id)
                .is_some_and(|existing| existing.identity() == folder.identity())
        })
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
        manager: FolderManager,
        rx: mpsc::UnboundedReceiver<Notification>,
        _dispatcher: Dispatcher,
    }

    fn fixture() -> Fixture {
        let (notifier, dispatcher) = Dispatcher::spawn();
        let (tx, rx) = mpsc::unbounded_channel();
        dispatcher.subscribe(move |n| {
            let _ = tx.send(n.clone());
        });
        let daemon = Arc::new(FakeDaemon::new());
        daemon.add_folder("docs", "Documents", "/home/docs", "idle");
        daemon.add_folder("pics", "Pictures", "/home/pics", "idle");
        daemon.set_ignores("docs", &["*.tmp"]);
        let session = SessionHandle::new().install(daemon.clone(), "http://fake");
        Fixture {
            daemon,
            session,
            manager: FolderManager::new(notifier),
            rx,
            _dispatcher: dispatcher,
        }
    }

    fn event(kind: EventKind) -> Event {
        Event {
            id: 1,
            time: None,
            kind,
        }
    }

    async fn drain(rx: &mut mpsc::UnboundedReceiver<Notification>) -> Vec<Notification> {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let mut seen = Vec::new();
        while let Ok(n) = rx.try_recv() {
            seen.push(n);
        }
        seen
    }

    async fn loaded() -> Fixture {
        let mut f = fixture();
        let config = f.daemon.config_snapshot();
        f.manager.load(&f.session, &config).await.unwrap();
        drain(&mut f.rx).await;
        f
    }

    #[tokio::test]
    async fn load_builds_entries_with_status_and_ignores() {
        let f = loaded().await;
        let docs = f.manager.snapshot("docs").unwrap();
        assert_eq!(docs.label, "Documents");
        assert_eq!(docs.path, "/home/docs");
        assert_eq!(docs.sync_state, SyncState::Idle);
        assert_eq!(
            docs.ignores,
            FolderIgnores {
                patterns: vec!["*.tmp".to_string()],
                valid: true
            }
        );
        assert_eq!(f.manager.snapshots().len(), 2);
    }

    #[tokio::test]
    async fn ignores_are_not_loaded_for_errored_folders() {
        let mut f = fixture();
        f.daemon.add_folder("broken", "Broken", "/x", "error");
        let config = f.daemon.config_snapshot();
        f.manager.load(&f.session, &config).await.unwrap();
        assert_eq!(f.daemon.calls("folder_ignores:broken"), 0);
        assert!(!f.manager.snapshot("broken").unwrap().ignores.valid);
        drain(&mut f.rx).await;
    }

    #[tokio::test]
    async fn state_changes_drive_ignores_and_syncing_paths() {
        let mut f = loaded().await;
        let m = &f.manager;

        m.handle_event(
            &f.session,
            &event(EventKind::ItemStarted {
                folder: "docs".into(),
                item: "a.txt".into(),
                item_type: "file".into(),
                action: "update".into(),
            }),
        )
        .await;
        assert!(m.snapshot("docs").unwrap().syncing_paths.contains("a.txt"));

        m.handle_event(
            &f.session,
            &event(EventKind::StateChanged {
                folder: "docs".into(),
                from: SyncState::Idle,
                to: SyncState::Error,
            }),
        )
        .await;
        assert!(!m.snapshot("docs").unwrap().ignores.valid);

        f.daemon.set_ignores("docs", &["*.bak"]);
        m.handle_event(
            &f.session,
            &event(EventKind::StateChanged {
                folder: "docs".into(),
                from: SyncState::Error,
                to: SyncState::Idle,
            }),
        )
        .await;
        let docs = m.snapshot("docs").unwrap();
        assert_eq!(docs.ignores.patterns, vec!["*.bak".to_string()]);
        assert!(docs.ignores.valid);
        assert!(docs.syncing_paths.is_empty());

        let seen = drain(&mut f.rx).await;
        assert_eq!(
            seen,
            vec![
                Notification::FolderSyncStateChanged {
                    folder_id: "docs".into(),
                    old: SyncState::Idle,
                    new: SyncState::Error
                },
                Notification::FolderSyncStateChanged {
                    folder_id: "docs".into(),
                    old: SyncState::Error,
                    new: SyncState::Idle
                },
            ]
        );
    }

    #[tokio::test]
    async fn unknown_folder_ids_are_ignored() {
        let mut f = loaded().await;
        f.manager
            .handle_event(
                &f.session,
                &event(EventKind::StateChanged {
                    folder: "nope".into(),
                    from: SyncState::Idle,
                    to: SyncState::Scanning,
                }),
            )
            .await;
        assert!(drain(&mut f.rx).await.is_empty());
    }

    #[tokio::test]
    async fn folder_errors_and_rejections_are_published() {
        let mut f = loaded().await;
        f.manager
            .handle_event(
                &f.session,
                &event(EventKind::FolderErrors {
                    folder: "pics".into(),
                    errors: vec![FolderErrorEntry {
                        path: "x.jpg".into(),
                        error: "permission denied".into(),
                    }],
                }),
            )
            .await;
        f.manager
            .handle_event(
                &f.session,
                &event(EventKind::FolderRejected {
                    device: "DEV-B".into(),
                    folder: "shared".into(),
                    folder_label: Some("Shared".into()),
                }),
            )
            .await;

        assert_eq!(f.manager.snapshot("pics").unwrap().errors.len(), 1);
        let seen = drain(&mut f.rx).await;
        assert!(matches!(seen[0], Notification::FolderErrorsChanged { .. }));
        assert_eq!(
            seen[1],
            Notification::FolderRejected {
                device_id: "DEV-B".into(),
                folder_id: "shared".into(),
                folder_label: Some("Shared".into()),
            }
        );
    }

    #[tokio::test]
    async fn resync_in_place_converges_and_notifies_per_entry() {
        let mut f = loaded().await;
        let before = f.manager.collection();

        f.manager
            .handle_event(
                &f.session,
                &event(EventKind::ItemStarted {
                    folder: "docs".into(),
                    item: "stale.txt".into(),
                    item_type: "file".into(),
                    action: "update".into(),
                }),
            )
            .await;
        f.daemon.set_folder_status(
            "pics",
            FolderStatus {
                state: "syncing".into(),
                need_bytes: 10,
                global_bytes: 100,
                ..FolderStatus::default()
            },
        );

        f.manager.handle_events_skipped(&f.session).await;

        // Same identities, so the entries are updated rather than replaced.
        assert!(Arc::ptr_eq(
            &before["docs"],
            &f.manager.collection()["docs"]
        ));

        let (notifier, _dispatcher) = Dispatcher::spawn();
        let config = f.daemon.config_snapshot();
        let fresh = FolderManager::new(notifier);
        fresh.load(&f.session, &config).await.unwrap();
        assert_eq!(f.manager.snapshots(), fresh.snapshots());

        let seen = drain(&mut f.rx).await;
        assert!(!seen.contains(&Notification::FoldersChanged));
        assert_eq!(
            seen.iter()
                .filter(|n| matches!(n, Notification::FolderSyncStateChanged { .. }))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn config_change_replaces_collection() {
        let mut f = loaded().await;
        f.daemon.add_folder("music", "Music", "/home/music", "scanning");
        f.manager
            .handle_event(&f.session, &event(EventKind::ConfigSaved))
            .await;

        assert_eq!(f.manager.snapshots().len(), 3);
        assert_eq!(
            f.manager.snapshot("music").unwrap().sync_state,
            SyncState::Scanning
        );
        assert_eq!(drain(&mut f.rx).await, vec![Notification::FoldersChanged]);

        f.daemon.remove_folder("music");
        f.daemon.add_folder("docs", "Docs renamed", "/home/docs", "idle");
        f.manager.resync(&f.session).await.unwrap();
        assert_eq!(f.manager.snapshot("docs").unwrap().label, "Docs renamed");
        assert!(f.manager.snapshot("music").is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn readers_never_see_mixed_generations() {
        let f = loaded().await;
        let manager = Arc::new(f.manager);
        for id in ["docs", "pics", "music"] {
            f.daemon.add_folder(id, &format!("gen0:{id}"), "/p", "idle");
        }
        let config = f.daemon.config_snapshot();
        manager.load(&f.session, &config).await.unwrap();
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let readers: Vec<_> = (0..3)
            .map(|_| {
                let manager = Arc::clone(&manager);
                let stop = Arc::clone(&stop);
                tokio::task::spawn_blocking(move || {
                    let mut observed = 0usize;
                    while !stop.load(std::sync::atomic::Ordering::SeqCst) {
                        let collection = manager.collection();
                        let labels: BTreeSet<&str> = collection
                            .values()
                            .map(|folder| folder.label().split(':').next().unwrap_or(""))
                            .collect();
                        assert!(labels.len() <= 1, "mixed generation: {labels:?}");
                        observed += 1;
                    }
                    observed
                })
            })
            .collect();

        for generation in 1..50 {
            for id in ["docs", "pics", "music"] {
                f.daemon
                    .add_folder(id, &format!("gen{generation}:{id}"), "/p", "idle");
            }
            let config = f.daemon.config_snapshot();
            manager.load(&f.session, &config).await.unwrap();
        }
        stop.store(true, std::sync::atomic::Ordering::SeqCst);

        for reader in readers {
            assert!(reader.await.unwrap() > 0);
        }
    }
}
