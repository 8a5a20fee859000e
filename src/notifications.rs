//! Public notifications and their single dispatch task.
//!
//! Publishers push [`Notification`] values into one unbounded channel; a
//! single task drains it and calls every subscriber in turn, so subscribers
//! never run concurrently with each other and see notifications in publish
//! order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::lifecycle::LifecycleState;
use crate::mirror::FolderError;
use crate::supervisor::ExitStatus;
use crate::syncthing_client::{FolderStatus, SyncState};
use crate::watchers::ConnectionsSnapshot;

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    StateChanged {
        old: LifecycleState,
        new: LifecycleState,
    },
    /// One line of daemon stdout/stderr.
    MessageLogged(String),
    ConnectionStatsChanged(ConnectionsSnapshot),
    /// The folder collection was replaced as a whole.
    FoldersChanged,
    /// The device collection was replaced as a whole.
    DevicesChanged,
    FolderSyncStateChanged {
        folder_id: String,
        old: SyncState,
        new: SyncState,
    },
    FolderStatusChanged {
        folder_id: String,
        status: FolderStatus,
    },
    FolderErrorsChanged {
        folder_id: String,
        errors: Vec<FolderError>,
    },
    FolderRejected {
        device_id: String,
        folder_id: String,
        folder_label: Option<String>,
    },
    DeviceRejected {
        device_id: String,
        name: Option<String>,
        address: Option<String>,
    },
    DeviceConnectionChanged {
        device_id: String,
        connected: bool,
    },
    DevicePauseChanged {
        device_id: String,
        paused: bool,
    },
    /// Folders and devices were loaded for the current session.
    DataLoaded,
    ProcessExitedWithError(ExitStatus),
}

pub type Subscriber = Arc<dyn Fn(&Notification) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Cheap, cloneable publishing side.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl Notifier {
    pub fn publish(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            trace!("Notification dropped, dispatcher is gone");
        }
    }
}

type SubscriberList = Arc<RwLock<Vec<(SubscriptionId, Subscriber)>>>;

/// Owns the subscriber list and the dispatch task.
pub struct Dispatcher {
    subscribers: SubscriberList,
    next_id: AtomicU64,
    task: JoinHandle<()>,
}

impl Dispatcher {
    /// Creates the channel and spawns the dispatch loop on the current runtime.
    pub fn spawn() -> (Notifier, Dispatcher) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscribers: SubscriberList = Arc::new(RwLock::new(Vec::new()));
        let task = tokio::spawn(dispatch_loop(rx, Arc::clone(&subscribers)));
        (
            Notifier { tx },
            Dispatcher {
                subscribers,
                next_id: AtomicU64::new(1),
                task,
            },
        )
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        subscribers.len() != before
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn dispatch_loop(mut rx: mpsc::UnboundedReceiver<Notification>, subscribers: SubscriberList) {
    while let Some(notification) = rx.recv().await {
        // Snapshot so callbacks may (un)subscribe without deadlocking.
        let current: Vec<Subscriber> = subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, subscriber)| Arc::clone(subscriber))
            .collect();
        for subscriber in current {
            subscriber(&notification);
        }
    }
}
