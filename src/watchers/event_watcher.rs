use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace, warn};

use crate::error::ManagerError;
use crate::poller::Poll;
use crate::session::Session;
use crate::syncthing_client::Event;

/// Receives decoded events in the order the watcher fetched them.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, session: &Session, event: &Event);

    /// The log could not supply a contiguous range since the cursor; any state
    /// derived from earlier events must be treated as unknown.
    async fn handle_events_skipped(&self, session: &Session);
}

#[derive(Debug, Default, Clone, Copy)]
struct Cursor {
    last_seen: u64,
    baselined: bool,
}

/// Drains `/rest/events` and fans events out to its handlers.
pub struct EventWatcher {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
    long_poll: Duration,
    cursor: Mutex<Cursor>,
}

impl EventWatcher {
    pub fn new(long_poll: Duration) -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            long_poll,
            cursor: Mutex::new(Cursor::default()),
        }
    }

    pub fn add_handler(&self, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(handler);
    }

    /// Id of the last event seen, 0 before the baseline is established.
    pub fn cursor(&self) -> u64 {
        self.cursor.lock().unwrap_or_else(|e| e.into_inner()).last_seen
    }

    fn handlers(&self) -> Vec<Arc<dyn EventHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn load_cursor(&self) -> Cursor {
        *self.cursor.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn advance_cursor(&self, seen: impl IntoIterator<Item = u64>) -> u64 {
        let mut cursor = self.cursor.lock().unwrap_or_else(|e| e.into_inner());
        cursor.baselined = true;
        for id in seen {
            cursor.last_seen = cursor.last_seen.max(id);
        }
        cursor.last_seen
    }
}

#[async_trait]
impl Poll for EventWatcher {
    fn name(&self) -> &'static str {
        "event-watcher"
    }

    fn on_start(&self) {
        // New session, new event id space.
        *self.cursor.lock().unwrap_or_else(|e| e.into_inner()) = Cursor::default();
    }

    async fn poll_once(&self, session: &Session) -> Result<(), ManagerError> {
        let cursor = self.load_cursor();

        if !cursor.baselined {
            let latest = session.api().events(0, Some(1), None).await?;
            let baseline = self.advance_cursor(latest.iter().map(|e| e.id));
            debug!(cursor = baseline, "Event cursor baseline established");
            return Ok(());
        }

        let raw = session
            .api()
            .events(cursor.last_seen, None, Some(self.long_poll))
            .await?;
        if raw.is_empty() {
            return Ok(());
        }

        let ids: Vec<u64> = raw.iter().map(|e| e.id).collect();
        let contiguous = is_contiguous(cursor.last_seen, &ids);
        let advanced = self.advance_cursor(ids.iter().copied());
        let handlers = self.handlers();

        if !contiguous {
            warn!(
                since = cursor.last_seen,
                cursor = advanced,
                received = ids.len(),
                "Event log discontinuity, requesting full resync"
            );
            for handler in &handlers {
                handler.handle_events_skipped(session).await;
            }
            return Ok(());
        }

        for raw_event in raw {
            let event = Event::decode(raw_event);
            trace!(id = event.id, kind = event.kind.name(), "Dispatching event");
            for handler in &handlers {
                handler.handle_event(session, &event).await;
            }
        }
        Ok(())
    }
}

/// True when `ids` are exactly `since+1 ..= since+len`, in any order.
pub(crate) fn is_contiguous(since: u64, ids: &[u64]) -> bool {
    if ids.is_empty() {
        return true;
    }
    let mut sorted = ids.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    if sorted.len() != ids.len() {
        return false;
    }
    let expected_last = since.saturating_add(ids.len() as u64);
    sorted[0] == since.saturating_add(1) && sorted[sorted.len() - 1] == expected_last
}
