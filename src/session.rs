//! The swappable "current API session".
//!
//! The manager is the only writer; pollers and mirrors only ever read. Each
//! installed session opens a new epoch with its own cancellation token, and
//! clearing the handle cancels that token so in-flight calls made through the
//! old session are abandoned.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::syncthing_client::DaemonApi;

#[derive(Clone)]
pub struct Session {
    api: Arc<dyn DaemonApi>,
    base_url: String,
    generation: u64,
    cancel: CancellationToken,
}

impl Session {
    pub fn api(&self) -> &dyn DaemonApi {
        self.api.as_ref()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Token cancelled when this session's epoch ends.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_expired(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("base_url", &self.base_url)
            .field("generation", &self.generation)
            .field("expired", &self.is_expired())
            .finish()
    }
}

#[derive(Default)]
pub struct SessionHandle {
    current: RwLock<Option<Session>>,
    generation: AtomicU64,
}

impl SessionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// The live session, if any. Never returns an expired one.
    pub fn current(&self) -> Option<Session> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        guard.as_ref().filter(|s| !s.is_expired()).cloned()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Replaces whatever is installed with a new session. The previous one is
    /// cleared (and its epoch cancelled) before the new one becomes visible.
    pub fn install(&self, api: Arc<dyn DaemonApi>, base_url: &str) -> Session {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = guard.take() {
            previous.cancel.cancel();
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let session = Session {
            api,
            base_url: base_url.to_string(),
            generation,
            cancel: CancellationToken::new(),
        };
        *guard = Some(session.clone());
        debug!(generation, base_url, "Installed API session");
        session
    }

    /// Drops the current session and cancels its epoch.
    pub fn clear(&self) -> Option<Session> {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        let previous = guard.take();
        if let Some(session) = &previous {
            session.cancel.cancel();
            debug!(generation = session.generation, "Cleared API session");
        }
        previous
    }

    pub fn is_current(&self, session: &Session) -> bool {
        self.current()
            .map(|current| current.generation == session.generation)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_harness::FakeDaemon;

    #[test]
    fn install_and_clear_manage_epochs() {
        let handle = SessionHandle::new();
        assert!(handle.current().is_none());

        let first = handle.install(Arc::new(FakeDaemon::new()), "http://127.0.0.1:8384");
        assert_eq!(first.generation(), 1);
        assert!(handle.is_current(&first));

        let second = handle.install(Arc::new(FakeDaemon::new()), "http://127.0.0.1:8385");
        assert!(first.is_expired());
        assert!(!handle.is_current(&first));
        assert_eq!(second.generation(), 2);

        let cleared = handle.clear().unwrap();
        assert_eq!(cleared.generation(), 2);
        assert!(second.is_expired());
        assert!(handle.current().is_none());
        assert!(handle.clear().is_none());
    }

    #[test]
    fn readers_see_whole_sessions_under_contention() {
        let handle = Arc::new(SessionHandle::new());
        let writer = {
            let handle = Arc::clone(&handle);
            std::thread::spawn(move || {
                for _ in 0..200 {
                    handle.install(Arc::new(FakeDaemon::new()), "http://127.0.0.1:8384");
                    handle.clear();
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let handle = Arc::clone(&handle);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        if let Some(session) = handle.current() {
                            assert!(session.generation() >= 1);
                            assert_eq!(session.base_url(), "http://127.0.0.1:8384");
                        }
                    }
                })
            })
            .collect();
        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert!(handle.current().is_none());
        assert_eq!(handle.generation(), 200);
    }
}
