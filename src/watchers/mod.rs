mod connections_watcher;
mod event_watcher;

pub use connections_watcher::{
    ConnectionStats, ConnectionsSample, ConnectionsSnapshot, ConnectionsWatcher,
    ThroughputTracker, MIN_SAMPLE_SPACING,
};
pub use event_watcher::{EventHandler, EventWatcher};
