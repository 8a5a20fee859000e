use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tracing::trace;

use crate::error::ManagerError;
use crate::notifications::{Notification, Notifier};
use crate::poller::Poll;
use crate::session::Session;
use crate::syncthing_client::api::{ConnectionTotals, ConnectionsResponse};

/// Samples closer together than this are dropped.
pub const MIN_SAMPLE_SPACING: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ConnectionStats {
    pub in_bytes_total: u64,
    pub out_bytes_total: u64,
    pub in_bytes_per_second: f64,
    pub out_bytes_per_second: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionsSnapshot {
    pub total: ConnectionStats,
    pub devices: HashMap<String, ConnectionStats>,
}

/// Raw cumulative counters from one `/rest/system/connections` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionsSample {
    pub total: ConnectionTotals,
    pub devices: HashMap<String, ConnectionTotals>,
}

impl From<ConnectionsResponse> for ConnectionsSample {
    fn from(response: ConnectionsResponse) -> Self {
        let devices = response
            .connections
            .into_iter()
            .map(|(id, state)| {
                (
                    id,
                    ConnectionTotals {
                        in_bytes_total: state.in_bytes_total,
                        out_bytes_total: state.out_bytes_total,
                    },
                )
            })
            .collect();
        Self {
            total: response.total,
            devices,
        }
    }
}

/// Turns successive counter samples into rates.
#[derive(Debug, Default)]
pub struct ThroughputTracker {
    previous: Option<(ConnectionsSample, Instant)>,
    idle_reported: bool,
}

impl ThroughputTracker {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Feeds one sample taken at `at`; returns a snapshot when subscribers
    /// should hear about it.
    pub fn observe(&mut self, sample: ConnectionsSample, at: Instant) -> Option<ConnectionsSnapshot> {
        let Some((previous, previous_at)) = self.previous.take() else {
            self.previous = Some((sample, at));
            return None;
        };

        let elapsed = at.saturating_duration_since(previous_at);
        if elapsed < MIN_SAMPLE_SPACING {
            self.previous = Some((previous, previous_at));
            return None;
        }

        let snapshot = if sample.total != previous.total {
            self.idle_reported = false;
            let seconds = elapsed.as_secs_f64();
            let devices = sample
                .devices
                .iter()
                .map(|(id, now)| {
                    let stats = match previous.devices.get(id) {
                        Some(before) => rate(before, now, seconds),
                        None => at_rest(now),
                    };
                    (id.clone(), stats)
                })
                .collect();
            Some(ConnectionsSnapshot {
                total: rate(&previous.total, &sample.total, seconds),
                devices,
            })
        } else if !self.idle_reported {
            self.idle_reported = true;
            Some(ConnectionsSnapshot {
                total: at_rest(&sample.total),
                devices: sample
                    .devices
                    .iter()
                    .map(|(id, totals)| (id.clone(), at_rest(totals)))
                    .collect(),
            })
        } else {
            None
        };

        self.previous = Some((sample, at));
        snapshot
    }
}

fn rate(before: &ConnectionTotals, now: &ConnectionTotals, seconds: f64) -> ConnectionStats {
    // Counters restart from zero with the daemon.
    let delta_in = now.in_bytes_total.saturating_sub(before.in_bytes_total);
    let delta_out = now.out_bytes_total.saturating_sub(before.out_bytes_total);
    ConnectionStats {
        in_bytes_total: now.in_bytes_total,
        out_bytes_total: now.out_bytes_total,
        in_bytes_per_second: delta_in as f64 / seconds,
        out_bytes_per_second: delta_out as f64 / seconds,
    }
}

fn at_rest(totals: &ConnectionTotals) -> ConnectionStats {
    ConnectionStats {
        in_bytes_total: totals.in_bytes_total,
        out_bytes_total: totals.out_bytes_total,
        in_bytes_per_second: 0.0,
        out_bytes_per_second: 0.0,
    }
}

/// Periodically samples connection counters and publishes throughput.
pub struct ConnectionsWatcher {
    tracker: Mutex<ThroughputTracker>,
    latest: RwLock<Option<ConnectionsSnapshot>>,
    notifier: Notifier,
}

impl ConnectionsWatcher {
    pub fn new(notifier: Notifier) -> Self {
        Self {
            tracker: Mutex::new(ThroughputTracker::default()),
            latest: RwLock::new(None),
            notifier,
        }
    }

    /// Most recently published snapshot.
    pub fn latest(&self) -> Option<ConnectionsSnapshot> {
        self.latest
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn clear(&self) {
        *self.latest.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

#[async_trait]
impl Poll for ConnectionsWatcher {
    fn name(&self) -> &'static str {
        "connections-watcher"
    }

    fn on_start(&self) {
        self.tracker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .reset();
    }

    async fn poll_once(&self, session: &Session) -> Result<(), ManagerError> {
        let response = session.api().connections().await?;
        let sample = ConnectionsSample::from(response);
        let snapshot = self
            .tracker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .observe(sample, Instant::now());

        if let Some(snapshot) = snapshot {
            trace!(
                in_rate = snapshot.total.in_bytes_per_second,
                out_rate = snapshot.total.out_bytes_per_second,
                "Connection throughput updated"
            );
            *self.latest.write().unwrap_or_else(|e| e.into_inner()) = Some(snapshot.clone());
            self.notifier
                .publish(Notification::ConnectionStatsChanged(snapshot));
        }
        Ok(())
    }
}
