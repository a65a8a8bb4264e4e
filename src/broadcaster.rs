//! ==============================================================================
//! broadcaster.rs - polling loop
//! ==============================================================================
//!
//! purpose:
//!     once per interval, snapshot the registry grouped by sensor, ask the
//!     store for each distinct sensor ONCE, and push the result to every
//!     connection subscribed to it.
//!
//! cycle rules:
//!     - not found: nothing is pushed for that sensor this cycle
//!     - store error: logged, subscribers get an advisory notice, the cycle
//!       moves on to the other sensors
//!     - push returns gone: the connection is pruned on the spot, so it is
//!       out of the registry before the next snapshot
//!
//! scheduling:
//!     cycles never overlap. the loop awaits each cycle before the next tick
//!     and ticks missed while a slow cycle was running are skipped.
//!
//! ==============================================================================

use crate::domain::{ConnectionId, SensorId, ServerMessage};
use crate::error::ConnectionGone;
use crate::gateway::Gateway;
use crate::store::ReadingStore;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct BroadcasterSettings {
    pub interval: Duration,
    /// upper bound on store lookups in flight within one cycle
    pub max_concurrent_lookups: usize,
    /// log every reading that goes out
    pub show_sensor_data: bool,
}

impl Default for BroadcasterSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(3000),
            max_concurrent_lookups: 16,
            show_sensor_data: false,
        }
    }
}

/// what one cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// distinct sensors in the snapshot (= store lookups issued)
    pub sensors: usize,
    /// reading messages handed to live connections
    pub delivered: usize,
    pub not_found: usize,
    pub store_failures: usize,
    /// connections removed because their push came back gone
    pub pruned: usize,
}

pub struct Broadcaster {
    gateway: Arc<Gateway>,
    store: Arc<dyn ReadingStore>,
    settings: BroadcasterSettings,
}

impl Broadcaster {
    pub fn new(gateway: Arc<Gateway>, store: Arc<dyn ReadingStore>, settings: BroadcasterSettings) -> Self {
        Self {
            gateway,
            store,
            settings,
        }
    }

    /// run cycles every interval until `shutdown` flips to true or its sender is dropped.
    /// an in-flight cycle is abandoned at its next await point.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("broadcaster started ({:?} interval)", self.settings.interval);

        loop {
            tokio::select! {
                biased;

                _ = stopped(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                biased;

                _ = stopped(&mut shutdown) => break,
                report = self.run_cycle() => {
                    debug!(
                        sensors = report.sensors,
                        delivered = report.delivered,
                        not_found = report.not_found,
                        store_failures = report.store_failures,
                        pruned = report.pruned,
                        "cycle complete"
                    );
                }
            }
        }

        info!("broadcaster stopped");
    }

    /// one poll-and-push pass over the current subscriptions
    pub async fn run_cycle(&self) -> CycleReport {
        let groups = self.gateway.registry().snapshot_grouped_by_sensor();
        let mut report = CycleReport {
            sensors: groups.len(),
            ..CycleReport::default()
        };
        if groups.is_empty() {
            return report;
        }

        let store = &self.store;
        let mut lookups = stream::iter(groups)
            .map(|(sensor, conns)| async move {
                let outcome = store.latest(&sensor).await;
                (sensor, conns, outcome)
            })
            .buffer_unordered(self.settings.max_concurrent_lookups.max(1));

        while let Some((sensor, conns, outcome)) = lookups.next().await {
            let message = match outcome {
                Ok(Some(reading)) => {
                    if self.settings.show_sensor_data {
                        info!("[{}] value: {} -> {} subscriber(s)", sensor, reading.value, conns.len());
                    }
                    ServerMessage::reading(sensor.clone(), reading)
                }
                Ok(None) => {
                    report.not_found += 1;
                    continue;
                }
                Err(e) => {
                    report.store_failures += 1;
                    warn!("[{}] lookup failed: {}", sensor, e);
                    ServerMessage::fetch_failed()
                }
            };

            let is_reading = matches!(message, ServerMessage::Reading { .. });
            let outcome = self.fan_out(&sensor, &conns, message);
            report.pruned += outcome.pruned;
            if is_reading {
                report.delivered += outcome.delivered;
            }
        }

        report
    }

    fn fan_out(&self, sensor: &SensorId, conns: &[ConnectionId], message: ServerMessage) -> FanOut {
        let mut outcome = FanOut::default();
        for &conn in conns {
            match self.gateway.push(conn, message.clone()) {
                Ok(()) => outcome.delivered += 1,
                Err(ConnectionGone(gone)) => {
                    debug!("[{}] {} is gone", sensor, gone);
                    self.gateway.prune(gone);
                    outcome.pruned += 1;
                }
            }
        }
        outcome
    }
}

#[derive(Default)]
struct FanOut {
    delivered: usize,
    pruned: usize,
}

// resolves once the flag is set or the sender is dropped
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
