//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use sensor_relay::{
    Broadcaster, BroadcasterSettings, Gateway, GatewaySettings, Reading, ReadingStore, SensorId,
    StoreError, SubscriptionRegistry,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn sensor(name: &str) -> SensorId {
    SensorId::parse(name).unwrap()
}

/// Store double: fixed readings, sensors that always fail, lookup accounting.
#[derive(Default)]
pub struct ScriptedStore {
    readings: Mutex<HashMap<SensorId, Reading>>,
    failing: Mutex<HashSet<SensorId>>,
    lookups: Mutex<HashMap<SensorId, usize>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn with(self, name: &str, value: f64) -> Self {
        self.readings.lock().insert(sensor(name), Reading::new(value));
        self
    }

    pub fn failing(self, name: &str) -> Self {
        self.failing.lock().insert(sensor(name));
        self
    }

    pub fn total_lookups(&self) -> usize {
        self.lookups.lock().values().sum()
    }

    pub fn lookups_for(&self, name: &str) -> usize {
        self.lookups.lock().get(&sensor(name)).copied().unwrap_or(0)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReadingStore for ScriptedStore {
    async fn latest(&self, sensor: &SensorId) -> Result<Option<Reading>, StoreError> {
        *self.lookups.lock().entry(sensor.clone()).or_default() += 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.failing.lock().contains(sensor) {
            return Err(StoreError::Unavailable("scripted failure".to_string()));
        }
        Ok(self.readings.lock().get(sensor).copied())
    }
}

pub struct Relay {
    pub store: Arc<ScriptedStore>,
    pub gateway: Arc<Gateway>,
    pub broadcaster: Broadcaster,
}

/// Wire a gateway and broadcaster around `store`; eager lookup off so the
/// only traffic after `subscribed` comes from cycles.
pub fn relay(store: ScriptedStore, settings: BroadcasterSettings) -> Relay {
    let store = Arc::new(store);
    let gateway = Arc::new(Gateway::new(
        Arc::new(SubscriptionRegistry::new()),
        store.clone(),
        GatewaySettings {
            channel_capacity: 32,
            eager_lookup: false,
        },
    ));
    let broadcaster = Broadcaster::new(gateway.clone(), store.clone(), settings);
    Relay {
        store,
        gateway,
        broadcaster,
    }
}
