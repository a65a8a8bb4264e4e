//! ==============================================================================
//! store.rs - reading store collaborators
//! ==============================================================================
//!
//! purpose:
//!     the relay never owns readings. it asks a ReadingStore for the latest
//!     value of a sensor and gets back a reading, "not found", or an error.
//!
//! implementations:
//!     - MemoryStore: in-process map. used for local runs (seeded from the
//!       config file) and by the test suite.
//!     - HttpStore: asks the reading service over http,
//!       GET {base}/sensors/{sensor_id}/latest. 404 means not found.
//!
//! ==============================================================================

use crate::domain::{Reading, SensorId};
use crate::error::StoreError;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// read-only access to the latest reading per sensor
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Ok(None) when the sensor has never reported
    async fn latest(&self, sensor: &SensorId) -> Result<Option<Reading>, StoreError>;
}

// ==============================================================================
// memory store
// ==============================================================================

#[derive(Debug, Default)]
pub struct MemoryStore {
    readings: RwLock<HashMap<SensorId, Reading>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// build a store pre-populated with readings
    pub fn with_readings<I>(readings: I) -> Self
    where
        I: IntoIterator<Item = (SensorId, Reading)>,
    {
        Self {
            readings: RwLock::new(readings.into_iter().collect()),
        }
    }

    pub fn record(&self, sensor: SensorId, reading: Reading) {
        self.readings.write().insert(sensor, reading);
    }

    pub fn clear(&self, sensor: &SensorId) {
        self.readings.write().remove(sensor);
    }
}

#[async_trait]
impl ReadingStore for MemoryStore {
    async fn latest(&self, sensor: &SensorId) -> Result<Option<Reading>, StoreError> {
        Ok(self.readings.read().get(sensor).copied())
    }
}

// ==============================================================================
// http store
// ==============================================================================

/// body returned by the reading service
#[derive(Debug, Deserialize)]
struct LatestReading {
    #[serde(alias = "smokeConcentration")]
    value: f64,
}

#[derive(Debug, Clone)]
pub struct HttpStore {
    client: reqwest::Client,
    base: Url,
}

impl HttpStore {
    /// `timeout` bounds every lookup; a timed-out request is a StoreError
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base = Url::parse(base_url).with_context(|| format!("invalid store url: {}", base_url))?;
        if base.cannot_be_a_base() {
            return Err(anyhow!("store url cannot be a base: {}", base_url));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self { client, base })
    }

    fn latest_url(&self, sensor: &SensorId) -> Result<Url, StoreError> {
        // url normalizes dot segments away, even percent-encoded ones
        if matches!(sensor.as_str(), "." | "..") {
            return Err(StoreError::Unaddressable(sensor.to_string()));
        }
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::Unavailable(format!("bad base url {}", self.base)))?
            .pop_if_empty()
            .extend(["sensors", sensor.as_str(), "latest"]);
        Ok(url)
    }
}

#[async_trait]
impl ReadingStore for HttpStore {
    async fn latest(&self, sensor: &SensorId) -> Result<Option<Reading>, StoreError> {
        let url = self.latest_url(sensor)?;
        let response = self.client.get(url).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body: LatestReading = response.json().await?;
                Ok(Some(Reading::new(body.value)))
            }
            status => Err(StoreError::Status(status.as_u16())),
        }
    }
}
