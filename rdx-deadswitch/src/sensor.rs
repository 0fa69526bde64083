//! The bridge to the wearable.
//!
//! The engine polls the bridge on its own cadence and treats whatever comes
//! back as the latest sample. Native acquisition lives behind the trait.

use crate::model::HealthSample;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

#[async_trait]
pub trait SensorBridge: Send + Sync {
    /// The most recent reading, or `None` when nothing is available.
    async fn query_health_sample(&self) -> Option<HealthSample>;
}

/// Holds the last sample a host pushed in. Cloning shares the slot.
#[derive(Debug, Default, Clone)]
pub struct LatestSampleSensor {
    latest: Arc<Mutex<Option<HealthSample>>>,
}

impl LatestSampleSensor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, sample: HealthSample) {
        *self.latest.lock().unwrap_or_else(|e| e.into_inner()) = Some(sample);
    }

    pub fn clear(&self) {
        *self.latest.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

#[async_trait]
impl SensorBridge for LatestSampleSensor {
    async fn query_health_sample(&self) -> Option<HealthSample> {
        *self.latest.lock().unwrap_or_else(|e| e.into_inner())
    }
}
