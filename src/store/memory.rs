use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{StateStore, StoreError};
use crate::db::models::{MaxCapacityRecord, NewReading, Reading, RelayRecord, RelayState};

#[derive(Debug, Default)]
struct Inner {
    relay: Option<RelayRecord>,
    max_capacity: Option<MaxCapacityRecord>,
    readings: Vec<Reading>,
}

/// Process-local store used when no database is configured, and in tests.
///
/// Wrapped in `Arc` so it can be cheaply cloned and shared across tasks.
/// Every write swaps a whole record under the write lock, so readers see
/// either the old or the new value and never a mix.
#[derive(Clone, Default)]
pub struct MemoryStateStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of readings appended so far.
    pub async fn reading_count(&self) -> usize {
        self.inner.read().await.readings.len()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn relay_state(&self) -> Result<Option<RelayRecord>, StoreError> {
        Ok(self.inner.read().await.relay)
    }

    async fn set_relay_state(&self, state: RelayState) -> Result<RelayRecord, StoreError> {
        let record = RelayRecord {
            state,
            updated_at: Utc::now(),
        };
        self.inner.write().await.relay = Some(record);
        Ok(record)
    }

    async fn max_capacity(&self) -> Result<Option<MaxCapacityRecord>, StoreError> {
        Ok(self.inner.read().await.max_capacity)
    }

    async fn set_max_capacity(&self, depth: f64) -> Result<MaxCapacityRecord, StoreError> {
        let record = MaxCapacityRecord {
            depth,
            updated_at: Utc::now(),
        };
        self.inner.write().await.max_capacity = Some(record);
        Ok(record)
    }

    async fn append_reading(&self, reading: NewReading) -> Result<Reading, StoreError> {
        let reading = Reading {
            id: Uuid::new_v4(),
            distance: reading.distance,
            relay_state: reading.relay_state,
            measured_at: reading.measured_at.unwrap_or_else(Utc::now),
        };
        self.inner.write().await.readings.push(reading.clone());
        Ok(reading)
    }

    async fn latest_reading(&self) -> Result<Option<Reading>, StoreError> {
        Ok(self.inner.read().await.readings.last().cloned())
    }
}
