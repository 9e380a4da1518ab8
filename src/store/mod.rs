//! Remote State Store: the backend's record of the last-known relay state,
//! the operator's max capacity and the append-only reading log.
//!
//! Singletons are last-write-wins. `set_*` is an unconditional upsert and two
//! racing writers leave whichever value committed last.

mod memory;
mod postgres;

pub use memory::MemoryStateStore;
pub use postgres::PgStateStore;

use async_trait::async_trait;

use crate::db::models::{
    MaxCapacity, MaxCapacityRecord, NewReading, Reading, RelayRecord, RelayState,
};

/// Fixed key addressing the singleton rows.
pub const CURRENT_KEY: &str = "current";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached or the call timed out.
    #[error("store unreachable: {0}")]
    Connection(String),

    /// The store was reached but rejected or failed the operation.
    #[error("store error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Connection(e.to_string()),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn relay_state(&self) -> Result<Option<RelayRecord>, StoreError>;

    async fn set_relay_state(&self, state: RelayState) -> Result<RelayRecord, StoreError>;

    async fn max_capacity(&self) -> Result<Option<MaxCapacityRecord>, StoreError>;

    /// `depth` is validated by the caller (finite, > 0).
    async fn set_max_capacity(&self, depth: f64) -> Result<MaxCapacityRecord, StoreError>;

    async fn append_reading(&self, reading: NewReading) -> Result<Reading, StoreError>;

    /// Most recent reading by write order.
    async fn latest_reading(&self) -> Result<Option<Reading>, StoreError>;

    /// Current relay state, `Off` if nothing was ever written.
    async fn relay_state_or_default(&self) -> Result<RelayState, StoreError> {
        Ok(self
            .relay_state()
            .await?
            .map(|r| r.state)
            .unwrap_or_default())
    }

    /// Current max capacity, `Unset` if nothing was ever written.
    async fn max_capacity_or_default(&self) -> Result<MaxCapacity, StoreError> {
        Ok(self.max_capacity().await?.into())
    }
}
