use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{StateStore, StoreError, CURRENT_KEY};
use crate::db::models::{MaxCapacityRecord, NewReading, Reading, RelayRecord, RelayState};

#[derive(Debug, Clone)]
pub struct PgStateStore {
    pool: PgPool,
}

impl PgStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StateStore for PgStateStore {
    async fn relay_state(&self) -> Result<Option<RelayRecord>, StoreError> {
        let row = sqlx::query_as::<_, RelayRecord>(
            "SELECT state, updated_at FROM relay_state_records WHERE key = $1",
        )
        .bind(CURRENT_KEY)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn set_relay_state(&self, state: RelayState) -> Result<RelayRecord, StoreError> {
        let row = sqlx::query_as::<_, RelayRecord>(
            r#"
            INSERT INTO relay_state_records (key, state, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (key) DO UPDATE
                SET state = EXCLUDED.state,
                    updated_at = EXCLUDED.updated_at
            RETURNING state, updated_at
            "#,
        )
        .bind(CURRENT_KEY)
        .bind(state)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn max_capacity(&self) -> Result<Option<MaxCapacityRecord>, StoreError> {
        let row = sqlx::query_as::<_, MaxCapacityRecord>(
            "SELECT depth, updated_at FROM max_capacity_records WHERE key = $1",
        )
        .bind(CURRENT_KEY)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn set_max_capacity(&self, depth: f64) -> Result<MaxCapacityRecord, StoreError> {
        let row = sqlx::query_as::<_, MaxCapacityRecord>(
            r#"
            INSERT INTO max_capacity_records (key, depth, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (key) DO UPDATE
                SET depth = EXCLUDED.depth,
                    updated_at = EXCLUDED.updated_at
            RETURNING depth, updated_at
            "#,
        )
        .bind(CURRENT_KEY)
        .bind(depth)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn append_reading(&self, reading: NewReading) -> Result<Reading, StoreError> {
        let row = sqlx::query_as::<_, Reading>(
            r#"
            INSERT INTO readings (id, distance, relay_state, measured_at)
            VALUES ($1, $2, $3, COALESCE($4, now()))
            RETURNING id, distance, relay_state, measured_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(reading.distance)
        .bind(reading.relay_state)
        .bind(reading.measured_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn latest_reading(&self) -> Result<Option<Reading>, StoreError> {
        let row = sqlx::query_as::<_, Reading>(
            r#"
            SELECT id, distance, relay_state, measured_at
            FROM readings
            ORDER BY seq DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

// ---------------------------------------------------------------------------
// Tests (`#[sqlx::test]` provisions a fresh database from `DATABASE_URL`)
// ---------------------------------------------------------------------------
