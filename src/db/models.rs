use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Mirrors the `relay_state` Postgres enum. On the wire it is `"ON"` / `"OFF"`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema,
)]
#[sqlx(type_name = "relay_state", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum RelayState {
    On,
    #[default]
    Off,
}

impl RelayState {
    pub fn is_on(self) -> bool {
        matches!(self, RelayState::On)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RelayState::On => "ON",
            RelayState::Off => "OFF",
        }
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a relay action string is anything other than `ON` or `OFF`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("relay action must be \"ON\" or \"OFF\", got {0:?}")]
pub struct InvalidRelayState(pub String);

impl FromStr for RelayState {
    type Err = InvalidRelayState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ON" => Ok(Self::On),
            "OFF" => Ok(Self::Off),
            other => Err(InvalidRelayState(other.to_owned())),
        }
    }
}

/// One persisted distance sample. Never mutated after insert.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Reading {
    pub id: Uuid,
    /// Reported (remapped) distance in centimetres.
    pub distance: f64,
    pub relay_state: Option<RelayState>,
    pub measured_at: DateTime<Utc>,
}

/// Input to `append_reading`; the store assigns `id` and, when absent,
/// `measured_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReading {
    pub distance: f64,
    pub relay_state: Option<RelayState>,
    pub measured_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, FromRow, Serialize, Deserialize)]
pub struct RelayRecord {
    pub state: RelayState,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, FromRow, Serialize, Deserialize)]
pub struct MaxCapacityRecord {
    /// Reference depth of a full tank, in centimetres.
    pub depth: f64,
    pub updated_at: DateTime<Utc>,
}

/// Operator-configured reference depth. `Unset` disables percentage
/// computation but not control.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum MaxCapacity {
    #[default]
    Unset,
    Depth(f64),
}

impl MaxCapacity {
    /// Percentage full for a top-mounted sensor, where `distance` is the
    /// empty space above the water. Clamped to `0..=100`.
    pub fn percent_full(self, distance: f64) -> Option<f64> {
        match self {
            MaxCapacity::Unset => None,
            MaxCapacity::Depth(depth) => {
                Some(((depth - distance) / depth * 100.0).clamp(0.0, 100.0))
            }
        }
    }
}

impl From<Option<MaxCapacityRecord>> for MaxCapacity {
    fn from(record: Option<MaxCapacityRecord>) -> Self {
        record.map_or(MaxCapacity::Unset, |r| MaxCapacity::Depth(r.depth))
    }
}
