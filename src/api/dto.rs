use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::errors::AppError;
use crate::db::models::{MaxCapacity, MaxCapacityRecord, NewReading, Reading, RelayRecord, RelayState};

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Body of `POST /relay`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CommandRequest {
    /// Exactly `"ON"` or `"OFF"`.
    #[schema(example = "ON")]
    pub action: String,
}

impl CommandRequest {
    pub fn relay_state(&self) -> Result<RelayState, AppError> {
        self.action
            .parse::<RelayState>()
            .map_err(|e| AppError::Validation(e.to_string()))
    }
}

/// Body of `POST /readings`.
///
/// Deployed firmware variants differ: some send `relayStatus` instead of
/// `relayState`, some send `distance` alone.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRequest {
    /// Reported distance in centimetres.
    pub distance: Option<f64>,
    #[serde(alias = "relayStatus")]
    pub relay_state: Option<String>,
    /// Defaults to the time the backend received the reading.
    pub measured_at: Option<DateTime<Utc>>,
}

impl TelemetryRequest {
    pub fn into_new_reading(self, require_relay_state: bool) -> Result<NewReading, AppError> {
        let distance = self
            .distance
            .ok_or_else(|| AppError::Validation("distance is required".to_owned()))?;

        let relay_state = match self.relay_state {
            Some(s) => Some(
                s.parse::<RelayState>()
                    .map_err(|e| AppError::Validation(format!("relayState: {e}")))?,
            ),
            None if require_relay_state => {
                return Err(AppError::Validation("relayState is required".to_owned()))
            }
            None => None,
        };

        Ok(NewReading {
            distance,
            relay_state,
            measured_at: self.measured_at,
        })
    }
}

/// Body of `PUT /max-capacity`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct MaxCapacityRequest {
    /// Depth of a full tank in centimetres. Must be greater than zero.
    pub depth: f64,
}

impl MaxCapacityRequest {
    pub fn validated_depth(&self) -> Result<f64, AppError> {
        if self.depth.is_finite() && self.depth > 0.0 {
            Ok(self.depth)
        } else {
            Err(AppError::Validation(
                "depth must be a positive number".to_owned(),
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RelayStateDto {
    pub state: RelayState,
    pub updated_at: DateTime<Utc>,
}

impl From<RelayRecord> for RelayStateDto {
    fn from(r: RelayRecord) -> Self {
        Self {
            state: r.state,
            updated_at: r.updated_at,
        }
    }
}

impl From<RelayStateDto> for RelayRecord {
    fn from(d: RelayStateDto) -> Self {
        Self {
            state: d.state,
            updated_at: d.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReadingDto {
    pub id: Uuid,
    /// Reported distance in centimetres.
    pub distance: f64,
    pub relay_state: Option<RelayState>,
    pub measured_at: DateTime<Utc>,
    /// `null` until a max capacity is configured.
    pub percent_full: Option<f64>,
}

impl ReadingDto {
    pub fn new(r: Reading, capacity: MaxCapacity) -> Self {
        Self {
            id: r.id,
            distance: r.distance,
            relay_state: r.relay_state,
            measured_at: r.measured_at,
            percent_full: capacity.percent_full(r.distance),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MaxCapacityDto {
    pub depth: f64,
    pub updated_at: DateTime<Utc>,
}

impl From<MaxCapacityRecord> for MaxCapacityDto {
    fn from(r: MaxCapacityRecord) -> Self {
        Self {
            depth: r.depth,
            updated_at: r.updated_at,
        }
    }
}
