use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use tracing::{debug, info, warn};
use utoipa::OpenApi;

use super::{
    dto::{
        CommandRequest, MaxCapacityDto, MaxCapacityRequest, ReadingDto, RelayStateDto,
        TelemetryRequest,
    },
    errors::AppError,
    AppState,
};
use crate::db::models::MaxCapacity;

// ---------------------------------------------------------------------------
// Relay
// ---------------------------------------------------------------------------

/// Upsert the current relay state. Last write wins.
#[utoipa::path(
    post,
    path = "/relay",
    request_body = CommandRequest,
    responses(
        (status = 200, description = "Relay state stored", body = RelayStateDto),
        (status = 400, description = "action is not ON or OFF"),
        (status = 500, description = "Store write failed"),
        (status = 503, description = "Store unreachable"),
    ),
    tag = "relay"
)]
pub async fn post_relay(
    State(state): State<AppState>,
    payload: Result<Json<CommandRequest>, JsonRejection>,
) -> Result<Json<RelayStateDto>, AppError> {
    let Json(req) = payload?;
    apply_command(&state, &req).await.map(Json)
}

/// Fetch the current relay state.
#[utoipa::path(
    get,
    path = "/relay",
    responses(
        (status = 200, description = "Current relay state", body = RelayStateDto),
        (status = 404, description = "No relay state recorded yet"),
        (status = 503, description = "Store unreachable"),
    ),
    tag = "relay"
)]
pub async fn get_relay(State(state): State<AppState>) -> Result<Json<RelayStateDto>, AppError> {
    let record = state
        .store
        .relay_state()
        .await?
        .ok_or(AppError::NotFound("relay state"))?;
    Ok(Json(record.into()))
}

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

/// Append one telemetry reading.
#[utoipa::path(
    post,
    path = "/readings",
    request_body = TelemetryRequest,
    responses(
        (status = 201, description = "Reading stored", body = ReadingDto),
        (status = 400, description = "Missing or malformed fields"),
        (status = 500, description = "Store write failed"),
        (status = 503, description = "Store unreachable"),
    ),
    tag = "readings"
)]
pub async fn post_reading(
    State(state): State<AppState>,
    payload: Result<Json<TelemetryRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ReadingDto>), AppError> {
    let Json(req) = payload?;
    let dto = append_telemetry(&state, req).await?;
    Ok((StatusCode::CREATED, Json(dto)))
}

/// Fetch the most recently written reading, with percentage full when a max
/// capacity is configured.
#[utoipa::path(
    get,
    path = "/readings/latest",
    responses(
        (status = 200, description = "Latest reading", body = ReadingDto),
        (status = 404, description = "No reading recorded yet"),
        (status = 503, description = "Store unreachable"),
    ),
    tag = "readings"
)]
pub async fn get_latest_reading(
    State(state): State<AppState>,
) -> Result<Json<ReadingDto>, AppError> {
    let reading = state
        .store
        .latest_reading()
        .await?
        .ok_or(AppError::NotFound("reading"))?;
    let capacity = state.store.max_capacity_or_default().await?;
    Ok(Json(ReadingDto::new(reading, capacity)))
}

// ---------------------------------------------------------------------------
// Max capacity
// ---------------------------------------------------------------------------

/// Upsert the tank's reference depth.
#[utoipa::path(
    put,
    path = "/max-capacity",
    request_body = MaxCapacityRequest,
    responses(
        (status = 200, description = "Max capacity stored", body = MaxCapacityDto),
        (status = 400, description = "depth missing or not positive"),
        (status = 500, description = "Store write failed"),
        (status = 503, description = "Store unreachable"),
    ),
    tag = "capacity"
)]
pub async fn put_max_capacity(
    State(state): State<AppState>,
    payload: Result<Json<MaxCapacityRequest>, JsonRejection>,
) -> Result<Json<MaxCapacityDto>, AppError> {
    let Json(req) = payload?;
    let depth = req.validated_depth()?;
    let record = state.store.set_max_capacity(depth).await?;
    info!(depth = depth, "Max capacity updated");
    Ok(Json(record.into()))
}

/// Fetch the tank's reference depth.
#[utoipa::path(
    get,
    path = "/max-capacity",
    responses(
        (status = 200, description = "Current max capacity", body = MaxCapacityDto),
        (status = 404, description = "Max capacity not set"),
        (status = 503, description = "Store unreachable"),
    ),
    tag = "capacity"
)]
pub async fn get_max_capacity(
    State(state): State<AppState>,
) -> Result<Json<MaxCapacityDto>, AppError> {
    let record = state
        .store
        .max_capacity()
        .await?
        .ok_or(AppError::NotFound("max capacity"))?;
    Ok(Json(record.into()))
}

// ---------------------------------------------------------------------------
// Legacy single endpoint
// ---------------------------------------------------------------------------

/// Older firmware posts both commands (`{"action"}`) and telemetry
/// (`{"distance", "relayStatus"}`) to this one URL. A body carrying an
/// `action` key is a command; anything else is telemetry.
#[utoipa::path(
    post,
    path = "/control-relay",
    responses(
        (status = 200, description = "Command stored", body = RelayStateDto),
        (status = 201, description = "Reading stored", body = ReadingDto),
        (status = 400, description = "Malformed payload"),
        (status = 500, description = "Store write failed"),
        (status = 503, description = "Store unreachable"),
    ),
    tag = "legacy"
)]
pub async fn post_control_relay(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(body) = payload?;

    if body.get("action").is_some() {
        let req: CommandRequest = serde_json::from_value(body)
            .map_err(|e| AppError::Validation(e.to_string()))?;
        let dto = apply_command(&state, &req).await?;
        Ok(Json(dto).into_response())
    } else {
        let req: TelemetryRequest = serde_json::from_value(body)
            .map_err(|e| AppError::Validation(e.to_string()))?;
        let dto = append_telemetry(&state, req).await?;
        Ok((StatusCode::CREATED, Json(dto)).into_response())
    }
}

async fn apply_command(state: &AppState, req: &CommandRequest) -> Result<RelayStateDto, AppError> {
    let relay = req.relay_state()?;
    let record = state.store.set_relay_state(relay).await?;
    info!(relay_state = %record.state, "Relay state updated");
    Ok(record.into())
}

async fn append_telemetry(state: &AppState, req: TelemetryRequest) -> Result<ReadingDto, AppError> {
    let new = req.into_new_reading(state.require_relay_state)?;
    let reading = state.store.append_reading(new).await?;
    debug!(
        distance = reading.distance,
        relay_state = ?reading.relay_state,
        "Reading stored"
    );
    // The reading is stored at this point; answer 201 regardless.
    let capacity = match state.store.max_capacity_or_default().await {
        Ok(capacity) => capacity,
        Err(e) => {
            warn!(error = %e, "Max capacity unavailable; percent full omitted");
            MaxCapacity::Unset
        }
    };
    Ok(ReadingDto::new(reading, capacity))
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Returns `200 OK` with `{"status":"ok"}` when the server is running.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
    ),
    tag = "system"
)]
pub async fn health() -> Json<Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------------
// OpenAPI spec
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    paths(
        post_relay,
        get_relay,
        post_reading,
        get_latest_reading,
        put_max_capacity,
        get_max_capacity,
        post_control_relay,
        health,
    ),
    components(schemas(
        CommandRequest,
        TelemetryRequest,
        MaxCapacityRequest,
        RelayStateDto,
        ReadingDto,
        MaxCapacityDto,
        crate::db::models::RelayState,
    )),
    tags(
        (name = "relay",    description = "Current relay state"),
        (name = "readings", description = "Tank distance readings"),
        (name = "capacity", description = "Tank reference depth"),
        (name = "legacy",   description = "Single endpoint used by older firmware"),
        (name = "system",   description = "System endpoints"),
    ),
    info(
        title = "Tank Relay API",
        version = "0.1.0",
        description = "Water-tank telemetry and pump relay state"
    )
)]
pub struct ApiDoc;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
