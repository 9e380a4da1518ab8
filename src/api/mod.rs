pub mod dto;
pub mod errors;
pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use crate::store::StateStore;
use handlers::ApiDoc;

/// Shared by every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StateStore>,
    /// Reject telemetry that carries no `relayState`.
    pub require_relay_state: bool,
}

impl AppState {
    pub fn new(store: Arc<dyn StateStore>, require_relay_state: bool) -> Self {
        Self {
            store,
            require_relay_state,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .route("/relay", get(handlers::get_relay).post(handlers::post_relay))
        .route("/readings", post(handlers::post_reading))
        .route("/readings/latest", get(handlers::get_latest_reading))
        .route(
            "/max-capacity",
            get(handlers::get_max_capacity).put(handlers::put_max_capacity),
        )
        .route("/control-relay", post(handlers::post_control_relay))
        .with_state(state)
        .split_for_parts();

    router
        .route("/health", get(handlers::health))
        .route(
            "/api-docs/openapi.json",
            get(move || async move { axum::Json(api) }),
        )
}
