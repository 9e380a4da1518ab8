use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::{info, warn};

use tank_relay::{
    api::{self, AppState},
    config::Config,
    db, shutdown,
    store::{MemoryStateStore, PgStateStore, StateStore},
    telemetry,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env (ignore error if file absent — env vars may be set externally)
    let _ = dotenvy::dotenv();

    telemetry::init();

    let config = Config::from_env()?;

    let store: Arc<dyn StateStore> = match &config.database_url {
        Some(url) => {
            let pool = db::create_pool(url).await?;
            db::run_migrations(&pool).await?;
            info!("Database ready");
            Arc::new(PgStateStore::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set; relay state and readings are kept in memory only");
            Arc::new(MemoryStateStore::new())
        }
    };

    let state = AppState::new(store, config.require_relay_state);

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown::signal())
        .await?;

    Ok(())
}
