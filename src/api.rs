/// file: src/api.rs
/// description: HTTP router and the scrape/connections/health handlers.
/// HTTP API.
///
/// Route map:
///   POST  /scrape        — one batch run, staged and published
///   GET   /connections   — persisted rows, `?handle=` to filter
///   GET   /health
use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::Config;
use crate::database::DbClient;
use crate::models::*;
use crate::pipeline;

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub db: DbClient,
    pub cfg: Arc<Config>,
    /// Held for the duration of a scrape run; one browser session at a time.
    pub run_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(db: DbClient, cfg: Config) -> Self {
        Self {
            db,
            cfg: Arc::new(cfg),
            run_lock: Arc::new(Mutex::new(())),
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/scrape", post(scrape_handler))
        .route("/connections", get(connections_handler))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = state.db.ping().await;
    let healthy = db_ok.is_ok();

    let body = HealthResponse {
        status: if healthy { "ok" } else { "degraded" }.to_string(),
        database: ComponentStatus {
            healthy,
            error: db_ok.err().map(|e| e.to_string()),
        },
    };
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body))
}

async fn scrape_handler(State(state): State<AppState>) -> Result<Json<ScrapeSummary>, AppError> {
    let _guard = state.run_lock.try_lock().map_err(|_| {
        warn!("Rejected scrape request; a run is already in progress");
        AppError::Busy
    })?;

    let outcome = pipeline::scrape_and_publish(&state.cfg, &state.db).await?;
    info!(
        run_id = %outcome.report.run_id,
        rows = outcome.report.total_rows,
        published = outcome.published,
        "Scrape request finished"
    );

    Ok(Json(ScrapeSummary {
        status: "success".to_string(),
        message: outcome.message(),
        data_count: outcome.report.total_rows,
    }))
}

async fn connections_handler(
    State(state): State<AppState>,
    Query(q): Query<ConnectionsQuery>,
) -> Result<Json<ConnectionsResponse>, AppError> {
    let handle = q.handle.as_deref().map(str::trim).filter(|h| !h.is_empty());
    let connections = state.db.get_connections(handle).await?;
    Ok(Json(ConnectionsResponse { connections }))
}
