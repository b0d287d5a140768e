use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use concierge_agent::ResponseOrchestrator;
use concierge_db::DbPool;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    orchestrator: Arc<ResponseOrchestrator>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: HealthCheck,
    pub pipeline: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, orchestrator: Arc<ResponseOrchestrator>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, orchestrator })
}

/// Ready only when storage answers; the pipeline check is informational.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let ready = database.status == "ready";

    let stats = state.orchestrator.stats();
    let pipeline = HealthCheck {
        status: "ready",
        detail: format!(
            "{} requests handled, {} failed",
            stats.total_requests, stats.failed_requests
        ),
    };

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        database,
        pipeline,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match concierge_db::ping(pool).await {
        Ok(()) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}
