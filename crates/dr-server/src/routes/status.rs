//! Inspection and liveness handlers.

use axum::extract::State;
use axum::Json;

use crate::context::{AppContext, HealthReport, StatusReport};

/// GET /status
pub async fn get_status(State(ctx): State<AppContext>) -> Json<StatusReport> {
    Json(ctx.status_report())
}

/// GET /health
pub async fn get_health(State(ctx): State<AppContext>) -> Json<HealthReport> {
    Json(ctx.health_report().await)
}
