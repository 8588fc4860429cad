//! Recent lifecycle events.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use dr_core::events::Event;

use crate::context::AppContext;

#[derive(Debug, Deserialize)]
pub struct RecentParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// GET /events
pub async fn recent_events(
    State(ctx): State<AppContext>,
    Query(params): Query<RecentParams>,
) -> Json<Vec<Event>> {
    Json(ctx.event_bus.recent_events(params.limit))
}
