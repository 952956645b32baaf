use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use super::AppState;
use crate::config::DetectionConfig;
use crate::incident_log::Incident;

pub(super) async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "sessions": state.monitor.active_sessions(),
        "incidents": state.monitor.incidents().len(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

#[derive(Debug, Deserialize)]
pub(super) struct IncidentQuery {
    limit: Option<usize>,
}

pub(super) async fn incidents(
    State(state): State<AppState>,
    Query(query): Query<IncidentQuery>,
) -> Json<Vec<Incident>> {
    let log = state.monitor.incidents();
    Json(match query.limit {
        Some(limit) => log.recent(limit),
        None => log.snapshot(),
    })
}

pub(super) async fn config(State(state): State<AppState>) -> Json<DetectionConfig> {
    Json(state.monitor.config().clone())
}
