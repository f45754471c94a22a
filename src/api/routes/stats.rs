//! Poll statistics and rule cache control

use axum::{Json, extract::State, http::StatusCode};
use chrono::Utc;
use tracing::info;

use crate::api::{error::ApiResult, state::ApiState, types::StatsResponse};

/// GET /api/v1/stats
///
/// Counters are read without resetting the meta-alert window.
pub async fn get_stats(State(state): State<ApiState>) -> ApiResult<Json<StatsResponse>> {
    let hosts = state.repos().hosts.get_all().await?;
    let polls = state.notifier.counters();
    let now = Utc::now();

    Ok(Json(StatsResponse {
        timestamp: now.to_rfc3339(),
        uptime_secs: (now - state.started_at).num_seconds(),
        hosts: hosts.len(),
        polls,
        failure_rate: polls.failure_rate(),
    }))
}

/// POST /api/v1/rules/reload
pub async fn reload_rules(State(state): State<ApiState>) -> StatusCode {
    info!("rule cache reload requested over API");
    state.notifier.refresh_alert_rules().await;
    StatusCode::NO_CONTENT
}
