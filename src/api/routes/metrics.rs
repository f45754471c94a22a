//! Metrics history endpoint

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{Duration, Utc};

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::{MetricQuery, MetricsResponse},
};
use crate::storage::error::StorageError;
use crate::storage::schema::{HostId, MetricCategory};

/// GET /api/v1/hosts/{id}/metrics/{category}?from&to
///
/// `category` is one of `system`, `process`, `container`, `network`.
pub async fn get_metrics_history(
    State(state): State<ApiState>,
    Path((host_id, category)): Path<(HostId, String)>,
    Query(query): Query<MetricQuery>,
) -> ApiResult<Json<MetricsResponse>> {
    let category: MetricCategory = category
        .parse()
        .map_err(|e: StorageError| ApiError::InvalidRequest(e.to_string()))?;

    let to = query.to.unwrap_or_else(Utc::now);
    let from = query.from.unwrap_or(to - Duration::hours(1));
    if from > to {
        return Err(ApiError::InvalidRequest(
            "`from` must not be after `to`".to_string(),
        ));
    }

    let repos = state.repos();
    if repos.hosts.get_by_id(host_id).await?.is_none() {
        return Err(StorageError::host_not_found(host_id).into());
    }

    let metrics = repos
        .metrics
        .get_metrics_in_range(category, host_id, from, to)
        .await?;

    Ok(Json(MetricsResponse {
        host_id,
        category,
        from,
        to,
        count: metrics.len(),
        metrics,
    }))
}
