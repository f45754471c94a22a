//! Host roster and master endpoints

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::HostsResponse,
};
use crate::storage::schema::{Host, HostId, NewHost};

/// GET /api/v1/hosts
pub async fn list_hosts(State(state): State<ApiState>) -> ApiResult<Json<HostsResponse>> {
    let hosts = state.repos().hosts.get_all().await?;
    Ok(Json(HostsResponse {
        count: hosts.len(),
        hosts,
    }))
}

/// POST /api/v1/hosts
pub async fn create_host(
    State(state): State<ApiState>,
    Json(host): Json<NewHost>,
) -> ApiResult<(StatusCode, Json<Host>)> {
    validate(&host)?;
    let created = state.roster.create_host(host).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// PUT /api/v1/hosts/{id}
pub async fn update_host(
    State(state): State<ApiState>,
    Path(id): Path<HostId>,
    Json(host): Json<NewHost>,
) -> ApiResult<Json<Host>> {
    validate(&host)?;
    Ok(Json(state.roster.update_host(id, host).await?))
}

/// DELETE /api/v1/hosts/{id}
pub async fn delete_host(
    State(state): State<ApiState>,
    Path(id): Path<HostId>,
) -> ApiResult<StatusCode> {
    state.roster.delete_host(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/master
pub async fn get_master(State(state): State<ApiState>) -> ApiResult<Json<Host>> {
    state
        .repos()
        .hosts
        .get_master()
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("no master elected".to_string()))
}

/// PUT /api/v1/master/{id}
pub async fn set_master(
    State(state): State<ApiState>,
    Path(id): Path<HostId>,
) -> ApiResult<Json<Host>> {
    Ok(Json(state.roster.set_master(id).await?))
}

fn validate(host: &NewHost) -> ApiResult<()> {
    if host.hostname.trim().is_empty() {
        return Err(ApiError::InvalidRequest("hostname must not be empty".to_string()));
    }
    if host.ip_address.trim().is_empty() {
        return Err(ApiError::InvalidRequest("ip_address must not be empty".to_string()));
    }
    if host.agent_port == 0 {
        return Err(ApiError::InvalidRequest("agent_port must not be 0".to_string()));
    }
    Ok(())
}
