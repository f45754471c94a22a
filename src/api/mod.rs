//! Operational HTTP API for the control plane
//!
//! A thin layer over the roster service and the notifier. Nothing here is
//! needed for monitoring to work; it exists for operators and scripts.
//!
//! ## Endpoints
//!
//! - `GET /api/v1/health` - Liveness (never behind auth)
//! - `GET /api/v1/stats` - Poll counters of the current meta-alert window
//! - `GET /api/v1/hosts` - Host roster
//! - `POST /api/v1/hosts` - Register a host
//! - `PUT /api/v1/hosts/{id}` - Update a host
//! - `DELETE /api/v1/hosts/{id}` - Remove a host
//! - `GET /api/v1/hosts/{id}/metrics/{category}?from&to` - Metrics history
//! - `GET /api/v1/master` - Current master
//! - `PUT /api/v1/master/{id}` - Manual master override
//! - `POST /api/v1/rules/reload` - Rebuild the alert rule cache

pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod types;

pub use error::{ApiError, ApiResult};
pub use state::ApiState;

use std::net::SocketAddr;

use axum::Router;
use axum::routing::{get, post, put};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ApiSettings;

/// Build the router with all routes and layers
pub fn router(config: &ApiSettings, state: ApiState) -> Router {
    let mut protected = Router::new()
        .route("/api/v1/stats", get(routes::stats::get_stats))
        .route(
            "/api/v1/hosts",
            get(routes::hosts::list_hosts).post(routes::hosts::create_host),
        )
        .route(
            "/api/v1/hosts/:id",
            put(routes::hosts::update_host).delete(routes::hosts::delete_host),
        )
        .route(
            "/api/v1/hosts/:id/metrics/:category",
            get(routes::metrics::get_metrics_history),
        )
        .route("/api/v1/master", get(routes::hosts::get_master))
        .route("/api/v1/master/:id", put(routes::hosts::set_master))
        .route("/api/v1/rules/reload", post(routes::stats::reload_rules));

    if let Some(token) = config.auth_token.clone() {
        protected = protected.layer(axum::middleware::from_fn_with_state(
            token,
            middleware::auth::auth_middleware,
        ));
    }

    let mut app = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .merge(protected)
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    app
}

/// Bind and serve the API on a background task until `cancel` fires
///
/// Returns the bound address, which differs from the configured one when
/// port 0 was requested.
pub async fn spawn_api_server(
    config: ApiSettings,
    state: ApiState,
    cancel: CancellationToken,
) -> anyhow::Result<SocketAddr> {
    let app = router(&config, state);

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        let shutdown = cancel.cancelled_owned();
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
