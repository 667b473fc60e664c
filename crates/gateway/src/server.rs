use std::sync::Arc;

use {
    axum::{
        Json, Router,
        extract::State,
        response::IntoResponse,
        routing::{get, post},
    },
    tokio_util::sync::CancellationToken,
    tower_http::trace::TraceLayer,
    tracing::info,
};

#[cfg(feature = "metrics")]
use crate::metrics_middleware::http_metrics_middleware;
use crate::{
    drivers,
    error::{Error, Result},
    metrics_routes::prometheus_metrics_handler,
    state::GatewayState,
};

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<GatewayState>,
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(prometheus_metrics_handler))
        .route("/drivers", get(drivers::list_drivers))
        .route("/drivers/mount", post(drivers::mount))
        .route("/drivers/unmount", post(drivers::unmount));

    #[cfg(feature = "metrics")]
    let router = router.layer(axum::middleware::from_fn(http_metrics_middleware));

    router
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { gateway: state })
}

/// Serve until `shutdown` is cancelled, then drain open connections.
pub async fn start_gateway(
    bind: &str,
    port: u16,
    state: Arc<GatewayState>,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind((bind, port))
        .await
        .map_err(|source| Error::Bind {
            addr: format!("{bind}:{port}"),
            source,
        })?;
    info!(addr = %listener.local_addr()?, "gateway listening");

    let app = build_gateway_app(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("gateway stopped");
    Ok(())
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let drivers = state.gateway.registry.len().await;
    Json(serde_json::json!({
        "status": "ok",
        "version": state.gateway.version,
        "drivers": drivers,
    }))
}
