//! ListDrivers / Mount / Unmount handlers.

use axum::{Json, extract::State};

use {
    serde::{Deserialize, Serialize},
    tracing::debug,
    volbroker_plugins::{MountOptions, Protocol, SharedPlugin},
};

use crate::{error::ApiError, server::AppState};

#[derive(Debug, Serialize)]
pub struct DriverInfo {
    pub name: String,
    pub protocol: Protocol,
}

#[derive(Debug, Serialize)]
pub struct ListDriversResponse {
    pub drivers: Vec<DriverInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountRequest {
    pub driver_id: String,
    pub volume_id: String,
    #[serde(default)]
    pub config: MountOptions,
}

#[derive(Debug, Serialize)]
pub struct MountResponse {
    pub path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnmountRequest {
    pub driver_id: String,
    pub volume_id: String,
}

async fn resolve(state: &AppState, driver_id: &str, volume_id: &str) -> Result<SharedPlugin, ApiError> {
    if volume_id.is_empty() {
        return Err(ApiError::BadRequest("volumeId must not be empty".into()));
    }
    state
        .gateway
        .registry
        .plugin(driver_id)
        .await
        .ok_or_else(|| ApiError::DriverNotFound(driver_id.to_string()))
}

/// `GET /drivers`, sorted by name.
pub async fn list_drivers(State(state): State<AppState>) -> Json<ListDriversResponse> {
    let snapshot = state.gateway.registry.plugins().await;
    let mut drivers: Vec<DriverInfo> = snapshot
        .iter()
        .map(|(name, plugin)| DriverInfo {
            name: name.clone(),
            protocol: plugin.protocol(),
        })
        .collect();
    drivers.sort_by(|a, b| a.name.cmp(&b.name));
    Json(ListDriversResponse { drivers })
}

/// `POST /drivers/mount`
pub async fn mount(
    State(state): State<AppState>,
    Json(req): Json<MountRequest>,
) -> Result<Json<MountResponse>, ApiError> {
    let plugin = resolve(&state, &req.driver_id, &req.volume_id).await?;
    debug!(driver = %req.driver_id, volume = %req.volume_id, "mount requested");
    let path = plugin.mount(&req.volume_id, &req.config).await?;
    Ok(Json(MountResponse { path }))
}

/// `POST /drivers/unmount`
pub async fn unmount(
    State(state): State<AppState>,
    Json(req): Json<UnmountRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let plugin = resolve(&state, &req.driver_id, &req.volume_id).await?;
    debug!(driver = %req.driver_id, volume = %req.volume_id, "unmount requested");
    plugin.unmount(&req.volume_id).await?;
    Ok(Json(serde_json::json!({})))
}
