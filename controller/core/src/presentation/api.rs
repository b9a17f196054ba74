// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::application::controller::{ControllerError, VolumeController};
use crate::domain::volume::{MapVolumeParams, MappingResult, VolumeId};

pub struct AppState {
    pub controller: Arc<dyn VolumeController>,
}

pub fn app(controller: Arc<dyn VolumeController>) -> Router {
    let state = Arc::new(AppState { controller });

    Router::new()
        .route("/health", get(health))
        .route("/v1/volumes/{volume_id}/map", post(map_volume))
        .route("/v1/volumes/{volume_id}/unmap", post(unmap_volume))
        .route("/v1/bdevs/{name}", put(provision_bdev).get(check_bdev))
        .with_state(state)
}

/// Error body: `{"error": "...", "kind": "..."}`
pub struct ApiError(ControllerError);

impl From<ControllerError> for ApiError {
    fn from(e: ControllerError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ControllerError::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            ControllerError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ControllerError::NotFound(_) => StatusCode::NOT_FOUND,
            ControllerError::AlreadyExists { .. } => StatusCode::CONFLICT,
            ControllerError::TargetsExhausted { .. } => StatusCode::INSUFFICIENT_STORAGE,
            ControllerError::Backend { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "error": self.0.to_string(), "kind": self.0.kind() });
        (self.status(), Json(body)).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct MapVolumeRequest {
    #[serde(default)]
    pub params: MapVolumeParams,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MapVolumeResponse {
    /// `DDDD:BB:DD.F`, `*` for unknown fields
    pub pci_address: String,
    pub scsi_target: u32,
    pub lun: u32,
}

impl From<MappingResult> for MapVolumeResponse {
    fn from(m: MappingResult) -> Self {
        Self {
            pci_address: m.pci_address.to_string(),
            scsi_target: m.scsi_target,
            lun: m.lun,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ProvisionBDevRequest {
    pub size: u64,
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn map_volume(
    State(state): State<Arc<AppState>>,
    Path(volume_id): Path<String>,
    body: Bytes,
) -> Result<Json<MapVolumeResponse>, ApiError> {
    // An empty body means "no creation parameters".
    let request: MapVolumeRequest = if body.is_empty() {
        MapVolumeRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ControllerError::InvalidArgument(format!("malformed request body: {e}")))?
    };
    let mapping = state
        .controller
        .map_volume(&VolumeId::new(volume_id), &request.params)
        .await?;
    Ok(Json(mapping.into()))
}

async fn unmap_volume(
    State(state): State<Arc<AppState>>,
    Path(volume_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.controller.unmap_volume(&VolumeId::new(volume_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn provision_bdev(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(request): Json<ProvisionBDevRequest>,
) -> Result<StatusCode, ApiError> {
    state.controller.provision_bdev(&name, request.size).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn check_bdev(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.controller.check_bdev(&name).await?;
    Ok(Json(json!({ "name": name })))
}
