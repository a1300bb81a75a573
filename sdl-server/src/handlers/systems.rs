//! File loading and system activation.

use axum::extract::{Path, State};
use axum::Json;
use sdl_core::canvas::{CanvasInfo, LoadedFile};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoadFileRequest {
    pub path: String,
}

pub async fn load_file(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<LoadFileRequest>,
) -> Result<Json<LoadedFile>, AppError> {
    let canvas = state.manager.get(id).await?;
    Ok(Json(canvas.load_file(&req.path).await?))
}

#[derive(Debug, Deserialize)]
pub struct UseSystemRequest {
    pub system: String,
}

pub async fn use_system(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UseSystemRequest>,
) -> Result<Json<CanvasInfo>, AppError> {
    let canvas = state.manager.get(id).await?;
    Ok(Json(canvas.use_system(&req.system).await?))
}
