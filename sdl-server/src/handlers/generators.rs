//! Generator CRUD and start/stop toggles.

use axum::extract::{Path, State};
use axum::Json;
use sdl_core::canvas::{AddGeneratorRequest, GeneratorStatus};
use sdl_core::generator::{BulkToggleOutcome, GeneratorPatch, GeneratorSpec};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub async fn add(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AddGeneratorRequest>,
) -> Result<Json<GeneratorSpec>, AppError> {
    let canvas = state.manager.get(id).await?;
    Ok(Json(canvas.add_generator(req).await?))
}

pub async fn list(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<GeneratorStatus>>, AppError> {
    let canvas = state.manager.get(id).await?;
    Ok(Json(canvas.list_generators().await))
}

pub async fn get(
    State(state): State<AppState>,
    Path((id, gid)): Path<(Uuid, Uuid)>,
) -> Result<Json<GeneratorSpec>, AppError> {
    let canvas = state.manager.get(id).await?;
    Ok(Json(canvas.get_generator(gid).await?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateGeneratorRequest {
    pub patch: GeneratorPatch,
    pub field_mask: Vec<String>,
}

pub async fn update(
    State(state): State<AppState>,
    Path((id, gid)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpdateGeneratorRequest>,
) -> Result<Json<GeneratorSpec>, AppError> {
    let canvas = state.manager.get(id).await?;
    Ok(Json(
        canvas.update_generator(gid, req.patch, req.field_mask).await?,
    ))
}

pub async fn start(
    State(state): State<AppState>,
    Path((id, gid)): Path<(Uuid, Uuid)>,
) -> Result<Json<JsonValue>, AppError> {
    let canvas = state.manager.get(id).await?;
    let changed = canvas.start_generator(gid).await?;
    Ok(Json(json!({ "changed": changed })))
}

pub async fn stop(
    State(state): State<AppState>,
    Path((id, gid)): Path<(Uuid, Uuid)>,
) -> Result<Json<JsonValue>, AppError> {
    let canvas = state.manager.get(id).await?;
    let changed = canvas.stop_generator(gid).await?;
    Ok(Json(json!({ "changed": changed })))
}

pub async fn start_all(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BulkToggleOutcome>, AppError> {
    let canvas = state.manager.get(id).await?;
    Ok(Json(canvas.start_all().await))
}

pub async fn stop_all(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BulkToggleOutcome>, AppError> {
    let canvas = state.manager.get(id).await?;
    Ok(Json(canvas.stop_all().await))
}

pub async fn delete(
    State(state): State<AppState>,
    Path((id, gid)): Path<(Uuid, Uuid)>,
) -> Result<Json<JsonValue>, AppError> {
    let canvas = state.manager.get(id).await?;
    canvas.delete_generator(gid).await?;
    Ok(Json(json!({ "deleted": gid })))
}
