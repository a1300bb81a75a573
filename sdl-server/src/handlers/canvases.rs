//! Canvas lifecycle: create, list, get, delete, reset.

use axum::extract::{Path, Query, State};
use axum::Json;
use sdl_core::canvas::CanvasInfo;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateCanvasRequest {
    #[serde(default)]
    pub name: String,
}

pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateCanvasRequest>,
) -> Result<Json<CanvasInfo>, AppError> {
    let name = if req.name.is_empty() {
        "canvas".to_string()
    } else {
        req.name
    };
    Ok(Json(state.manager.create(&name).await))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub limit: Option<usize>,
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<CanvasInfo>> {
    let infos = state.manager.list().await;
    let page: Vec<CanvasInfo> = infos
        .into_iter()
        .skip(query.offset)
        .take(query.limit.unwrap_or(usize::MAX))
        .collect();
    Json(page)
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CanvasInfo>, AppError> {
    let canvas = state.manager.get(id).await?;
    Ok(Json(canvas.info().await))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JsonValue>, AppError> {
    state.manager.delete(id).await?;
    Ok(Json(json!({ "deleted": id })))
}

pub async fn reset(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CanvasInfo>, AppError> {
    let canvas = state.manager.get(id).await?;
    canvas.reset().await;
    Ok(Json(canvas.info().await))
}
