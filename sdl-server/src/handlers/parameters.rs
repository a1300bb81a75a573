//! Parameter reads and writes, single and batched. Batch writes are
//! all-or-nothing and report failure in the body rather than as an HTTP
//! error so callers can inspect the cause alongside the flag.

use axum::extract::{Path, Query, State};
use axum::Json;
use sdl_core::canvas::{ParamInfo, ParamUpdate};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct GetParamsQuery {
    #[serde(default)]
    pub path: Option<String>,
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<GetParamsQuery>,
) -> Result<Json<Vec<ParamInfo>>, AppError> {
    let canvas = state.manager.get(id).await?;
    Ok(Json(canvas.get_parameters(query.path.as_deref()).await?))
}

#[derive(Debug, Deserialize)]
pub struct SetParamRequest {
    pub path: String,
    pub expr: String,
}

pub async fn set(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<SetParamRequest>,
) -> Result<Json<JsonValue>, AppError> {
    let canvas = state.manager.get(id).await?;
    let outcome = canvas.set_parameter(&req.path, &req.expr).await?;
    Ok(Json(json!({
        "success": true,
        "path": outcome.path,
        "old_value": outcome.old_value,
        "new_value": outcome.new_value,
    })))
}

#[derive(Debug, Deserialize)]
pub struct BatchSetRequest {
    pub updates: Vec<ParamUpdate>,
}

pub async fn set_batch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<BatchSetRequest>,
) -> Result<Json<JsonValue>, AppError> {
    let canvas = state.manager.get(id).await?;
    match canvas.batch_set_parameters(req.updates).await {
        Ok(outcomes) => Ok(Json(json!({ "success": true, "results": outcomes }))),
        Err(e) => Ok(Json(json!({
            "success": false,
            "error": e.to_string(),
            "code": e.code(),
        }))),
    }
}
