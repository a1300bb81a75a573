//! System diagram and per-resource utilization.

use axum::extract::{Path, Query, State};
use axum::Json;
use sdl_core::canvas::{SystemDiagram, UtilizationReport};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub async fn system_diagram(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SystemDiagram>, AppError> {
    let canvas = state.manager.get(id).await?;
    Ok(Json(canvas.system_diagram().await?))
}

#[derive(Debug, Deserialize)]
pub struct UtilizationQuery {
    /// Comma-separated instance names; absent means all resources.
    #[serde(default)]
    pub components: Option<String>,
}

pub async fn utilization(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<UtilizationQuery>,
) -> Result<Json<Vec<UtilizationReport>>, AppError> {
    let canvas = state.manager.get(id).await?;
    let filter: Option<Vec<String>> = query
        .components
        .map(|c| c.split(',').map(|s| s.trim().to_string()).collect());
    Ok(Json(canvas.utilization(filter.as_deref()).await?))
}
