//! Metric CRUD, point queries, and the SSE stream.
//!
//! The stream delivers one batch per aggregator tick. A subscriber that
//! stops reading has its oldest pending batches dropped inside the hub; the
//! accumulated drop count rides along on the next delivered batch.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::stream::{self, Stream};
use sdl_core::canvas::AddMetricRequest;
use sdl_core::metrics::{MetricPoint, MetricSpec, MetricsHub};
use sdl_core::SdlError;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub async fn add(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AddMetricRequest>,
) -> Result<Json<MetricSpec>, AppError> {
    let canvas = state.manager.get(id).await?;
    Ok(Json(canvas.add_metric(req).await?))
}

pub async fn list(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<MetricSpec>>, AppError> {
    let canvas = state.manager.get(id).await?;
    Ok(Json(canvas.metrics().list_metrics().await))
}

pub async fn delete(
    State(state): State<AppState>,
    Path((id, mid)): Path<(Uuid, Uuid)>,
) -> Result<Json<JsonValue>, AppError> {
    let canvas = state.manager.get(id).await?;
    canvas.metrics().delete_metric(mid).await?;
    Ok(Json(json!({ "deleted": mid })))
}

#[derive(Debug, Deserialize)]
pub struct PointsQuery {
    #[serde(default)]
    pub start: Option<f64>,
    #[serde(default)]
    pub end: Option<f64>,
    #[serde(default)]
    pub limit: Option<usize>,
}

pub async fn points(
    State(state): State<AppState>,
    Path((id, mid)): Path<(Uuid, Uuid)>,
    Query(query): Query<PointsQuery>,
) -> Result<Json<Vec<MetricPoint>>, AppError> {
    let canvas = state.manager.get(id).await?;
    let points = canvas
        .metrics()
        .query(
            mid,
            query.start.unwrap_or(0.0),
            query.end.unwrap_or(f64::MAX),
            query.limit,
        )
        .await?;
    Ok(Json(points))
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// Comma-separated metric ids; absent subscribes to all.
    #[serde(default)]
    pub ids: Option<String>,
}

/// Unsubscribes when the SSE connection goes away.
struct SubscriptionGuard {
    hub: Arc<MetricsHub>,
    subscriber: u64,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        let hub = self.hub.clone();
        let subscriber = self.subscriber;
        tokio::spawn(async move {
            hub.unsubscribe(subscriber).await;
        });
    }
}

pub async fn stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let canvas = state.manager.get(id).await?;
    let hub = canvas.metrics().clone();

    let ids = match query.ids {
        None => Vec::new(),
        Some(raw) => {
            let mut ids = Vec::new();
            for part in raw.split(',').filter(|p| !p.trim().is_empty()) {
                let id = Uuid::parse_str(part.trim()).map_err(|e| {
                    AppError(SdlError::InvalidArgument(format!(
                        "bad metric id {part:?}: {e}"
                    )))
                })?;
                ids.push(id);
            }
            ids
        }
    };

    let (subscriber, notify) = hub.subscribe(ids).await;
    let guard = SubscriptionGuard {
        hub: hub.clone(),
        subscriber,
    };

    let events = stream::unfold(
        (hub, subscriber, notify, guard),
        |(hub, subscriber, notify, guard)| async move {
            loop {
                if let Some(batch) = hub.pop_batch(subscriber).await {
                    let event = match Event::default().event("metrics").json_data(&batch) {
                        Ok(e) => e,
                        Err(_) => Event::default().comment("encoding error"),
                    };
                    return Some((Ok(event), (hub, subscriber, notify, guard)));
                }
                if hub.subscriber_closed(subscriber).await {
                    return None;
                }
                notify.notified().await;
            }
        },
    );

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
