//! Metric capture and windowed aggregation.
//!
//! Every traced exit event is offered to the hub; events matching an enabled
//! spec land in that metric's current time window. A series keeps a ring of
//! per-window buckets (count/sum/min/max plus a bounded reservoir for
//! percentiles). Subscribers get one batch per flush tick with one update
//! per changed metric; a subscriber that cannot keep up has its oldest
//! pending batches dropped and the drop count surfaced on the next delivered
//! batch.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, RwLock};
use uuid::Uuid;

use crate::error::{Result, SdlError};
use crate::natives;
use crate::system::SystemInstance;
use crate::trace::{TraceEvent, TraceKind};
use crate::types::Type;
use crate::value::Value;

const RING_WINDOWS: usize = 360;
const RESERVOIR_CAP: usize = 512;
const OUTBOX_CAP: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Count,
    Latency,
    Utilization,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Rate,
    Sum,
    Avg,
    Min,
    Max,
    P50,
    P90,
    P95,
    P99,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSpec {
    pub id: Uuid,
    pub name: String,
    pub component: String,
    pub methods: Vec<String>,
    pub metric_type: MetricType,
    pub aggregation: Aggregation,
    /// Window width in seconds; must be positive.
    pub window_secs: f64,
    /// Optional result predicate: only calls whose return value equals this
    /// expression (of `match_result_type`) are counted.
    #[serde(default)]
    pub match_result: Option<String>,
    #[serde(default)]
    pub match_result_type: Option<Type>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    /// Window start, seconds since the epoch.
    pub timestamp: f64,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricUpdate {
    pub metric_id: Uuid,
    #[serde(default)]
    pub point: Option<MetricPoint>,
    /// Terminating signal: the metric was deleted.
    #[serde(default)]
    pub closed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricBatch {
    pub updates: Vec<MetricUpdate>,
    /// Batches dropped for this subscriber since the last delivery.
    pub dropped: u64,
}

// ─── Windows ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Window {
    start: f64,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    reservoir: Vec<f64>,
    seen: u64,
}

impl Window {
    fn new(start: f64) -> Self {
        Self {
            start,
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            reservoir: Vec::new(),
            seen: 0,
        }
    }

    fn observe(&mut self, value: f64, rng: &mut impl Rng) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.seen += 1;
        if self.reservoir.len() < RESERVOIR_CAP {
            self.reservoir.push(value);
        } else {
            // Uniform reservoir sampling over everything seen this window.
            let slot = rng.gen_range(0..self.seen);
            if (slot as usize) < RESERVOIR_CAP {
                self.reservoir[slot as usize] = value;
            }
        }
    }

    fn aggregate(&self, aggregation: Aggregation, window_secs: f64) -> f64 {
        match aggregation {
            Aggregation::Rate => self.count as f64 / window_secs,
            Aggregation::Sum => self.sum,
            Aggregation::Avg => {
                if self.count == 0 {
                    0.0
                } else {
                    self.sum / self.count as f64
                }
            }
            Aggregation::Min => {
                if self.count == 0 {
                    0.0
                } else {
                    self.min
                }
            }
            Aggregation::Max => {
                if self.count == 0 {
                    0.0
                } else {
                    self.max
                }
            }
            Aggregation::P50 => self.percentile(0.50),
            Aggregation::P90 => self.percentile(0.90),
            Aggregation::P95 => self.percentile(0.95),
            Aggregation::P99 => self.percentile(0.99),
        }
    }

    /// Smallest sample whose cumulative fraction strictly exceeds `p`.
    fn percentile(&self, p: f64) -> f64 {
        if self.reservoir.is_empty() {
            return 0.0;
        }
        let mut sorted = self.reservoir.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let idx = ((p * sorted.len() as f64).floor() as usize).min(sorted.len() - 1);
        sorted[idx]
    }
}

struct Series {
    spec: MetricSpec,
    /// Evaluated `match_result`, compared structurally with return values.
    match_value: Option<Value>,
    windows: VecDeque<Window>,
    dirty: bool,
}

impl Series {
    fn window_for(&mut self, timestamp: f64) -> Option<&mut Window> {
        let w = self.spec.window_secs;
        let start = (timestamp / w).floor() * w;
        let newest_start = self.windows.back().map(|win| win.start);
        match newest_start {
            Some(s) if s == start => {}
            Some(s) if start > s => {
                self.windows.push_back(Window::new(start));
                if self.windows.len() > RING_WINDOWS {
                    self.windows.pop_front();
                }
            }
            Some(_) => {
                // Late event: land it in its own window if still retained.
                return self.windows.iter_mut().find(|win| win.start == start);
            }
            None => {
                self.windows.push_back(Window::new(start));
            }
        }
        self.windows.back_mut()
    }

    fn matches(&self, event: &TraceEvent) -> bool {
        if !self.spec.enabled || event.kind != TraceKind::Exit || event.is_error() {
            return false;
        }
        if event.component != self.spec.component {
            return false;
        }
        if !self.spec.methods.iter().any(|m| m == &event.method) {
            return false;
        }
        if let Some(expected) = &self.match_value {
            return event.return_value.as_ref() == Some(expected);
        }
        true
    }
}

// ─── Subscribers ──────────────────────────────────────────────

struct Subscriber {
    ids: HashSet<Uuid>,
    outbox: VecDeque<Vec<MetricUpdate>>,
    dropped: u64,
    notify: Arc<Notify>,
    closed: bool,
}

// ─── Hub ──────────────────────────────────────────────────────

struct HubInner {
    series: HashMap<Uuid, Series>,
    subscribers: HashMap<u64, Subscriber>,
    next_subscriber: u64,
    rng: rand::rngs::StdRng,
}

/// Shared metric state for one canvas.
pub struct MetricsHub {
    inner: RwLock<HubInner>,
}

impl Default for MetricsHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsHub {
    pub fn new() -> Self {
        use rand::SeedableRng;
        Self {
            inner: RwLock::new(HubInner {
                series: HashMap::new(),
                subscribers: HashMap::new(),
                next_subscriber: 0,
                rng: rand::rngs::StdRng::from_entropy(),
            }),
        }
    }

    pub async fn add_metric(&self, spec: MetricSpec) -> Result<()> {
        if spec.window_secs <= 0.0 {
            return Err(SdlError::InvalidArgument(
                "metric window must be positive".to_string(),
            ));
        }
        let match_value = match &spec.match_result {
            Some(src) => Some(crate::expr::parse_value_expr(src)?),
            None => None,
        };
        let mut inner = self.inner.write().await;
        inner.series.insert(
            spec.id,
            Series {
                spec,
                match_value,
                windows: VecDeque::new(),
                dirty: false,
            },
        );
        Ok(())
    }

    pub async fn list_metrics(&self) -> Vec<MetricSpec> {
        let inner = self.inner.read().await;
        let mut specs: Vec<MetricSpec> =
            inner.series.values().map(|s| s.spec.clone()).collect();
        specs.sort_by_key(|s| s.created_at);
        specs
    }

    /// Remove a metric, releasing its ring and signalling open streams.
    pub async fn delete_metric(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.series.remove(&id).is_none() {
            return Err(SdlError::NotFound(format!("no such metric: {id}")));
        }
        let update = MetricUpdate {
            metric_id: id,
            point: None,
            closed: true,
        };
        for sub in inner.subscribers.values_mut() {
            if sub.ids.is_empty() || sub.ids.contains(&id) {
                enqueue(sub, vec![update.clone()]);
            }
        }
        Ok(())
    }

    /// Offer a completed trace to every matching series. `now` is wall-clock
    /// seconds since the epoch.
    pub async fn record_trace(&self, events: &[TraceEvent], now: f64) {
        let mut inner = self.inner.write().await;
        let inner = &mut *inner;
        for event in events {
            for series in inner.series.values_mut() {
                if !series.matches(event) {
                    continue;
                }
                let contribution = match series.spec.metric_type {
                    MetricType::Count => 1.0,
                    MetricType::Latency => event.duration.unwrap_or(0.0),
                    // Utilization is sampled at window boundaries, not from
                    // trace events.
                    MetricType::Utilization => continue,
                };
                if let Some(window) = series.window_for(now) {
                    window.observe(contribution, &mut inner.rng);
                    series.dirty = true;
                }
            }
        }
    }

    /// Window-boundary sampling for utilization metrics.
    pub async fn sample_utilization(&self, system: &SystemInstance, now: f64) {
        let mut inner = self.inner.write().await;
        let inner = &mut *inner;
        for series in inner.series.values_mut() {
            if series.spec.metric_type != MetricType::Utilization || !series.spec.enabled {
                continue;
            }
            let Some(inst) = system.resolve(&series.spec.component) else {
                continue;
            };
            let Some(kind) = inst.decl.native else { continue };
            let Some(sample) = natives::utilization(kind, &inst.params) else {
                continue;
            };
            if let Some(window) = series.window_for(now) {
                window.observe(sample.utilization, &mut inner.rng);
                series.dirty = true;
            }
        }
    }

    /// Aggregated points for windows fully inside `[start, end]`. Newest
    /// first when limited, oldest first otherwise.
    pub async fn query(
        &self,
        id: Uuid,
        start: f64,
        end: f64,
        limit: Option<usize>,
    ) -> Result<Vec<MetricPoint>> {
        let inner = self.inner.read().await;
        let series = inner
            .series
            .get(&id)
            .ok_or_else(|| SdlError::NotFound(format!("no such metric: {id}")))?;
        let w = series.spec.window_secs;
        let mut points: Vec<MetricPoint> = series
            .windows
            .iter()
            .filter(|win| win.start >= start && win.start + w <= end)
            .map(|win| MetricPoint {
                timestamp: win.start,
                value: win.aggregate(series.spec.aggregation, w),
            })
            .collect();
        points.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        if let Some(limit) = limit {
            points = points.into_iter().rev().take(limit).collect();
        }
        Ok(points)
    }

    // ── Streaming ──

    pub async fn subscribe(&self, ids: Vec<Uuid>) -> (u64, Arc<Notify>) {
        let mut inner = self.inner.write().await;
        let id = inner.next_subscriber;
        inner.next_subscriber += 1;
        let notify = Arc::new(Notify::new());
        inner.subscribers.insert(
            id,
            Subscriber {
                ids: ids.into_iter().collect(),
                outbox: VecDeque::new(),
                dropped: 0,
                notify: notify.clone(),
                closed: false,
            },
        );
        (id, notify)
    }

    pub async fn unsubscribe(&self, subscriber: u64) {
        let mut inner = self.inner.write().await;
        inner.subscribers.remove(&subscriber);
    }

    /// Pop the next pending batch, attaching the drops accumulated since the
    /// last delivery. `None` means nothing is pending.
    pub async fn pop_batch(&self, subscriber: u64) -> Option<MetricBatch> {
        let mut inner = self.inner.write().await;
        let sub = inner.subscribers.get_mut(&subscriber)?;
        let updates = sub.outbox.pop_front()?;
        let dropped = sub.dropped;
        sub.dropped = 0;
        Some(MetricBatch { updates, dropped })
    }

    pub async fn subscriber_closed(&self, subscriber: u64) -> bool {
        let inner = self.inner.read().await;
        inner
            .subscribers
            .get(&subscriber)
            .map(|s| s.closed)
            .unwrap_or(true)
    }

    /// Mark every subscriber closed and wake them; used on canvas teardown.
    pub async fn close_all(&self) {
        let mut inner = self.inner.write().await;
        for sub in inner.subscribers.values_mut() {
            sub.closed = true;
            sub.notify.notify_one();
        }
    }

    /// Drop every series and terminate every stream; used by canvas reset.
    pub async fn reset(&self) {
        let mut inner = self.inner.write().await;
        inner.series.clear();
        for sub in inner.subscribers.values_mut() {
            sub.closed = true;
            sub.notify.notify_one();
        }
    }

    /// One tick: build an update per changed metric and fan out to
    /// subscribers.
    pub async fn flush(&self) {
        let mut inner = self.inner.write().await;
        let inner = &mut *inner;

        let mut updates: Vec<MetricUpdate> = Vec::new();
        for series in inner.series.values_mut() {
            if !series.dirty {
                continue;
            }
            series.dirty = false;
            if let Some(newest) = series.windows.back() {
                updates.push(MetricUpdate {
                    metric_id: series.spec.id,
                    point: Some(MetricPoint {
                        timestamp: newest.start,
                        value: newest.aggregate(series.spec.aggregation, series.spec.window_secs),
                    }),
                    closed: false,
                });
            }
        }
        if updates.is_empty() {
            return;
        }

        for sub in inner.subscribers.values_mut() {
            let relevant: Vec<MetricUpdate> = updates
                .iter()
                .filter(|u| sub.ids.is_empty() || sub.ids.contains(&u.metric_id))
                .cloned()
                .collect();
            if !relevant.is_empty() {
                enqueue(sub, relevant);
            }
        }
    }
}

/// Bounded enqueue with oldest-first loss accounting.
fn enqueue(sub: &mut Subscriber, updates: Vec<MetricUpdate>) {
    if sub.outbox.len() >= OUTBOX_CAP {
        sub.outbox.pop_front();
        sub.dropped += 1;
    }
    sub.outbox.push_back(updates);
    sub.notify.notify_one();
}
