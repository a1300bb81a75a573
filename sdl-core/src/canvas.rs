//! The canvas: one isolated modeling session.
//!
//! A canvas owns its loaded declarations, the active system instance, its
//! traffic generators, metric specs, and parameter overrides. All
//! control-plane mutations serialize behind the canvas write lock; evaluator
//! invocations — generator-driven calls and `ExecuteTrace` — take the read
//! guard and run concurrently. The system instance is swapped copy-on-write
//! on parameter writes, so calls already in flight keep the snapshot they
//! started with.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use uuid::Uuid;

use crate::ast::FileDecl;
use crate::error::{Result, SdlError};
use crate::eval::{self, CallResult};
use crate::expr::parse_value_expr;
use crate::flow::{self, FlowOutcome, PathNode, RateSeed};
use crate::generator::{
    apply_patch, BulkToggleOutcome, GeneratorPatch, GeneratorSpec,
};
use crate::metrics::{Aggregation, MetricSpec, MetricType, MetricsHub};
use crate::natives;
use crate::parser::DslParser;
use crate::resolver::{FileResolver, Resolved};
use crate::system::{build_system, DeclScope, SystemInstance};
use crate::trace::TraceEvent;
use crate::types::Type;
use crate::value::Value;

const FLUSH_INTERVAL: Duration = Duration::from_millis(1000);
const DEFAULT_TRACE_DEPTH: usize = 8;

pub fn now_secs() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

// ─── Wire-facing types ────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasInfo {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub active_system: Option<String>,
    #[serde(default)]
    pub loaded_files: Vec<String>,
    pub generator_count: usize,
    pub metric_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadedFile {
    pub path: String,
    pub components: Vec<String>,
    pub systems: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddGeneratorRequest {
    pub name: String,
    pub component: String,
    pub method: String,
    pub rate: f64,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratorStatus {
    #[serde(flatten)]
    pub spec: GeneratorSpec,
    /// Scheduling overruns since the worker started.
    pub overruns: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddMetricRequest {
    pub name: String,
    pub component: String,
    pub methods: Vec<String>,
    pub metric_type: MetricType,
    pub aggregation: Aggregation,
    pub window_secs: f64,
    #[serde(default)]
    pub match_result: Option<String>,
    #[serde(default)]
    pub match_result_type: Option<Type>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamInfo {
    pub path: String,
    pub value: Value,
    /// True when the value came from a `SetParameter` override rather than
    /// the declaration default.
    pub overridden: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetParamOutcome {
    pub path: String,
    #[serde(default)]
    pub old_value: Option<Value>,
    pub new_value: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParamUpdate {
    pub path: String,
    pub expr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowState {
    #[serde(default)]
    pub last: Option<FlowOutcome>,
    pub manual_overrides: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceResponse {
    pub events: Vec<TraceEvent>,
    pub latency: f64,
    #[serde(default)]
    pub error: Option<String>,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagramNode {
    pub component: String,
    pub method: String,
    /// Calls/sec from the latest flow snapshot.
    pub traffic: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagramEdge {
    pub from: String,
    pub to: String,
    /// Position among the from-node's outgoing edges.
    pub order: usize,
    #[serde(default)]
    pub condition: Option<String>,
    pub probability: f64,
    pub rate: f64,
    #[serde(default)]
    pub generator_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemDiagram {
    pub system: String,
    pub nodes: Vec<DiagramNode>,
    pub edges: Vec<DiagramEdge>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtilizationReport {
    pub component: String,
    pub utilization: f64,
    pub capacity: f64,
    pub current_load: f64,
    pub is_bottleneck: bool,
    pub warning_threshold: f64,
    pub critical_threshold: f64,
}

// ─── Canvas ───────────────────────────────────────────────────

struct WorkerHandle {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
    overruns: Arc<AtomicU64>,
}

struct CanvasState {
    scope: DeclScope,
    loaded_files: HashMap<String, LoadedFile>,
    system: Option<Arc<SystemInstance>>,
    generators: HashMap<Uuid, GeneratorSpec>,
    workers: HashMap<Uuid, WorkerHandle>,
    overrides: HashMap<String, Value>,
    flow: Option<FlowOutcome>,
    flusher: Option<JoinHandle<()>>,
}

pub struct Canvas {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    state: RwLock<CanvasState>,
    metrics: Arc<MetricsHub>,
    resolver: Arc<dyn FileResolver>,
    parser: Arc<dyn DslParser>,
    seed_counter: AtomicU64,
    /// Back-reference handed to worker tasks, installed by `new_arc`.
    self_ref: Weak<Canvas>,
}

impl Canvas {
    fn new_arc(
        name: String,
        resolver: Arc<dyn FileResolver>,
        parser: Arc<dyn DslParser>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            id: Uuid::new_v4(),
            name,
            created_at: Utc::now(),
            state: RwLock::new(CanvasState {
                scope: DeclScope::with_builtins(),
                loaded_files: HashMap::new(),
                system: None,
                generators: HashMap::new(),
                workers: HashMap::new(),
                overrides: HashMap::new(),
                flow: None,
                flusher: None,
            }),
            metrics: Arc::new(MetricsHub::new()),
            resolver,
            parser,
            seed_counter: AtomicU64::new(1),
            self_ref: weak.clone(),
        })
    }

    pub fn metrics(&self) -> &Arc<MetricsHub> {
        &self.metrics
    }

    fn next_seed(&self) -> u64 {
        self.seed_counter.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn info(&self) -> CanvasInfo {
        let state = self.state.read().await;
        let mut loaded_files: Vec<String> = state.loaded_files.keys().cloned().collect();
        loaded_files.sort();
        CanvasInfo {
            id: self.id,
            name: self.name.clone(),
            created_at: self.created_at,
            active_system: state.system.as_ref().map(|s| s.name.clone()),
            loaded_files,
            generator_count: state.generators.len(),
            metric_count: self.metrics.list_metrics().await.len(),
        }
    }

    // ── Files and activation ──

    pub async fn load_file(&self, path: &str) -> Result<LoadedFile> {
        let resolved = self.resolver.resolve("", path, true).await?;
        let (canonical, source) = match resolved {
            Resolved::Content { canonical, source } => (canonical, source),
            Resolved::Exists { canonical } => {
                return Err(SdlError::Internal(anyhow::anyhow!(
                    "resolver returned no content for {canonical}"
                )))
            }
        };
        let decl: FileDecl = self.parser.parse_file(&canonical, &source)?;

        let loaded = LoadedFile {
            path: canonical.clone(),
            components: decl.components.iter().map(|c| c.name.clone()).collect(),
            systems: decl.systems.iter().map(|s| s.name.clone()).collect(),
        };
        let mut state = self.state.write().await;
        state.scope.absorb(&decl);
        state.loaded_files.insert(canonical, loaded.clone());
        tracing::info!(canvas = %self.id, path = %loaded.path, "loaded file");
        Ok(loaded)
    }

    pub async fn use_system(&self, system_name: &str) -> Result<CanvasInfo> {
        let mut state = self.state.write().await;
        let system = build_system(&state.scope, system_name)?;
        state.system = Some(Arc::new(system));
        state.overrides.clear();
        state.flow = None;
        tracing::info!(canvas = %self.id, system = system_name, "activated system");
        drop(state);
        Ok(self.info().await)
    }

    // ── Generators ──

    pub async fn add_generator(&self, req: AddGeneratorRequest) -> Result<GeneratorSpec> {
        let spec = GeneratorSpec {
            id: Uuid::new_v4(),
            name: req.name,
            component: req.component,
            method: req.method,
            rate: req.rate,
            duration: req.duration,
            enabled: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        spec.validate()?;

        let mut state = self.state.write().await;
        self.validate_target(&state, &spec.component, &spec.method)?;
        state.generators.insert(spec.id, spec.clone());
        drop(state);

        if req.enabled {
            self.start_generator_inner(spec.id).await?;
        }
        Ok(spec)
    }

    fn validate_target(&self, state: &CanvasState, component: &str, method: &str) -> Result<()> {
        let system = state
            .system
            .as_ref()
            .ok_or_else(|| SdlError::FailedPrecondition("no active system".to_string()))?;
        let inst = system
            .resolve(component)
            .ok_or_else(|| SdlError::NotFound(format!("no such component: {component}")))?;
        if inst.decl.method(method).is_none() {
            return Err(SdlError::NotFound(format!(
                "{} has no method {method}",
                inst.decl.name
            )));
        }
        Ok(())
    }

    pub async fn list_generators(&self) -> Vec<GeneratorStatus> {
        let state = self.state.read().await;
        let mut out: Vec<GeneratorStatus> = state
            .generators
            .values()
            .map(|spec| GeneratorStatus {
                spec: spec.clone(),
                overruns: state
                    .workers
                    .get(&spec.id)
                    .map(|w| w.overruns.load(Ordering::Relaxed))
                    .unwrap_or(0),
            })
            .collect();
        out.sort_by_key(|g| g.spec.created_at);
        out
    }

    pub async fn get_generator(&self, id: Uuid) -> Result<GeneratorSpec> {
        let state = self.state.read().await;
        state
            .generators
            .get(&id)
            .cloned()
            .ok_or_else(|| SdlError::NotFound(format!("no such generator: {id}")))
    }

    pub async fn update_generator(
        &self,
        id: Uuid,
        patch: GeneratorPatch,
        field_mask: Vec<String>,
    ) -> Result<GeneratorSpec> {
        let (spec, was_running, needs_restart) = {
            let mut state = self.state.write().await;
            let mut spec = state
                .generators
                .get(&id)
                .cloned()
                .ok_or_else(|| SdlError::NotFound(format!("no such generator: {id}")))?;
            let effect = apply_patch(&mut spec, &patch, &field_mask)?;
            if effect.target_changed {
                self.validate_target(&state, &spec.component, &spec.method)?;
            }
            let was_running = state.workers.contains_key(&id);
            state.generators.insert(id, spec.clone());
            (
                spec,
                was_running,
                effect.target_changed || effect.rate_changed,
            )
        };

        // A running worker restarts to pick up the new target or cadence.
        if was_running && needs_restart {
            self.halt_worker(id).await;
            let mut state = self.state.write().await;
            if state.generators.contains_key(&id) {
                self.spawn_worker_locked(&mut state, &spec);
            }
        }
        Ok(spec)
    }

    pub async fn start_generator(&self, id: Uuid) -> Result<bool> {
        self.start_generator_inner(id).await
    }

    /// Returns true if the generator transitioned to running.
    async fn start_generator_inner(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.workers.contains_key(&id) {
            if !state.generators.contains_key(&id) {
                return Err(SdlError::NotFound(format!("no such generator: {id}")));
            }
            return Ok(false);
        }
        let spec = {
            let spec = state
                .generators
                .get_mut(&id)
                .ok_or_else(|| SdlError::NotFound(format!("no such generator: {id}")))?;
            spec.enabled = true;
            spec.updated_at = Utc::now();
            spec.clone()
        };
        self.spawn_worker_locked(&mut state, &spec);
        Ok(true)
    }

    /// Returns true if the generator transitioned to stopped.
    pub async fn stop_generator(&self, id: Uuid) -> Result<bool> {
        {
            let mut state = self.state.write().await;
            if !state.generators.contains_key(&id) {
                return Err(SdlError::NotFound(format!("no such generator: {id}")));
            }
            if !state.workers.contains_key(&id) {
                return Ok(false);
            }
            let spec = state.generators.get_mut(&id).unwrap();
            spec.enabled = false;
            spec.updated_at = Utc::now();
        }
        self.halt_worker(id).await;
        Ok(true)
    }

    pub async fn start_all(&self) -> BulkToggleOutcome {
        let ids: Vec<Uuid> = {
            let state = self.state.read().await;
            state.generators.keys().copied().collect()
        };
        let mut outcome = BulkToggleOutcome {
            total: ids.len(),
            ..Default::default()
        };
        for id in ids {
            match self.start_generator_inner(id).await {
                Ok(true) => outcome.changed += 1,
                Ok(false) => outcome.already_in_state += 1,
                Err(_) => outcome.failed.push(id),
            }
        }
        outcome
    }

    pub async fn stop_all(&self) -> BulkToggleOutcome {
        let ids: Vec<Uuid> = {
            let state = self.state.read().await;
            state.generators.keys().copied().collect()
        };
        let mut outcome = BulkToggleOutcome {
            total: ids.len(),
            ..Default::default()
        };
        for id in ids {
            match self.stop_generator(id).await {
                Ok(true) => outcome.changed += 1,
                Ok(false) => outcome.already_in_state += 1,
                Err(_) => outcome.failed.push(id),
            }
        }
        outcome
    }

    pub async fn delete_generator(&self, id: Uuid) -> Result<()> {
        {
            let state = self.state.read().await;
            if !state.generators.contains_key(&id) {
                return Err(SdlError::NotFound(format!("no such generator: {id}")));
            }
        }
        self.halt_worker(id).await;
        let mut state = self.state.write().await;
        state.generators.remove(&id);
        Ok(())
    }

    fn spawn_worker_locked(&self, state: &mut CanvasState, spec: &GeneratorSpec) {
        let Some(canvas) = self.self_ref.upgrade() else {
            return;
        };
        let (stop_tx, stop_rx) = watch::channel(false);
        let overruns = Arc::new(AtomicU64::new(0));
        let handle = tokio::spawn(worker_loop(canvas, spec.clone(), overruns.clone(), stop_rx));
        state.workers.insert(
            spec.id,
            WorkerHandle {
                stop: stop_tx,
                handle,
                overruns,
            },
        );
    }

    async fn halt_worker(&self, id: Uuid) {
        let handle = {
            let mut state = self.state.write().await;
            state.workers.remove(&id)
        };
        if let Some(worker) = handle {
            let _ = worker.stop.send(true);
            let _ = worker.handle.await;
        }
    }

    /// Called by a worker whose bounded duration elapsed.
    async fn generator_expired(&self, id: Uuid) {
        let mut state = self.state.write().await;
        if let Some(spec) = state.generators.get_mut(&id) {
            spec.enabled = false;
            spec.updated_at = Utc::now();
        }
        state.workers.remove(&id);
    }

    // ── Parameters ──

    pub async fn set_parameter(&self, path: &str, expr: &str) -> Result<SetParamOutcome> {
        let value = parse_value_expr(expr)?;
        let mut state = self.state.write().await;
        let outcome = Self::apply_parameter(&mut state, path, value)?;
        Ok(outcome)
    }

    /// All-or-nothing batch write: every update is validated against the
    /// current snapshot before any is applied.
    pub async fn batch_set_parameters(
        &self,
        updates: Vec<ParamUpdate>,
    ) -> Result<Vec<SetParamOutcome>> {
        let mut state = self.state.write().await;

        let mut staged = Vec::with_capacity(updates.len());
        for u in &updates {
            let value = parse_value_expr(&u.expr)?;
            Self::check_parameter(&state, &u.path)?;
            staged.push((u.path.clone(), value));
        }

        let mut outcomes = Vec::with_capacity(staged.len());
        for (path, value) in staged {
            outcomes.push(Self::apply_parameter(&mut state, &path, value)?);
        }
        Ok(outcomes)
    }

    fn check_parameter(state: &CanvasState, path: &str) -> Result<()> {
        let system = state
            .system
            .as_ref()
            .ok_or_else(|| SdlError::FailedPrecondition("no active system".to_string()))?;
        let (inst_path, param) = path
            .rsplit_once('.')
            .ok_or_else(|| SdlError::InvalidArgument(format!("malformed path: {path}")))?;
        let inst = system
            .resolve(inst_path)
            .ok_or_else(|| SdlError::NotFound(format!("no such component: {inst_path}")))?;
        if inst.decl.param(param).is_none() {
            return Err(SdlError::NotFound(format!(
                "{} has no parameter {param}",
                inst.decl.name
            )));
        }
        Ok(())
    }

    fn apply_parameter(
        state: &mut CanvasState,
        path: &str,
        value: Value,
    ) -> Result<SetParamOutcome> {
        Self::check_parameter(state, path)?;
        let system = state
            .system
            .as_ref()
            .ok_or_else(|| SdlError::FailedPrecondition("no active system".to_string()))?;
        let (inst_path, param) = path
            .rsplit_once('.')
            .ok_or_else(|| SdlError::InvalidArgument(format!("malformed path: {path}")))?;

        // Copy-on-write swap: in-flight calls keep their snapshot.
        let mut next = (**system).clone();
        let inst_name = next
            .resolve(inst_path)
            .map(|i| i.name.clone())
            .ok_or_else(|| SdlError::NotFound(format!("no such component: {inst_path}")))?;
        let old_value = next
            .instances
            .get_mut(&inst_name)
            .and_then(|inst| inst.params.insert(param.to_string(), value.clone()));
        state.system = Some(Arc::new(next));
        state.overrides.insert(path.to_string(), value.clone());

        Ok(SetParamOutcome {
            path: path.to_string(),
            old_value,
            new_value: value,
        })
    }

    pub async fn get_parameters(&self, path: Option<&str>) -> Result<Vec<ParamInfo>> {
        let state = self.state.read().await;
        let system = state
            .system
            .as_ref()
            .ok_or_else(|| SdlError::FailedPrecondition("no active system".to_string()))?;

        let mut out = Vec::new();
        match path {
            None => {
                for inst in system.instances.values() {
                    for (name, value) in &inst.params {
                        let full = format!("{}.{}", inst.name, name);
                        out.push(ParamInfo {
                            overridden: state.overrides.contains_key(&full),
                            path: full,
                            value: value.clone(),
                        });
                    }
                }
            }
            Some(p) => {
                if let Some(inst) = system.resolve(p) {
                    for (name, value) in &inst.params {
                        let full = format!("{}.{}", inst.name, name);
                        out.push(ParamInfo {
                            overridden: state.overrides.contains_key(&full),
                            path: full,
                            value: value.clone(),
                        });
                    }
                } else if let Some(value) = system.parameter(p) {
                    out.push(ParamInfo {
                        path: p.to_string(),
                        value: value.clone(),
                        overridden: state.overrides.contains_key(p),
                    });
                } else {
                    return Err(SdlError::NotFound(format!("no such path: {p}")));
                }
            }
        }
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    // ── Flows ──

    pub async fn evaluate_flows(
        &self,
        strategy: &str,
        deadline: Option<Duration>,
    ) -> Result<FlowOutcome> {
        if strategy != "runtime" {
            return Err(SdlError::InvalidArgument(format!(
                "unknown flow strategy: {strategy}"
            )));
        }
        let mut state = self.state.write().await;
        let system = state
            .system
            .as_ref()
            .ok_or_else(|| SdlError::FailedPrecondition("no active system".to_string()))?
            .clone();

        let seeds: Vec<RateSeed> = state
            .generators
            .values()
            .filter(|g| g.enabled)
            .map(|g| RateSeed {
                generator_id: g.id,
                component: g.component.clone(),
                method: g.method.clone(),
                rate: g.rate,
            })
            .collect();

        let outcome = flow::evaluate_flows(
            &system,
            &seeds,
            deadline.map(|d| std::time::Instant::now() + d),
        );

        // Feed settled arrival rates back into the contention models,
        // copy-on-write like any other parameter change.
        let manual: HashSet<String> = state.overrides.keys().cloned().collect();
        let mut next = (*system).clone();
        flow::apply_arrival_rates(&mut next, &outcome.rates, &manual);
        state.system = Some(Arc::new(next));
        state.flow = Some(outcome.clone());
        Ok(outcome)
    }

    pub async fn flow_state(&self) -> Result<FlowState> {
        let state = self.state.read().await;
        Ok(FlowState {
            last: state.flow.clone(),
            manual_overrides: state.overrides.clone(),
        })
    }

    // ── Tracing ──

    /// Run one call and return the full event tree without recording it to
    /// metrics. Evaluation errors are surfaced in the response.
    pub async fn execute_trace(
        &self,
        component: &str,
        method: &str,
        seed: Option<u64>,
    ) -> Result<TraceResponse> {
        let system = {
            let state = self.state.read().await;
            let system = state
                .system
                .as_ref()
                .ok_or_else(|| SdlError::FailedPrecondition("no active system".to_string()))?
                .clone();
            self.validate_target(&state, component, method)?;
            system
        };
        let seed = seed.unwrap_or_else(|| self.next_seed());
        let mut result: CallResult = eval::execute(&system, component, method, Vec::new(), seed);
        result
            .trace
            .sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Ok(TraceResponse {
            events: result.trace,
            latency: result.latency,
            error: result.error,
            value: result.value,
        })
    }

    pub async fn trace_all_paths(
        &self,
        component: &str,
        method: &str,
        max_depth: Option<usize>,
    ) -> Result<PathNode> {
        let state = self.state.read().await;
        let system = state
            .system
            .as_ref()
            .ok_or_else(|| SdlError::FailedPrecondition("no active system".to_string()))?;
        flow::trace_all_paths(
            system,
            component,
            method,
            max_depth.unwrap_or(DEFAULT_TRACE_DEPTH),
        )
        .ok_or_else(|| SdlError::NotFound(format!("no such component: {component}")))
    }

    // ── Metrics ──

    pub async fn add_metric(&self, req: AddMetricRequest) -> Result<MetricSpec> {
        let spec = MetricSpec {
            id: Uuid::new_v4(),
            name: req.name,
            component: req.component,
            methods: req.methods,
            metric_type: req.metric_type,
            aggregation: req.aggregation,
            window_secs: req.window_secs,
            match_result: req.match_result,
            match_result_type: req.match_result_type,
            enabled: req.enabled,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.metrics.add_metric(spec.clone()).await?;
        Ok(spec)
    }

    // ── Diagram and utilization ──

    pub async fn system_diagram(&self) -> Result<SystemDiagram> {
        let (system, flow_outcome) = {
            let state = self.state.read().await;
            let system = state
                .system
                .as_ref()
                .ok_or_else(|| SdlError::FailedPrecondition("no active system".to_string()))?
                .clone();
            (system, state.flow.clone())
        };

        let rates = flow_outcome
            .as_ref()
            .map(|f| f.rates.clone())
            .unwrap_or_default();

        let mut graph: DiGraph<DiagramNode, DiagramEdge> = DiGraph::new();
        let mut index: HashMap<String, NodeIndex> = HashMap::new();

        let mut names: Vec<&String> = system.instances.keys().collect();
        names.sort();
        for name in names {
            let inst = &system.instances[name];
            for m in &inst.decl.methods {
                let key = format!("{}.{}", inst.name, m.name);
                let idx = graph.add_node(DiagramNode {
                    component: inst.name.clone(),
                    method: m.name.clone(),
                    traffic: rates.get(&key).copied().unwrap_or(0.0),
                });
                index.insert(key, idx);
            }
        }

        if let Some(outcome) = &flow_outcome {
            for edge in &outcome.edges {
                let to = format!("{}.{}", edge.to_component, edge.to_method);
                let Some(&to_idx) = index.get(&to) else { continue };
                let from = format!("{}.{}", edge.from_component, edge.from_method);
                let from_idx = match index.get(&from) {
                    Some(idx) => *idx,
                    // Generator-origin edges come from the pseudo traffic
                    // node; attach them to the target as self-loops in the
                    // serialized list only.
                    None => to_idx,
                };
                let order = graph
                    .edges(from_idx)
                    .count();
                graph.add_edge(
                    from_idx,
                    to_idx,
                    DiagramEdge {
                        from: if edge.generator_id.is_some() {
                            "traffic".to_string()
                        } else {
                            from.clone()
                        },
                        to,
                        order,
                        condition: edge.condition.clone(),
                        probability: edge.probability,
                        rate: edge.rate,
                        generator_id: edge.generator_id,
                    },
                );
            }
        }

        Ok(SystemDiagram {
            system: system.name.clone(),
            nodes: graph.node_weights().cloned().collect(),
            edges: graph.edge_weights().cloned().collect(),
        })
    }

    pub async fn utilization(&self, components: Option<&[String]>) -> Result<Vec<UtilizationReport>> {
        let state = self.state.read().await;
        let system = state
            .system
            .as_ref()
            .ok_or_else(|| SdlError::FailedPrecondition("no active system".to_string()))?;

        let mut reports = Vec::new();
        for inst in system.instances.values() {
            if let Some(filter) = components {
                if !filter.iter().any(|c| c == &inst.name) {
                    continue;
                }
            }
            let Some(kind) = inst.decl.native else { continue };
            let Some(sample) = natives::utilization(kind, &inst.params) else {
                continue;
            };
            reports.push(UtilizationReport {
                component: inst.name.clone(),
                utilization: sample.utilization,
                capacity: sample.capacity,
                current_load: sample.current_load,
                is_bottleneck: false,
                warning_threshold: 0.8,
                critical_threshold: 0.95,
            });
        }
        let max = reports
            .iter()
            .map(|r| r.utilization)
            .fold(f64::NEG_INFINITY, f64::max);
        for r in &mut reports {
            r.is_bottleneck = r.utilization >= 0.8 && r.utilization == max;
        }
        reports.sort_by(|a, b| a.component.cmp(&b.component));
        Ok(reports)
    }

    // ── Teardown ──

    /// Stop every worker, terminate streams, and clear all session state.
    pub async fn reset(&self) {
        let workers: Vec<WorkerHandle> = {
            let mut state = self.state.write().await;
            state.workers.drain().map(|(_, w)| w).collect()
        };
        for worker in workers {
            let _ = worker.stop.send(true);
            let _ = worker.handle.await;
        }
        self.metrics.reset().await;

        let mut state = self.state.write().await;
        state.scope = DeclScope::with_builtins();
        state.loaded_files.clear();
        state.system = None;
        state.generators.clear();
        state.overrides.clear();
        state.flow = None;
        tracing::info!(canvas = %self.id, "canvas reset");
    }

    /// Full teardown for canvas deletion.
    async fn shutdown(&self) {
        let (workers, flusher) = {
            let mut state = self.state.write().await;
            let workers: Vec<WorkerHandle> = state.workers.drain().map(|(_, w)| w).collect();
            (workers, state.flusher.take())
        };
        for worker in workers {
            let _ = worker.stop.send(true);
            let _ = worker.handle.await;
        }
        if let Some(flusher) = flusher {
            flusher.abort();
        }
        self.metrics.close_all().await;
    }
}

// ─── Worker loop ──────────────────────────────────────────────

async fn worker_loop(
    canvas: Arc<Canvas>,
    spec: GeneratorSpec,
    overruns: Arc<AtomicU64>,
    mut stop: watch::Receiver<bool>,
) {
    if spec.rate <= 0.0 {
        // Zero rate: park until stopped.
        let _ = stop.changed().await;
        return;
    }
    let period = Duration::from_secs_f64(1.0 / spec.rate);
    let grace = std::cmp::max(period.mul_f64(2.0), Duration::from_millis(100));
    let started = Instant::now();
    let mut next = Instant::now() + period;

    loop {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            _ = sleep_until(next) => {}
        }
        if *stop.borrow() {
            break;
        }
        if spec.duration > 0.0 && started.elapsed().as_secs_f64() >= spec.duration {
            canvas.generator_expired(spec.id).await;
            break;
        }

        // Snapshot under the read guard, evaluate outside it.
        let system = {
            let state = canvas.state.read().await;
            state.system.clone()
        };
        if let Some(system) = system {
            let seed = canvas.next_seed();
            let result = eval::execute(&system, &spec.component, &spec.method, Vec::new(), seed);
            canvas.metrics.record_trace(&result.trace, now_secs()).await;
        }

        next += period;
        let now = Instant::now();
        if now > next + grace {
            // Fell behind: drop the missed ticks rather than bursting.
            let missed =
                (now.duration_since(next).as_secs_f64() / period.as_secs_f64()).floor() as u64;
            overruns.fetch_add(missed.max(1), Ordering::Relaxed);
            tracing::warn!(
                generator = %spec.name,
                missed,
                "generator overran its schedule; dropping missed ticks"
            );
            next = now + period;
        }
    }
}

// ─── Registry ─────────────────────────────────────────────────

/// Process-wide canvas registry — the only global state in the engine.
pub struct CanvasManager {
    canvases: RwLock<HashMap<Uuid, Arc<Canvas>>>,
    resolver: Arc<dyn FileResolver>,
    parser: Arc<dyn DslParser>,
}

impl CanvasManager {
    pub fn new(resolver: Arc<dyn FileResolver>, parser: Arc<dyn DslParser>) -> Self {
        Self {
            canvases: RwLock::new(HashMap::new()),
            resolver,
            parser,
        }
    }

    pub async fn create(&self, name: &str) -> CanvasInfo {
        let canvas = Canvas::new_arc(
            name.to_string(),
            self.resolver.clone(),
            self.parser.clone(),
        );

        // Periodic flusher: utilization sampling + subscriber fan-out.
        let weak = Arc::downgrade(&canvas);
        let flusher = tokio::spawn(async move {
            let mut tick = tokio::time::interval(FLUSH_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                let Some(canvas) = weak.upgrade() else { break };
                let system = {
                    let state = canvas.state.read().await;
                    state.system.clone()
                };
                if let Some(system) = system {
                    canvas
                        .metrics
                        .sample_utilization(&system, now_secs())
                        .await;
                }
                canvas.metrics.flush().await;
            }
        });
        canvas.state.write().await.flusher = Some(flusher);

        let info = canvas.info().await;
        self.canvases.write().await.insert(canvas.id, canvas);
        tracing::info!(canvas = %info.id, name = %info.name, "created canvas");
        info
    }

    pub async fn get(&self, id: Uuid) -> Result<Arc<Canvas>> {
        let canvases = self.canvases.read().await;
        canvases
            .get(&id)
            .cloned()
            .ok_or_else(|| SdlError::NotFound(format!("no such canvas: {id}")))
    }

    pub async fn list(&self) -> Vec<CanvasInfo> {
        let canvases: Vec<Arc<Canvas>> = {
            let map = self.canvases.read().await;
            map.values().cloned().collect()
        };
        let mut infos = Vec::with_capacity(canvases.len());
        for c in canvases {
            infos.push(c.info().await);
        }
        infos.sort_by_key(|i| i.created_at);
        infos
    }

    /// Delete a canvas: cancel its workers and streams, then drop it.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let canvas = {
            let mut map = self.canvases.write().await;
            map.remove(&id)
                .ok_or_else(|| SdlError::NotFound(format!("no such canvas: {id}")))?
        };
        canvas.shutdown().await;
        tracing::info!(canvas = %id, "deleted canvas");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{
        ComponentDecl, DepBinding, InstanceDecl, MethodDecl, ParamBinding, Stmt, SystemDecl,
        UsesDecl,
    };
    use crate::ast::{Expr, UnOp};
    use crate::parser::AstJsonParser;
    use crate::resolver::MemoryResolver;

    fn demo_file() -> FileDecl {
        let server = ComponentDecl {
            name: "Server".to_string(),
            params: Vec::new(),
            uses: vec![
                UsesDecl {
                    name: "cache".to_string(),
                    component_type: "Cache".to_string(),
                },
                UsesDecl {
                    name: "db".to_string(),
                    component_type: "Db".to_string(),
                },
            ],
            methods: vec![MethodDecl {
                name: "HandleRequest".to_string(),
                params: Vec::new(),
                returns: None,
                body: vec![
                    Stmt::Let {
                        name: "hit".to_string(),
                        expr: Expr::call_dep("cache", "Read", vec![]),
                    },
                    Stmt::If {
                        cond: Expr::Unary {
                            op: UnOp::Not,
                            operand: Box::new(Expr::ident("hit")),
                        },
                        then_body: vec![Stmt::Expr {
                            expr: Expr::call_dep("db", "Query", vec![]),
                        }],
                        else_body: Vec::new(),
                    },
                    Stmt::Return {
                        expr: Some(Expr::ident("hit")),
                    },
                ],
            }],
            native: None,
        };
        let db = ComponentDecl {
            name: "Db".to_string(),
            params: Vec::new(),
            uses: Vec::new(),
            methods: vec![MethodDecl {
                name: "Query".to_string(),
                params: Vec::new(),
                returns: None,
                body: vec![Stmt::Delay {
                    expr: Expr::lit(Value::Duration(0.002)),
                }],
            }],
            native: None,
        };
        FileDecl {
            path: String::new(),
            components: vec![server, db],
            systems: vec![SystemDecl {
                name: "Main".to_string(),
                instances: vec![
                    InstanceDecl {
                        name: "server".to_string(),
                        component: "Server".to_string(),
                        params: Vec::new(),
                        bindings: vec![
                            DepBinding {
                                slot: "cache".to_string(),
                                target: "cache".to_string(),
                            },
                            DepBinding {
                                slot: "db".to_string(),
                                target: "db".to_string(),
                            },
                        ],
                    },
                    InstanceDecl {
                        name: "cache".to_string(),
                        component: "Cache".to_string(),
                        params: vec![ParamBinding {
                            name: "HitRate".to_string(),
                            expr: Expr::lit(Value::Float(0.8)),
                        }],
                        bindings: Vec::new(),
                    },
                    InstanceDecl {
                        name: "db".to_string(),
                        component: "Db".to_string(),
                        params: Vec::new(),
                        bindings: Vec::new(),
                    },
                    InstanceDecl {
                        name: "pool".to_string(),
                        component: "ResourcePool".to_string(),
                        params: Vec::new(),
                        bindings: Vec::new(),
                    },
                ],
            }],
        }
    }

    async fn active_canvas() -> (CanvasManager, Arc<Canvas>) {
        let source = serde_json::to_string(&demo_file()).expect("serialize demo file");
        let resolver = MemoryResolver::new().with_file("app.sdl", &source);
        let manager = CanvasManager::new(Arc::new(resolver), Arc::new(AstJsonParser));
        let info = manager.create("test").await;
        let canvas = manager.get(info.id).await.unwrap();
        canvas.load_file("app.sdl").await.unwrap();
        canvas.use_system("Main").await.unwrap();
        (manager, canvas)
    }

    fn gen_request(rate: f64) -> AddGeneratorRequest {
        AddGeneratorRequest {
            name: "load".to_string(),
            component: "server".to_string(),
            method: "HandleRequest".to_string(),
            rate,
            duration: 0.0,
            enabled: false,
        }
    }

    #[tokio::test]
    async fn generator_lifecycle_counts() {
        let (_mgr, canvas) = active_canvas().await;
        let spec = canvas.add_generator(gen_request(5.0)).await.unwrap();
        assert!(!spec.enabled);

        let started = canvas.start_all().await;
        assert_eq!(started.total, 1);
        assert_eq!(started.changed, 1);
        assert_eq!(started.already_in_state, 0);

        // Idempotent start.
        assert!(!canvas.start_generator(spec.id).await.unwrap());

        assert!(canvas.stop_generator(spec.id).await.unwrap());
        let stopped = canvas.stop_all().await;
        assert_eq!(stopped.changed, 0);
        assert_eq!(stopped.already_in_state, 1);
    }

    #[tokio::test]
    async fn add_generator_validates_target() {
        let (_mgr, canvas) = active_canvas().await;
        let mut req = gen_request(1.0);
        req.component = "ghost".to_string();
        assert!(matches!(
            canvas.add_generator(req).await,
            Err(SdlError::NotFound(_))
        ));

        let mut req = gen_request(1.0);
        req.method = "NoSuchMethod".to_string();
        assert!(matches!(
            canvas.add_generator(req).await,
            Err(SdlError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn set_then_get_parameter_roundtrip() {
        let (_mgr, canvas) = active_canvas().await;
        let outcome = canvas.set_parameter("cache.HitRate", "0.25").await.unwrap();
        assert_eq!(outcome.old_value, Some(Value::Float(0.8)));
        assert_eq!(outcome.new_value, Value::Float(0.25));

        let params = canvas.get_parameters(Some("cache.HitRate")).await.unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].value, Value::Float(0.25));
        assert!(params[0].overridden);
    }

    #[tokio::test]
    async fn batch_parameter_writes_are_atomic() {
        let (_mgr, canvas) = active_canvas().await;
        let result = canvas
            .batch_set_parameters(vec![
                ParamUpdate {
                    path: "cache.HitRate".to_string(),
                    expr: "0.5".to_string(),
                },
                ParamUpdate {
                    path: "cache.NoSuchParam".to_string(),
                    expr: "1".to_string(),
                },
            ])
            .await;
        assert!(result.is_err());

        // The valid path is untouched.
        let params = canvas.get_parameters(Some("cache.HitRate")).await.unwrap();
        assert_eq!(params[0].value, Value::Float(0.8));
    }

    #[tokio::test]
    async fn parameter_ops_need_an_active_system() {
        let source = serde_json::to_string(&demo_file()).unwrap();
        let resolver = MemoryResolver::new().with_file("app.sdl", &source);
        let manager = CanvasManager::new(Arc::new(resolver), Arc::new(AstJsonParser));
        let info = manager.create("bare").await;
        let canvas = manager.get(info.id).await.unwrap();

        assert!(matches!(
            canvas.set_parameter("cache.HitRate", "0.5").await,
            Err(SdlError::FailedPrecondition(_))
        ));
    }

    #[tokio::test]
    async fn native_private_fields_are_rejected() {
        let (_mgr, canvas) = active_canvas().await;
        assert!(matches!(
            canvas.set_parameter("cache.inner_buckets", "4").await,
            Err(SdlError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn flows_respect_cache_hit_rate() {
        let (_mgr, canvas) = active_canvas().await;
        let spec = canvas.add_generator(gen_request(100.0)).await.unwrap();
        canvas.start_generator(spec.id).await.unwrap();

        let outcome = canvas.evaluate_flows("runtime", None).await.unwrap();
        assert_eq!(outcome.status, "converged");
        assert!((outcome.rates["cache.Read"] - 100.0).abs() < 1.0);
        assert!((outcome.rates["db.Query"] - 20.0).abs() < 1.0);

        canvas.stop_all().await;

        let state = canvas.flow_state().await.unwrap();
        assert!(state.last.is_some());
    }

    #[tokio::test]
    async fn unknown_flow_strategy_is_invalid() {
        let (_mgr, canvas) = active_canvas().await;
        assert!(matches!(
            canvas.evaluate_flows("montecarlo", None).await,
            Err(SdlError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn execute_trace_is_seed_deterministic() {
        let (_mgr, canvas) = active_canvas().await;
        let a = canvas
            .execute_trace("server", "HandleRequest", Some(42))
            .await
            .unwrap();
        let b = canvas
            .execute_trace("server", "HandleRequest", Some(42))
            .await
            .unwrap();
        assert_eq!(a.events, b.events);
        assert_eq!(a.latency, b.latency);
    }

    #[tokio::test]
    async fn saturated_pool_is_flagged() {
        let (_mgr, canvas) = active_canvas().await;
        canvas
            .set_parameter("pool.ArrivalRate", "120.0")
            .await
            .unwrap();
        // Size 10 × hold 100 ms → capacity 100 rps.
        let reports = canvas.utilization(None).await.unwrap();
        let pool = reports
            .iter()
            .find(|r| r.component == "pool")
            .expect("pool report");
        assert!(pool.utilization > 1.0);
        assert!(pool.is_bottleneck);
        assert_eq!(pool.warning_threshold, 0.8);
        assert_eq!(pool.critical_threshold, 0.95);
    }

    #[tokio::test]
    async fn diagram_lists_methods_and_flow_edges() {
        let (_mgr, canvas) = active_canvas().await;
        let spec = canvas.add_generator(gen_request(100.0)).await.unwrap();
        canvas.start_generator(spec.id).await.unwrap();
        canvas.evaluate_flows("runtime", None).await.unwrap();
        canvas.stop_all().await;

        let diagram = canvas.system_diagram().await.unwrap();
        assert!(diagram
            .nodes
            .iter()
            .any(|n| n.component == "server" && n.method == "HandleRequest" && n.traffic > 99.0));
        assert!(diagram
            .edges
            .iter()
            .any(|e| e.to == "db.Query" && (e.probability - 0.2).abs() < 1e-9));
    }

    #[tokio::test]
    async fn deleting_the_canvas_terminates_streams() {
        let (mgr, canvas) = active_canvas().await;
        let metric = canvas
            .add_metric(AddMetricRequest {
                name: "m".to_string(),
                component: "server".to_string(),
                methods: vec!["HandleRequest".to_string()],
                metric_type: MetricType::Count,
                aggregation: Aggregation::Rate,
                window_secs: 1.0,
                match_result: None,
                match_result_type: None,
                enabled: true,
            })
            .await
            .unwrap();
        let hub = canvas.metrics().clone();
        let (sub, _notify) = hub.subscribe(vec![metric.id]).await;

        mgr.delete(canvas.id).await.unwrap();
        assert!(hub.subscriber_closed(sub).await);
    }

    #[tokio::test]
    async fn reset_clears_session_state() {
        let (_mgr, canvas) = active_canvas().await;
        let spec = canvas.add_generator(gen_request(5.0)).await.unwrap();
        canvas.start_generator(spec.id).await.unwrap();
        canvas.reset().await;

        assert!(canvas.list_generators().await.is_empty());
        assert!(matches!(
            canvas.get_parameters(None).await,
            Err(SdlError::FailedPrecondition(_))
        ));
    }

    #[tokio::test]
    async fn generator_driven_calls_feed_metrics() {
        let (_mgr, canvas) = active_canvas().await;
        let metric = canvas
            .add_metric(AddMetricRequest {
                name: "throughput".to_string(),
                component: "server".to_string(),
                methods: vec!["HandleRequest".to_string()],
                metric_type: MetricType::Count,
                aggregation: Aggregation::Sum,
                window_secs: 1.0,
                match_result: None,
                match_result_type: None,
                enabled: true,
            })
            .await
            .unwrap();

        let spec = canvas.add_generator(gen_request(50.0)).await.unwrap();
        canvas.start_generator(spec.id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        canvas.stop_all().await;

        let now = now_secs();
        let points = canvas
            .metrics()
            .query(metric.id, now - 60.0, now + 60.0, None)
            .await
            .unwrap();
        let total: f64 = points.iter().map(|p| p.value).sum();
        assert!(total > 0.0, "expected recorded calls, got none");
    }
}
