//! Steady-state arrival-rate propagation.
//!
//! Generators seed per-method rates; a static walk over each hot method's
//! AST discovers its downstream calls with branch probabilities and loop
//! factors; rates propagate until the largest change drops under the
//! convergence threshold or the iteration cap trips. Non-convergence is a
//! warning, not an error — the best-effort snapshot is returned with
//! `status = "partial"`.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ast::{CallTarget, Expr, Stmt};
use crate::natives;
use crate::system::{ComponentInstance, SystemInstance};
use crate::value::Value;

const CONVERGENCE_THRESHOLD: f64 = 1e-6;
const MAX_ITERATIONS: u32 = 100;

/// One call relationship discovered by flow analysis, at its settled rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowEdge {
    pub from_component: String,
    pub from_method: String,
    pub to_component: String,
    pub to_method: String,
    pub rate: f64,
    #[serde(default)]
    pub condition: Option<String>,
    pub probability: f64,
    #[serde(default)]
    pub generator_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowOutcome {
    /// `"converged"` or `"partial"`.
    pub status: String,
    pub iterations: u32,
    pub warnings: Vec<String>,
    /// `instance.method` → calls/sec.
    pub rates: HashMap<String, f64>,
    pub edges: Vec<FlowEdge>,
}

/// A generator's contribution to the seed rates.
#[derive(Debug, Clone)]
pub struct RateSeed {
    pub generator_id: Uuid,
    pub component: String,
    pub method: String,
    pub rate: f64,
}

// ─── Static method analysis ───────────────────────────────────

/// One downstream call discovered in a method body.
#[derive(Debug, Clone)]
struct Downstream {
    target: String,
    method: String,
    probability: f64,
    count: f64,
    condition: Option<String>,
}

struct Analyzer<'a> {
    system: &'a SystemInstance,
    inst: &'a ComponentInstance,
    /// let-bound name → (target instance, method) for call results, the
    /// basis for branch probability derivation.
    bindings: HashMap<String, (String, String)>,
    found: Vec<Downstream>,
    warnings: Vec<String>,
}

impl<'a> Analyzer<'a> {
    fn walk_block(&mut self, stmts: &[Stmt], probability: f64, count: f64) {
        for stmt in stmts {
            match stmt {
                Stmt::Let { name, expr } => {
                    if let Expr::Call { target, .. } = expr {
                        if let Some(resolved) = self.resolve_target(target) {
                            self.bindings.insert(name.clone(), resolved);
                        }
                    }
                    self.walk_expr(expr, probability, count);
                }
                Stmt::Assign { expr, .. } | Stmt::Expr { expr } | Stmt::Delay { expr } => {
                    self.walk_expr(expr, probability, count);
                }
                Stmt::Return { expr } => {
                    if let Some(e) = expr {
                        self.walk_expr(e, probability, count);
                    }
                }
                Stmt::If {
                    cond,
                    then_body,
                    else_body,
                } => {
                    self.walk_expr(cond, probability, count);
                    let (p_then, label) = self.branch_probability(cond);
                    let start = self.found.len();
                    self.walk_block(then_body, probability * p_then, count);
                    for d in &mut self.found[start..] {
                        if d.condition.is_none() {
                            d.condition = label.clone();
                        }
                    }
                    let start = self.found.len();
                    self.walk_block(else_body, probability * (1.0 - p_then), count);
                    for d in &mut self.found[start..] {
                        if d.condition.is_none() {
                            d.condition = label.as_ref().map(|l| format!("!({l})"));
                        }
                    }
                }
                Stmt::For { count: n, body } => {
                    let k = self.loop_count(n);
                    self.walk_block(body, probability, count * k);
                }
                Stmt::Wait { futures } => {
                    for f in futures {
                        self.walk_expr(f, probability, count);
                    }
                }
            }
        }
    }

    fn walk_expr(&mut self, expr: &Expr, probability: f64, count: f64) {
        match expr {
            Expr::Call { target, args } => {
                for a in args {
                    self.walk_expr(a, probability, count);
                }
                if let Some((target_inst, method)) = self.resolve_target(target) {
                    if probability > 0.0 {
                        self.found.push(Downstream {
                            target: target_inst,
                            method,
                            probability,
                            count,
                            condition: None,
                        });
                    }
                }
            }
            Expr::Go { operand } | Expr::Sample { operand } | Expr::Unary { operand, .. } => {
                self.walk_expr(operand, probability, count);
            }
            Expr::Binary { lhs, rhs, .. } => {
                self.walk_expr(lhs, probability, count);
                self.walk_expr(rhs, probability, count);
            }
            Expr::Tuple { items } | Expr::List { items } => {
                for i in items {
                    self.walk_expr(i, probability, count);
                }
            }
            Expr::Dist { arms } => {
                for arm in arms {
                    self.walk_expr(&arm.value, probability, count);
                }
            }
            Expr::Literal { .. } | Expr::Ident { .. } => {}
        }
    }

    fn resolve_target(&self, target: &CallTarget) -> Option<(String, String)> {
        match target {
            CallTarget::SelfMethod { method } => Some((self.inst.name.clone(), method.clone())),
            CallTarget::Dependency { dep, method } => {
                let bound = self.inst.deps.get(dep)?;
                Some((bound.clone(), method.clone()))
            }
        }
    }

    /// Probability the condition is true, when statically derivable:
    /// a call result with a known truthiness model (cache hit rate, pool
    /// admission), a bool distribution literal, or a negation of either.
    /// Everything else conservatively routes the full rate down `then`.
    fn branch_probability(&mut self, cond: &Expr) -> (f64, Option<String>) {
        if let Some((p, label)) = self.try_probability(cond) {
            return (p, Some(label));
        }
        self.warnings.push(format!(
            "branch condition in {} not statically derivable; attributing all traffic to the then-branch",
            self.inst.name
        ));
        (1.0, None)
    }

    fn try_probability(&self, cond: &Expr) -> Option<(f64, String)> {
        match cond {
            Expr::Unary {
                op: crate::ast::UnOp::Not,
                operand,
            } => {
                let (p, label) = self.try_probability(operand)?;
                Some((1.0 - p, format!("!{label}")))
            }
            Expr::Ident { name } => {
                let (target, method) = self.bindings.get(name)?;
                let inst = self.system.instances.get(target)?;
                let kind = inst.decl.native?;
                let p = natives::truthiness(kind, method, &inst.params)?;
                Some((p, format!("{target}.{method}")))
            }
            Expr::Call { target, .. } => {
                let (target_inst, method) = self.resolve_target(target)?;
                let inst = self.system.instances.get(&target_inst)?;
                let kind = inst.decl.native?;
                let p = natives::truthiness(kind, &method, &inst.params)?;
                Some((p, format!("{target_inst}.{method}")))
            }
            Expr::Sample { operand } => match operand.as_ref() {
                Expr::Dist { arms } => {
                    let mut total = 0.0;
                    let mut truthy = 0.0;
                    for arm in arms {
                        total += arm.weight;
                        if matches!(
                            arm.value,
                            Expr::Literal {
                                value: Value::Bool(true)
                            }
                        ) {
                            truthy += arm.weight;
                        }
                    }
                    if total > 0.0 {
                        Some((truthy / total, "dist".to_string()))
                    } else {
                        None
                    }
                }
                _ => None,
            },
            _ => None,
        }
    }

    /// Loop factor: a literal count, the mean of a distribution literal,
    /// or 1 with a warning.
    fn loop_count(&mut self, count: &Expr) -> f64 {
        match count {
            Expr::Literal {
                value: Value::Int(n),
            } => (*n).max(0) as f64,
            Expr::Literal {
                value: Value::Float(x),
            } => x.max(0.0),
            Expr::Sample { operand } | Expr::Go { operand } => self.loop_count(operand),
            Expr::Dist { arms } => {
                let mut total = 0.0;
                let mut weighted = 0.0;
                for arm in arms {
                    if let Expr::Literal { value } = &arm.value {
                        if let Ok(x) = value.as_f64() {
                            total += arm.weight;
                            weighted += arm.weight * x;
                        }
                    }
                }
                if total > 0.0 {
                    weighted / total
                } else {
                    1.0
                }
            }
            _ => {
                self.warnings.push(format!(
                    "loop count in {} not statically derivable; assuming 1",
                    self.inst.name
                ));
                1.0
            }
        }
    }
}

fn analyze_method(
    system: &SystemInstance,
    inst: &ComponentInstance,
    method: &str,
    warnings: &mut Vec<String>,
) -> Vec<Downstream> {
    let Some(decl) = inst.decl.method(method) else {
        return Vec::new();
    };
    let mut analyzer = Analyzer {
        system,
        inst,
        bindings: HashMap::new(),
        found: Vec::new(),
        warnings: Vec::new(),
    };
    analyzer.walk_block(&decl.body, 1.0, 1.0);
    warnings.extend(analyzer.warnings);
    analyzer.found
}

// ─── Fixed point ──────────────────────────────────────────────

fn key(inst: &str, method: &str) -> String {
    format!("{inst}.{method}")
}

/// Propagate seed rates to a fixed point over the instance graph.
pub fn evaluate_flows(
    system: &SystemInstance,
    seeds: &[RateSeed],
    deadline: Option<Instant>,
) -> FlowOutcome {
    let mut warnings: Vec<String> = Vec::new();

    let mut seed_rates: HashMap<(String, String), f64> = HashMap::new();
    let mut edges: Vec<FlowEdge> = Vec::new();
    for seed in seeds {
        let Some(inst) = system.resolve(&seed.component) else {
            warnings.push(format!(
                "generator targets unknown component {}",
                seed.component
            ));
            continue;
        };
        *seed_rates
            .entry((inst.name.clone(), seed.method.clone()))
            .or_insert(0.0) += seed.rate;
        edges.push(FlowEdge {
            from_component: "traffic".to_string(),
            from_method: String::new(),
            to_component: inst.name.clone(),
            to_method: seed.method.clone(),
            rate: seed.rate,
            condition: None,
            probability: 1.0,
            generator_id: Some(seed.generator_id),
        });
    }

    // Downstream analysis is pure per (instance, method); cache it.
    let mut analysis: HashMap<(String, String), Vec<Downstream>> = HashMap::new();
    let mut analysis_warnings: HashSet<String> = HashSet::new();

    let mut current: HashMap<(String, String), f64> = seed_rates.clone();
    let mut iterations = 0;
    let mut converged = false;

    while iterations < MAX_ITERATIONS {
        iterations += 1;
        if let Some(d) = deadline {
            if Instant::now() >= d {
                warnings.push("flow evaluation hit its deadline".to_string());
                break;
            }
        }

        let mut next = seed_rates.clone();
        for ((inst_name, method), rate) in &current {
            if *rate <= 0.0 {
                continue;
            }
            let k = (inst_name.clone(), method.clone());
            let downstream = analysis.entry(k).or_insert_with(|| {
                let mut w = Vec::new();
                let found = match system.instances.get(inst_name) {
                    Some(inst) => analyze_method(system, inst, method, &mut w),
                    None => Vec::new(),
                };
                for warning in w {
                    analysis_warnings.insert(warning);
                }
                found
            });
            for d in downstream.iter() {
                *next
                    .entry((d.target.clone(), d.method.clone()))
                    .or_insert(0.0) += rate * d.probability * d.count;
            }
        }

        let mut delta: f64 = 0.0;
        for (k, v) in &next {
            delta = delta.max((v - current.get(k).copied().unwrap_or(0.0)).abs());
        }
        for (k, v) in &current {
            if !next.contains_key(k) {
                delta = delta.max(v.abs());
            }
        }
        current = next;
        if delta < CONVERGENCE_THRESHOLD {
            converged = true;
            break;
        }
    }

    if !converged {
        warnings.push(format!(
            "flow evaluation did not converge within {MAX_ITERATIONS} iterations"
        ));
    }
    warnings.extend(analysis_warnings);

    // Materialize settled edges from the cached analysis.
    for ((inst_name, method), rate) in &current {
        if *rate <= 0.0 {
            continue;
        }
        if let Some(downstream) = analysis.get(&(inst_name.clone(), method.clone())) {
            for d in downstream {
                edges.push(FlowEdge {
                    from_component: inst_name.clone(),
                    from_method: method.clone(),
                    to_component: d.target.clone(),
                    to_method: d.method.clone(),
                    rate: rate * d.probability * d.count,
                    condition: d.condition.clone(),
                    probability: d.probability,
                    generator_id: None,
                });
            }
        }
    }

    FlowOutcome {
        status: if converged { "converged" } else { "partial" }.to_string(),
        iterations,
        warnings,
        rates: current
            .into_iter()
            .map(|((inst, method), rate)| (key(&inst, &method), rate))
            .collect(),
        edges,
    }
}

/// Push settled per-instance arrival rates into the natives that model
/// contention from them. Instances whose `ArrivalRate` was manually
/// overridden keep the manual value.
pub fn apply_arrival_rates(
    system: &mut SystemInstance,
    rates: &HashMap<String, f64>,
    manual: &HashSet<String>,
) {
    let mut per_instance: HashMap<String, f64> = HashMap::new();
    for (k, rate) in rates {
        if let Some((inst, _method)) = k.rsplit_once('.') {
            *per_instance.entry(inst.to_string()).or_insert(0.0) += rate;
        }
    }
    for (name, inst) in system.instances.iter_mut() {
        let Some(kind) = inst.decl.native else { continue };
        if !natives::consumes_arrival_rate(kind) {
            continue;
        }
        if manual.contains(&format!("{name}.ArrivalRate")) {
            continue;
        }
        let rate = per_instance.get(name).copied().unwrap_or(0.0);
        inst.params
            .insert("ArrivalRate".to_string(), Value::Float(rate));
    }
}

// ─── Static path enumeration ──────────────────────────────────

/// A node in the possible-execution-paths tree returned by `TraceAllPaths`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathNode {
    pub component: String,
    pub method: String,
    pub children: Vec<PathEdge>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathEdge {
    #[serde(default)]
    pub condition: Option<String>,
    pub probability: f64,
    pub node: PathNode,
}

pub fn trace_all_paths(
    system: &SystemInstance,
    component: &str,
    method: &str,
    max_depth: usize,
) -> Option<PathNode> {
    let inst = system.resolve(component)?;
    Some(paths_from(system, inst, method, max_depth))
}

fn paths_from(
    system: &SystemInstance,
    inst: &ComponentInstance,
    method: &str,
    depth: usize,
) -> PathNode {
    let mut node = PathNode {
        component: inst.name.clone(),
        method: method.to_string(),
        children: Vec::new(),
    };
    if depth == 0 {
        return node;
    }
    let mut warnings = Vec::new();
    for d in analyze_method(system, inst, method, &mut warnings) {
        if let Some(target) = system.instances.get(&d.target) {
            node.children.push(PathEdge {
                condition: d.condition.clone(),
                probability: d.probability,
                node: paths_from(system, target, &d.method, depth - 1),
            });
        }
    }
    node
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{
        ComponentDecl, DepBinding, InstanceDecl, MethodDecl, ParamBinding, SystemDecl, UsesDecl,
    };
    use crate::ast::{Expr, UnOp};
    use crate::system::{build_system, DeclScope};
    use std::sync::Arc;

    /// server → cache → db, with the miss path querying the db.
    fn cache_system(hit_rate: f64) -> SystemInstance {
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

        let mut scope = DeclScope::with_builtins();
        scope.components.insert("Server".to_string(), Arc::new(server));
        scope.components.insert("Db".to_string(), Arc::new(db));
        scope.systems.insert(
            "Main".to_string(),
            SystemDecl {
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
                            expr: Expr::lit(Value::Float(hit_rate)),
                        }],
                        bindings: Vec::new(),
                    },
                    InstanceDecl {
                        name: "db".to_string(),
                        component: "Db".to_string(),
                        params: Vec::new(),
                        bindings: Vec::new(),
                    },
                ],
            },
        );
        build_system(&scope, "Main").unwrap()
    }

    #[test]
    fn no_generators_means_zero_everywhere() {
        let sys = cache_system(0.8);
        let out = evaluate_flows(&sys, &[], None);
        assert_eq!(out.status, "converged");
        assert!(out.rates.values().all(|r| *r == 0.0));
    }

    #[test]
    fn generator_rate_lands_on_target() {
        let sys = cache_system(0.8);
        let seeds = vec![RateSeed {
            generator_id: Uuid::new_v4(),
            component: "server".to_string(),
            method: "HandleRequest".to_string(),
            rate: 50.0,
        }];
        let out = evaluate_flows(&sys, &seeds, None);
        assert!((out.rates["server.HandleRequest"] - 50.0).abs() < 1e-6);
    }

    #[test]
    fn cache_hit_rate_shapes_db_traffic() {
        // HitRate 0.8 at 100 rps: cache.Read ≈ 100, db.Query ≈ 20.
        let sys = cache_system(0.8);
        let seeds = vec![RateSeed {
            generator_id: Uuid::new_v4(),
            component: "server".to_string(),
            method: "HandleRequest".to_string(),
            rate: 100.0,
        }];
        let out = evaluate_flows(&sys, &seeds, None);
        assert_eq!(out.status, "converged");
        assert!((out.rates["cache.Read"] - 100.0).abs() < 1.0);
        assert!((out.rates["db.Query"] - 20.0).abs() < 1.0);
    }

    #[test]
    fn settled_edges_carry_probability_and_condition() {
        let sys = cache_system(0.8);
        let seeds = vec![RateSeed {
            generator_id: Uuid::new_v4(),
            component: "server".to_string(),
            method: "HandleRequest".to_string(),
            rate: 100.0,
        }];
        let out = evaluate_flows(&sys, &seeds, None);
        let db_edge = out
            .edges
            .iter()
            .find(|e| e.to_component == "db")
            .expect("db edge");
        assert!((db_edge.probability - 0.2).abs() < 1e-9);
        assert_eq!(db_edge.condition.as_deref(), Some("!cache.Read"));
        let gen_edge = out
            .edges
            .iter()
            .find(|e| e.generator_id.is_some())
            .expect("generator edge");
        assert_eq!(gen_edge.to_component, "server");
    }

    #[test]
    fn cyclic_call_graph_with_gain_below_one_converges() {
        // a.Ping calls b.Pong which calls a.Ping behind a 50/50 branch.
        let a = ComponentDecl {
            name: "A".to_string(),
            params: Vec::new(),
            uses: vec![UsesDecl {
                name: "b".to_string(),
                component_type: "B".to_string(),
            }],
            methods: vec![MethodDecl {
                name: "Ping".to_string(),
                params: Vec::new(),
                returns: None,
                body: vec![Stmt::Expr {
                    expr: Expr::call_dep("b", "Pong", vec![]),
                }],
            }],
            native: None,
        };
        let b = ComponentDecl {
            name: "B".to_string(),
            params: Vec::new(),
            uses: vec![UsesDecl {
                name: "a".to_string(),
                component_type: "A".to_string(),
            }],
            methods: vec![MethodDecl {
                name: "Pong".to_string(),
                params: Vec::new(),
                returns: None,
                body: vec![Stmt::If {
                    cond: Expr::Sample {
                        operand: Box::new(Expr::Dist {
                            arms: vec![
                                crate::ast::DistArm {
                                    weight: 0.5,
                                    value: Expr::lit(Value::Bool(true)),
                                },
                                crate::ast::DistArm {
                                    weight: 0.5,
                                    value: Expr::lit(Value::Bool(false)),
                                },
                            ],
                        }),
                    },
                    then_body: vec![Stmt::Expr {
                        expr: Expr::call_dep("a", "Ping", vec![]),
                    }],
                    else_body: Vec::new(),
                }],
            }],
            native: None,
        };

        let mut scope = DeclScope::with_builtins();
        scope.components.insert("A".to_string(), Arc::new(a));
        scope.components.insert("B".to_string(), Arc::new(b));
        scope.systems.insert(
            "S".to_string(),
            SystemDecl {
                name: "S".to_string(),
                instances: vec![
                    InstanceDecl {
                        name: "a".to_string(),
                        component: "A".to_string(),
                        params: Vec::new(),
                        bindings: vec![DepBinding {
                            slot: "b".to_string(),
                            target: "b".to_string(),
                        }],
                    },
                    InstanceDecl {
                        name: "b".to_string(),
                        component: "B".to_string(),
                        params: Vec::new(),
                        bindings: vec![DepBinding {
                            slot: "a".to_string(),
                            target: "a".to_string(),
                        }],
                    },
                ],
            },
        );
        let sys = build_system(&scope, "S").unwrap();
        let seeds = vec![RateSeed {
            generator_id: Uuid::new_v4(),
            component: "a".to_string(),
            method: "Ping".to_string(),
            rate: 10.0,
        }];
        let out = evaluate_flows(&sys, &seeds, None);
        assert_eq!(out.status, "converged");
        // Geometric series: 10 / (1 - 0.5) = 20.
        assert!((out.rates["a.Ping"] - 20.0).abs() < 1e-3);
    }

    #[test]
    fn loop_factor_multiplies_downstream_rate() {
        let fanout = ComponentDecl {
            name: "Fanout".to_string(),
            params: Vec::new(),
            uses: vec![UsesDecl {
                name: "db".to_string(),
                component_type: "Db".to_string(),
            }],
            methods: vec![MethodDecl {
                name: "Burst".to_string(),
                params: Vec::new(),
                returns: None,
                body: vec![Stmt::For {
                    count: Expr::lit(Value::Int(4)),
                    body: vec![Stmt::Expr {
                        expr: Expr::call_dep("db", "Query", vec![]),
                    }],
                }],
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
                body: Vec::new(),
            }],
            native: None,
        };
        let mut scope = DeclScope::with_builtins();
        scope.components.insert("Fanout".to_string(), Arc::new(fanout));
        scope.components.insert("Db".to_string(), Arc::new(db));
        scope.systems.insert(
            "S".to_string(),
            SystemDecl {
                name: "S".to_string(),
                instances: vec![
                    InstanceDecl {
                        name: "f".to_string(),
                        component: "Fanout".to_string(),
                        params: Vec::new(),
                        bindings: vec![DepBinding {
                            slot: "db".to_string(),
                            target: "db".to_string(),
                        }],
                    },
                    InstanceDecl {
                        name: "db".to_string(),
                        component: "Db".to_string(),
                        params: Vec::new(),
                        bindings: Vec::new(),
                    },
                ],
            },
        );
        let sys = build_system(&scope, "S").unwrap();
        let seeds = vec![RateSeed {
            generator_id: Uuid::new_v4(),
            component: "f".to_string(),
            method: "Burst".to_string(),
            rate: 10.0,
        }];
        let out = evaluate_flows(&sys, &seeds, None);
        assert!((out.rates["db.Query"] - 40.0).abs() < 1e-6);
    }

    #[test]
    fn arrival_rates_feed_native_pools() {
        let mut scope = DeclScope::with_builtins();
        scope.systems.insert(
            "S".to_string(),
            SystemDecl {
                name: "S".to_string(),
                instances: vec![InstanceDecl {
                    name: "pool".to_string(),
                    component: "ResourcePool".to_string(),
                    params: Vec::new(),
                    bindings: Vec::new(),
                }],
            },
        );
        let mut sys = build_system(&scope, "S").unwrap();
        let mut rates = HashMap::new();
        rates.insert("pool.Acquire".to_string(), 120.0);
        apply_arrival_rates(&mut sys, &rates, &HashSet::new());
        assert_eq!(
            sys.parameter("pool.ArrivalRate"),
            Some(&Value::Float(120.0))
        );

        // A manual override wins.
        let mut manual = HashSet::new();
        manual.insert("pool.ArrivalRate".to_string());
        rates.insert("pool.Acquire".to_string(), 10.0);
        apply_arrival_rates(&mut sys, &rates, &manual);
        assert_eq!(
            sys.parameter("pool.ArrivalRate"),
            Some(&Value::Float(120.0))
        );
    }

    #[test]
    fn path_tree_labels_conditional_edges() {
        let sys = cache_system(0.8);
        let tree = trace_all_paths(&sys, "server", "HandleRequest", 4).unwrap();
        assert_eq!(tree.component, "server");
        assert_eq!(tree.children.len(), 2);
        let db_edge = tree
            .children
            .iter()
            .find(|e| e.node.component == "db")
            .expect("db path");
        assert!((db_edge.probability - 0.2).abs() < 1e-9);
    }
}
