//! Single-path sampled evaluation of method bodies.
//!
//! Each top-level call walks the AST once, resolving probability
//! distributions by drawing from a seeded RNG, and accumulates *virtual
//! time* — the latency the modeled operation would have taken — entirely
//! decoupled from wall-clock. `go`/`wait` fork and join in virtual time: a
//! forked expression advances its own clock, and the join moves the caller
//! to the max of the awaited completion times.
//!
//! Evaluation errors abort the call with an error trace event; they never
//! abort the engine.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::ast::{CallTarget, Expr, Stmt, UnOp};
use crate::error::{Result, SdlError};
use crate::expr::apply_arith;
use crate::natives::{self, NativeCall};
use crate::outcomes::Outcomes;
use crate::system::{ComponentInstance, SystemInstance};
use crate::trace::{TraceEvent, TraceKind};
use crate::value::Value;

const MAX_CALL_DEPTH: usize = 64;

/// The outcome of one top-level call.
#[derive(Debug, Clone)]
pub struct CallResult {
    pub value: Value,
    /// Virtual seconds the call took.
    pub latency: f64,
    pub trace: Vec<TraceEvent>,
    pub error: Option<String>,
}

/// Run `path.method` on the active system with a fixed RNG seed. The same
/// seed and system state reproduce the identical event sequence.
pub fn execute(
    system: &SystemInstance,
    path: &str,
    method: &str,
    args: Vec<Value>,
    seed: u64,
) -> CallResult {
    let mut ev = Evaluator {
        system,
        rng: StdRng::seed_from_u64(seed),
        trace: Vec::new(),
        next_id: 0,
        depth: 0,
    };

    let root = match system.resolve(path) {
        Some(inst) => inst.name.clone(),
        None => {
            return CallResult {
                value: Value::Nil,
                latency: 0.0,
                trace: Vec::new(),
                error: Some(format!("no such component: {path}")),
            }
        }
    };

    match ev.call_method(&root, method, args, None, 0.0) {
        Ok((value, end)) => CallResult {
            value,
            latency: end,
            trace: ev.trace,
            error: None,
        },
        Err(e) => {
            let message = e.to_string();
            let id = ev.alloc_id();
            ev.trace.push(TraceEvent {
                kind: TraceKind::Exit,
                id,
                parent_id: None,
                timestamp: 0.0,
                duration: None,
                component: path.to_string(),
                method: method.to_string(),
                args: Vec::new(),
                return_value: None,
                error: Some(message.clone()),
            });
            CallResult {
                value: Value::Nil,
                latency: 0.0,
                trace: ev.trace,
                error: Some(message),
            }
        }
    }
}

// ─── Environment ──────────────────────────────────────────────

struct Env {
    scopes: Vec<HashMap<String, Value>>,
}

impl Env {
    fn new() -> Self {
        Self {
            scopes: vec![HashMap::new()],
        }
    }

    fn push(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop(&mut self) {
        self.scopes.pop();
    }

    fn lookup(&self, name: &str) -> Option<&Value> {
        self.scopes.iter().rev().find_map(|s| s.get(name))
    }

    fn define(&mut self, name: &str, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), value);
        }
    }

    fn assign(&mut self, name: &str, value: Value) -> bool {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(slot) = scope.get_mut(name) {
                *slot = value;
                return true;
            }
        }
        false
    }
}

// ─── Evaluator ────────────────────────────────────────────────

enum Flow {
    Normal,
    Return(Value),
}

struct Evaluator<'a> {
    system: &'a SystemInstance,
    rng: StdRng,
    trace: Vec<TraceEvent>,
    next_id: u64,
    depth: usize,
}

impl<'a> Evaluator<'a> {
    fn alloc_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn eval_err(&self, inst: &ComponentInstance, method: &str, message: String) -> SdlError {
        SdlError::Evaluation {
            component: inst.name.clone(),
            method: method.to_string(),
            message,
        }
    }

    /// Invoke `method` on the instance named `inst_name`, starting at
    /// virtual time `start`. Returns the value and the end time.
    fn call_method(
        &mut self,
        inst_name: &str,
        method: &str,
        args: Vec<Value>,
        parent: Option<u64>,
        start: f64,
    ) -> Result<(Value, f64)> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(SdlError::Evaluation {
                component: inst_name.to_string(),
                method: method.to_string(),
                message: format!("call depth exceeded {MAX_CALL_DEPTH}"),
            });
        }
        let inst = self
            .system
            .instances
            .get(inst_name)
            .ok_or_else(|| SdlError::NotFound(format!("no such instance: {inst_name}")))?
            .clone();
        inst.record_call();

        let frame_id = self.alloc_id();
        self.trace.push(TraceEvent {
            kind: TraceKind::Enter,
            id: frame_id,
            parent_id: parent,
            timestamp: start,
            duration: None,
            component: inst.name.clone(),
            method: method.to_string(),
            args: args.clone(),
            return_value: None,
            error: None,
        });

        self.depth += 1;
        let result = self.run_body(&inst, method, args, frame_id, start);
        self.depth -= 1;

        let (value, end) = result?;
        self.trace.push(TraceEvent {
            kind: TraceKind::Exit,
            id: frame_id,
            parent_id: parent,
            timestamp: end,
            duration: Some(end - start),
            component: inst.name.clone(),
            method: method.to_string(),
            args: Vec::new(),
            return_value: Some(value.clone()),
            error: None,
        });
        Ok((value, end))
    }

    fn run_body(
        &mut self,
        inst: &ComponentInstance,
        method: &str,
        args: Vec<Value>,
        frame_id: u64,
        start: f64,
    ) -> Result<(Value, f64)> {
        // Native components have no body; dispatch to the analytic model.
        if let Some(kind) = inst.decl.native {
            let disk_params = inst
                .deps
                .get("disk")
                .and_then(|target| self.system.instances.get(target))
                .map(|d| d.params.clone());
            let ret = natives::dispatch(
                kind,
                NativeCall {
                    method,
                    args: &args,
                    params: &inst.params,
                    disk: disk_params.as_ref(),
                },
                &mut self.rng,
            )?;
            return Ok((ret.value, start + ret.latency));
        }

        let decl = inst
            .decl
            .method(method)
            .ok_or_else(|| {
                SdlError::NotFound(format!("{} has no method {method}", inst.decl.name))
            })?
            .clone();
        if decl.params.len() != args.len() {
            return Err(self.eval_err(
                inst,
                method,
                format!(
                    "arity mismatch: {} takes {} argument(s), got {}",
                    method,
                    decl.params.len(),
                    args.len()
                ),
            ));
        }

        let mut env = Env::new();
        // Parameters are readable like locals.
        for (name, value) in &inst.params {
            env.define(name, value.clone());
        }
        for (p, v) in decl.params.iter().zip(args) {
            env.define(&p.name, v);
        }

        let mut now = start;
        let flow = self.exec_block(inst, &mut env, &mut now, &decl.body, frame_id, method)?;
        let value = match flow {
            Flow::Return(v) => v,
            Flow::Normal => Value::Nil,
        };
        Ok((value, now))
    }

    fn exec_block(
        &mut self,
        inst: &ComponentInstance,
        env: &mut Env,
        now: &mut f64,
        stmts: &[Stmt],
        frame_id: u64,
        method: &str,
    ) -> Result<Flow> {
        for stmt in stmts {
            match stmt {
                Stmt::Let { name, expr } => {
                    let v = self.eval_expr(inst, env, now, expr, frame_id, method)?;
                    env.define(name, v);
                }
                Stmt::Assign { name, expr } => {
                    let v = self.eval_expr(inst, env, now, expr, frame_id, method)?;
                    if !env.assign(name, v) {
                        return Err(self.eval_err(
                            inst,
                            method,
                            format!("assignment to undefined name {name:?}"),
                        ));
                    }
                }
                Stmt::Expr { expr } => {
                    self.eval_expr(inst, env, now, expr, frame_id, method)?;
                }
                Stmt::Return { expr } => {
                    let v = match expr {
                        Some(e) => self.eval_expr(inst, env, now, e, frame_id, method)?,
                        None => Value::Nil,
                    };
                    return Ok(Flow::Return(v));
                }
                Stmt::If {
                    cond,
                    then_body,
                    else_body,
                } => {
                    let c = self.eval_expr(inst, env, now, cond, frame_id, method)?;
                    let branch = if c.as_bool()? { then_body } else { else_body };
                    env.push();
                    let flow = self.exec_block(inst, env, now, branch, frame_id, method);
                    env.pop();
                    if let Flow::Return(v) = flow? {
                        return Ok(Flow::Return(v));
                    }
                }
                Stmt::For { count, body } => {
                    // The count is sampled once, before the first iteration.
                    let c = self.eval_expr(inst, env, now, count, frame_id, method)?;
                    let n = match &c {
                        Value::Outcomes(_) => self.sample_value(inst, method, &c)?.as_int()?,
                        other => other.as_int()?,
                    };
                    for _ in 0..n.max(0) {
                        env.push();
                        let flow = self.exec_block(inst, env, now, body, frame_id, method);
                        env.pop();
                        if let Flow::Return(v) = flow? {
                            return Ok(Flow::Return(v));
                        }
                    }
                }
                Stmt::Delay { expr } => {
                    let v = self.eval_expr(inst, env, now, expr, frame_id, method)?;
                    let d = match &v {
                        Value::Outcomes(_) => {
                            self.sample_value(inst, method, &v)?.as_duration()?
                        }
                        other => other.as_duration()?,
                    };
                    *now += d.max(0.0);
                }
                Stmt::Wait { futures } => {
                    let mut join = *now;
                    for f in futures {
                        let v = self.eval_expr(inst, env, now, f, frame_id, method)?;
                        join = join.max(self.future_completion(inst, method, &v)?);
                    }
                    *now = join;
                    let id = self.alloc_id();
                    self.trace.push(TraceEvent {
                        kind: TraceKind::Wait,
                        id,
                        parent_id: Some(frame_id),
                        timestamp: *now,
                        duration: None,
                        component: inst.name.clone(),
                        method: method.to_string(),
                        args: Vec::new(),
                        return_value: None,
                        error: None,
                    });
                }
            }
        }
        Ok(Flow::Normal)
    }

    /// Max completion time inside a future value; lists of futures join on
    /// their max.
    fn future_completion(
        &self,
        inst: &ComponentInstance,
        method: &str,
        v: &Value,
    ) -> Result<f64> {
        match v {
            Value::Future { completes_at, .. } => Ok(*completes_at),
            Value::List(items) => {
                let mut join: f64 = 0.0;
                for item in items {
                    join = join.max(self.future_completion(inst, method, item)?);
                }
                Ok(join)
            }
            other => Err(self.eval_err(
                inst,
                method,
                format!("wait expects futures, got {}", other.type_of()),
            )),
        }
    }

    fn sample_value(
        &mut self,
        inst: &ComponentInstance,
        method: &str,
        v: &Value,
    ) -> Result<Value> {
        let o = v.as_outcomes()?;
        self.sample_outcomes(inst, method, o)
    }

    fn sample_outcomes(
        &mut self,
        inst: &ComponentInstance,
        method: &str,
        o: &Outcomes<Value>,
    ) -> Result<Value> {
        if o.is_empty() {
            return Err(self.eval_err(
                inst,
                method,
                "sample from an empty outcomes distribution".to_string(),
            ));
        }
        let pick = self.rng.gen::<f64>() * o.total_weight();
        Ok(o.sample_at(pick).cloned().unwrap_or(Value::Nil))
    }

    fn eval_expr(
        &mut self,
        inst: &ComponentInstance,
        env: &mut Env,
        now: &mut f64,
        expr: &Expr,
        frame_id: u64,
        method: &str,
    ) -> Result<Value> {
        match expr {
            Expr::Literal { value } => Ok(value.clone()),
            Expr::Ident { name } => env.lookup(name).cloned().ok_or_else(|| {
                self.eval_err(inst, method, format!("unknown identifier {name:?}"))
            }),
            Expr::Binary { op, lhs, rhs } => {
                let a = self.eval_expr(inst, env, now, lhs, frame_id, method)?;
                let b = self.eval_expr(inst, env, now, rhs, frame_id, method)?;
                apply_arith(*op, &a, &b)
            }
            Expr::Unary { op, operand } => {
                let v = self.eval_expr(inst, env, now, operand, frame_id, method)?;
                match op {
                    UnOp::Not => Ok(Value::Bool(!v.as_bool()?)),
                    UnOp::Neg => match v {
                        Value::Int(n) => Ok(Value::Int(-n)),
                        Value::Float(x) => Ok(Value::Float(-x)),
                        Value::Duration(s) => Ok(Value::Duration(-s)),
                        other => Err(self.eval_err(
                            inst,
                            method,
                            format!("cannot negate {}", other.type_of()),
                        )),
                    },
                }
            }
            Expr::Sample { operand } => {
                let v = self.eval_expr(inst, env, now, operand, frame_id, method)?;
                let sampled = self.sample_value(inst, method, &v)?;
                // An access-result bucket charges its latency to the caller.
                if let Value::Tuple(items) = &sampled {
                    if let [Value::Bool(_), Value::Duration(d)] = items.as_slice() {
                        *now += d.max(0.0);
                    }
                }
                Ok(sampled)
            }
            Expr::Dist { arms } => {
                let mut o = Outcomes::new();
                for arm in arms {
                    let v = self.eval_expr(inst, env, now, &arm.value, frame_id, method)?;
                    o.add(arm.weight, v)?;
                }
                Ok(Value::Outcomes(o))
            }
            Expr::Call { target, args } => {
                let mut evaluated = Vec::with_capacity(args.len());
                for a in args {
                    evaluated.push(self.eval_expr(inst, env, now, a, frame_id, method)?);
                }
                let (target_inst, target_method) = match target {
                    CallTarget::SelfMethod { method } => (inst.name.clone(), method.clone()),
                    CallTarget::Dependency { dep, method } => {
                        let bound = inst.deps.get(dep).ok_or_else(|| {
                            self.eval_err(
                                inst,
                                method,
                                format!("dependency slot {dep:?} is not bound"),
                            )
                        })?;
                        (bound.clone(), method.clone())
                    }
                };
                let (value, end) = self.call_method(
                    &target_inst,
                    &target_method,
                    evaluated,
                    Some(frame_id),
                    *now,
                )?;
                *now = end;
                Ok(value)
            }
            Expr::Go { operand } => {
                let fork_at = *now;
                let id = self.alloc_id();
                self.trace.push(TraceEvent {
                    kind: TraceKind::Go,
                    id,
                    parent_id: Some(frame_id),
                    timestamp: fork_at,
                    duration: None,
                    component: inst.name.clone(),
                    method: method.to_string(),
                    args: Vec::new(),
                    return_value: None,
                    error: None,
                });
                // The fork advances its own clock; the caller's stands still.
                let mut fork_now = fork_at;
                let v = self.eval_expr(inst, env, &mut fork_now, operand, frame_id, method)?;
                Ok(Value::Future {
                    completes_at: fork_now,
                    result: Box::new(v),
                })
            }
            Expr::Tuple { items } => {
                let mut vs = Vec::with_capacity(items.len());
                for i in items {
                    vs.push(self.eval_expr(inst, env, now, i, frame_id, method)?);
                }
                Ok(Value::Tuple(vs))
            }
            Expr::List { items } => {
                let mut vs = Vec::with_capacity(items.len());
                for i in items {
                    vs.push(self.eval_expr(inst, env, now, i, frame_id, method)?);
                }
                Ok(Value::List(vs))
            }
        }
    }
}
