//! System instantiation: turning a [`SystemDecl`] into a graph of
//! [`ComponentInstance`]s with resolved dependency bindings.
//!
//! Cross-references between instances are held by name through the
//! [`SystemInstance`] arena map, never as owning pointers, so mutually
//! dependent components (`a uses b`, `b uses a`) need no special casing:
//! placeholders are installed for every instance before any binding is
//! resolved, which also makes forward references legal.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::ast::{ComponentDecl, FileDecl, SystemDecl};
use crate::error::{ConstructionProblem, Result, SdlError};
use crate::expr::eval_const;
use crate::natives::{self, ParamMap};
use crate::value::Value;

/// Declarations visible to a canvas: everything from its loaded files plus
/// the built-in native components.
#[derive(Debug, Clone, Default)]
pub struct DeclScope {
    pub components: HashMap<String, Arc<ComponentDecl>>,
    pub systems: HashMap<String, SystemDecl>,
}

impl DeclScope {
    pub fn with_builtins() -> Self {
        let mut scope = Self::default();
        for decl in natives::builtin_decls() {
            scope.components.insert(decl.name.clone(), Arc::new(decl));
        }
        scope
    }

    pub fn absorb(&mut self, file: &FileDecl) {
        for c in &file.components {
            self.components.insert(c.name.clone(), Arc::new(c.clone()));
        }
        for s in &file.systems {
            self.systems.insert(s.name.clone(), s.clone());
        }
    }
}

/// One live component within an active system.
#[derive(Debug, Clone)]
pub struct ComponentInstance {
    /// Instance name within the system; doubles as the dotted-path root.
    pub name: String,
    pub decl: Arc<ComponentDecl>,
    pub params: ParamMap,
    /// Dependency slot → instance name. Resolution goes back through the
    /// system map, which is what permits cycles.
    pub deps: HashMap<String, String>,
    /// Total method invocations on this instance, for diagram traffic.
    pub call_count: Arc<AtomicU64>,
}

impl ComponentInstance {
    pub fn record_call(&self) {
        self.call_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn calls(&self) -> u64 {
        self.call_count.load(Ordering::Relaxed)
    }
}

/// The active system: an arena of instances keyed by name.
#[derive(Debug, Clone, Default)]
pub struct SystemInstance {
    pub name: String,
    pub instances: HashMap<String, ComponentInstance>,
}

impl SystemInstance {
    /// Dot-path lookup: `a` names an instance, `a.b` follows instance `a`'s
    /// dependency slot `b`, and so on.
    pub fn resolve(&self, path: &str) -> Option<&ComponentInstance> {
        let mut parts = path.split('.');
        let mut current = self.instances.get(parts.next()?)?;
        for slot in parts {
            let target = current.deps.get(slot)?;
            current = self.instances.get(target)?;
        }
        Some(current)
    }

    /// Effective parameter value at `instance_path.param`.
    pub fn parameter(&self, path: &str) -> Option<&Value> {
        let (inst_path, param) = path.rsplit_once('.')?;
        self.resolve(inst_path)?.params.get(param)
    }
}

/// Build a system instance from its declaration. All problems are collected
/// and reported together; nothing of a failed construction is retained.
pub fn build_system(scope: &DeclScope, system_name: &str) -> Result<SystemInstance> {
    let decl = scope
        .systems
        .get(system_name)
        .ok_or_else(|| SdlError::NotFound(format!("unknown system: {system_name}")))?;

    let mut problems: Vec<ConstructionProblem> = Vec::new();
    let mut instances: HashMap<String, ComponentInstance> = HashMap::new();

    // Pass 1: allocate every instance with its parameters. Dependency slots
    // stay empty placeholders so pass 2 can resolve in any order.
    for inst in &decl.instances {
        if instances.contains_key(&inst.name) {
            problems.push(ConstructionProblem {
                instance: inst.name.clone(),
                detail: "duplicate instance name".to_string(),
            });
            continue;
        }
        let Some(component) = scope.components.get(&inst.component) else {
            problems.push(ConstructionProblem {
                instance: inst.name.clone(),
                detail: format!("unknown component type {}", inst.component),
            });
            continue;
        };

        let mut params = ParamMap::new();
        for p in &component.params {
            if let Some(default) = &p.default {
                match eval_const(default) {
                    Ok(v) => {
                        params.insert(p.name.clone(), v);
                    }
                    Err(e) => problems.push(ConstructionProblem {
                        instance: inst.name.clone(),
                        detail: format!("default for {} failed: {e}", p.name),
                    }),
                }
            }
        }
        for binding in &inst.params {
            if component.param(&binding.name).is_none() {
                problems.push(ConstructionProblem {
                    instance: inst.name.clone(),
                    detail: format!("no such parameter {}", binding.name),
                });
                continue;
            }
            match eval_const(&binding.expr) {
                Ok(v) => {
                    params.insert(binding.name.clone(), v);
                }
                Err(e) => problems.push(ConstructionProblem {
                    instance: inst.name.clone(),
                    detail: format!("override for {} failed: {e}", binding.name),
                }),
            }
        }

        instances.insert(
            inst.name.clone(),
            ComponentInstance {
                name: inst.name.clone(),
                decl: component.clone(),
                params,
                deps: HashMap::new(),
                call_count: Arc::new(AtomicU64::new(0)),
            },
        );
    }

    // Pass 2: resolve dependency bindings, including forward and cyclic
    // references, and check the slot's component-type constraint.
    for inst in &decl.instances {
        let Some(component) = scope.components.get(&inst.component) else {
            continue;
        };
        for slot in &component.uses {
            let bound = inst.bindings.iter().find(|b| b.slot == slot.name);
            let Some(binding) = bound else {
                problems.push(ConstructionProblem {
                    instance: inst.name.clone(),
                    detail: format!("dependency slot {} is unbound", slot.name),
                });
                continue;
            };
            match instances.get(&binding.target) {
                None => problems.push(ConstructionProblem {
                    instance: inst.name.clone(),
                    detail: format!(
                        "dependency {} -> {} does not name an instance",
                        slot.name, binding.target
                    ),
                }),
                Some(target) if target.decl.name != slot.component_type => {
                    problems.push(ConstructionProblem {
                        instance: inst.name.clone(),
                        detail: format!(
                            "dependency {} expects {}, {} is {}",
                            slot.name, slot.component_type, binding.target, target.decl.name
                        ),
                    })
                }
                Some(_) => {}
            }
        }
        for binding in &inst.bindings {
            if component.uses_slot(&binding.slot).is_none() {
                problems.push(ConstructionProblem {
                    instance: inst.name.clone(),
                    detail: format!("no such dependency slot {}", binding.slot),
                });
            }
        }
        if let Some(instance) = instances.get_mut(&inst.name) {
            for binding in &inst.bindings {
                instance
                    .deps
                    .insert(binding.slot.clone(), binding.target.clone());
            }
        }
    }

    if !problems.is_empty() {
        return Err(SdlError::Construction(problems));
    }

    Ok(SystemInstance {
        name: system_name.to_string(),
        instances,
    })
}
