//! Traffic generator control-plane types.
//!
//! A generator is a rate-driven caller of one method on the active system.
//! The canvas owns the worker task; this module owns the spec, the
//! field-mask patch logic, and the bulk start/stop accounting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SdlError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorSpec {
    pub id: Uuid,
    pub name: String,
    /// Dotted path of the target component instance.
    pub component: String,
    pub method: String,
    /// Calls per second; must be ≥ 0.
    pub rate: f64,
    /// Seconds to run once started; 0 = unbounded.
    pub duration: f64,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GeneratorSpec {
    pub fn validate(&self) -> Result<()> {
        if !(self.rate >= 0.0 && self.rate.is_finite()) {
            return Err(SdlError::InvalidArgument(format!(
                "generator rate must be ≥ 0, got {}",
                self.rate
            )));
        }
        if self.duration < 0.0 {
            return Err(SdlError::InvalidArgument(
                "generator duration must be ≥ 0".to_string(),
            ));
        }
        if self.component.is_empty() || self.method.is_empty() {
            return Err(SdlError::InvalidArgument(
                "generator needs a component and a method".to_string(),
            ));
        }
        Ok(())
    }
}

/// Partial update; only fields named in the mask are applied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneratorPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub component: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub rate: Option<f64>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// What an applied patch touched; the canvas restarts a running worker when
/// the target moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchEffect {
    pub target_changed: bool,
    pub rate_changed: bool,
}

pub fn apply_patch(
    spec: &mut GeneratorSpec,
    patch: &GeneratorPatch,
    field_mask: &[String],
) -> Result<PatchEffect> {
    let mut effect = PatchEffect {
        target_changed: false,
        rate_changed: false,
    };
    for field in field_mask {
        match field.as_str() {
            "name" => {
                if let Some(v) = &patch.name {
                    spec.name = v.clone();
                }
            }
            "component" => {
                if let Some(v) = &patch.component {
                    if v != &spec.component {
                        effect.target_changed = true;
                    }
                    spec.component = v.clone();
                }
            }
            "method" => {
                if let Some(v) = &patch.method {
                    if v != &spec.method {
                        effect.target_changed = true;
                    }
                    spec.method = v.clone();
                }
            }
            "rate" => {
                if let Some(v) = patch.rate {
                    if v != spec.rate {
                        effect.rate_changed = true;
                    }
                    spec.rate = v;
                }
            }
            "duration" => {
                if let Some(v) = patch.duration {
                    spec.duration = v;
                }
            }
            "enabled" => {
                if let Some(v) = patch.enabled {
                    spec.enabled = v;
                }
            }
            other => {
                return Err(SdlError::InvalidArgument(format!(
                    "unknown generator field in mask: {other}"
                )))
            }
        }
    }
    spec.validate()?;
    spec.updated_at = Utc::now();
    Ok(effect)
}

/// Counts for StartAll/StopAll.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkToggleOutcome {
    pub total: usize,
    pub changed: usize,
    pub already_in_state: usize,
    pub failed: Vec<Uuid>,
}
