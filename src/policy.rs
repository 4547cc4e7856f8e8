//! # Stage: Tuning Policies
//!
//! ## Responsibility
//! The policy data model (risk level, per-dimension parameters, resource
//! targets, safety limits) and the [`PolicyStore`] that registers,
//! validates, and serves policies. Three built-ins exist at startup;
//! operators may register more or replace existing ones via update.
//!
//! ## Guarantees
//! - No two stored policies share an id
//! - A rejected register/update leaves the store exactly as it was
//! - Stored policies are immutable except through `update`
//!
//! ## NOT Responsible For
//! - Picking a policy for a given metric snapshot (evaluator)
//! - Turning a policy into actions (generator)

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, TunerError};

// ---------------------------------------------------------------------------
// PolicyKind
// ---------------------------------------------------------------------------

/// Risk level of a policy. Severity banding maps metric deviation onto
/// one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PolicyKind {
    Conservative,
    Balanced,
    Aggressive,
}

impl PolicyKind {
    pub fn name(&self) -> &'static str {
        match self {
            PolicyKind::Conservative => "conservative",
            PolicyKind::Balanced => "balanced",
            PolicyKind::Aggressive => "aggressive",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ---------------------------------------------------------------------------
// Policy parameter blocks
// ---------------------------------------------------------------------------

/// Per-dimension tuning parameters, all in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DimensionParams {
    /// Deviation from baseline (as a percentage of it) beyond which the
    /// dimension is considered in need of tuning.
    pub target_improvement_pct: f64,
    /// Largest regression the policy tolerates on this dimension, as
    /// surfaced to operators alongside the controller rollback threshold.
    pub max_degradation_pct: f64,
    /// Size of one corrective step, as a percentage of the baseline.
    pub adjustment_step_pct: f64,
}

impl DimensionParams {
    pub fn new(target_improvement_pct: f64, max_degradation_pct: f64, adjustment_step_pct: f64) -> Self {
        Self {
            target_improvement_pct,
            max_degradation_pct,
            adjustment_step_pct,
        }
    }
}

/// Utilization levels the policy steers resources toward, percent of
/// capacity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceTargets {
    pub cpu_pct: f64,
    pub memory_pct: f64,
}

/// Hard bounds on what a single session may do.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SafetyLimits {
    /// Generated targets never go below `expected × min_target_factor`.
    pub min_target_factor: f64,
    /// Generated targets never go above `expected × max_target_factor`.
    pub max_target_factor: f64,
    /// A session's action list is truncated to this many entries.
    pub max_actions_per_session: usize,
}

// ---------------------------------------------------------------------------
// TuningPolicy
// ---------------------------------------------------------------------------

/// A named, validated bundle of tuning parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningPolicy {
    pub id: String,
    pub name: String,
    pub kind: PolicyKind,
    pub response_time: DimensionParams,
    pub throughput: DimensionParams,
    pub cpu: DimensionParams,
    pub memory: DimensionParams,
    pub resource_targets: ResourceTargets,
    pub safety_limits: SafetyLimits,
    /// Minimum gap between sessions under this policy, advisory.
    pub min_session_gap_secs: u64,
    /// Selection weight when several policies share a kind; higher wins.
    pub priority: u32,
}

impl TuningPolicy {
    /// The built-in policy for a risk level.
    pub fn builtin(kind: PolicyKind) -> Self {
        let (dims, targets, limits, gap, priority) = match kind {
            PolicyKind::Conservative => (
                DimensionParams::new(15.0, 3.0, 2.0),
                ResourceTargets { cpu_pct: 60.0, memory_pct: 70.0 },
                SafetyLimits {
                    min_target_factor: 0.9,
                    max_target_factor: 1.1,
                    max_actions_per_session: 2,
                },
                600,
                1,
            ),
            PolicyKind::Balanced => (
                DimensionParams::new(10.0, 5.0, 3.0),
                ResourceTargets { cpu_pct: 70.0, memory_pct: 75.0 },
                SafetyLimits {
                    min_target_factor: 0.8,
                    max_target_factor: 1.2,
                    max_actions_per_session: 3,
                },
                300,
                2,
            ),
            PolicyKind::Aggressive => (
                DimensionParams::new(5.0, 10.0, 5.0),
                ResourceTargets { cpu_pct: 80.0, memory_pct: 85.0 },
                SafetyLimits {
                    min_target_factor: 0.7,
                    max_target_factor: 1.5,
                    max_actions_per_session: 4,
                },
                120,
                3,
            ),
        };
        Self {
            id: kind.name().to_string(),
            name: format!("{} tuning", kind.name()),
            kind,
            response_time: dims,
            throughput: dims,
            cpu: dims,
            memory: dims,
            resource_targets: targets,
            safety_limits: limits,
            min_session_gap_secs: gap,
            priority,
        }
    }

    /// Structural validation, applied before any store mutation.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(TunerError::Validation("policy id is empty".into()));
        }
        if self.name.trim().is_empty() {
            return Err(TunerError::Validation(format!(
                "policy {} has an empty name",
                self.id
            )));
        }
        check_dimension("response_time", &self.response_time)?;
        check_dimension("throughput", &self.throughput)?;
        check_dimension("cpu", &self.cpu)?;
        check_dimension("memory", &self.memory)?;
        check_resource_target("cpu", self.resource_targets.cpu_pct)?;
        check_resource_target("memory", self.resource_targets.memory_pct)?;
        let limits = &self.safety_limits;
        if limits.min_target_factor <= 0.0 {
            return Err(TunerError::Validation(format!(
                "min_target_factor must be positive, got {}",
                limits.min_target_factor
            )));
        }
        if limits.min_target_factor > limits.max_target_factor {
            return Err(TunerError::Validation(format!(
                "safety limits inconsistent: min_target_factor {} exceeds max_target_factor {}",
                limits.min_target_factor, limits.max_target_factor
            )));
        }
        if limits.max_actions_per_session == 0 {
            return Err(TunerError::Validation(
                "max_actions_per_session must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn check_dimension(dimension: &str, params: &DimensionParams) -> Result<()> {
    if params.target_improvement_pct <= 0.0 {
        return Err(TunerError::Validation(format!(
            "{dimension}: target_improvement_pct must be positive, got {}",
            params.target_improvement_pct
        )));
    }
    if params.max_degradation_pct <= 0.0 {
        return Err(TunerError::Validation(format!(
            "{dimension}: max_degradation_pct must be positive, got {}",
            params.max_degradation_pct
        )));
    }
    if params.adjustment_step_pct <= 0.0 {
        return Err(TunerError::Validation(format!(
            "{dimension}: adjustment_step_pct must be positive, got {}",
            params.adjustment_step_pct
        )));
    }
    Ok(())
}

fn check_resource_target(resource: &str, pct: f64) -> Result<()> {
    if pct <= 0.0 || pct > 100.0 {
        return Err(TunerError::Validation(format!(
            "{resource} resource target must be in (0, 100], got {pct}"
        )));
    }
    Ok(())
}

static BUILTIN_POLICIES: Lazy<Vec<TuningPolicy>> = Lazy::new(|| {
    vec![
        TuningPolicy::builtin(PolicyKind::Conservative),
        TuningPolicy::builtin(PolicyKind::Balanced),
        TuningPolicy::builtin(PolicyKind::Aggressive),
    ]
});

// ---------------------------------------------------------------------------
// PolicyStore
// ---------------------------------------------------------------------------

/// Shared, validated policy registry. Clone freely; all clones share the
/// same map.
#[derive(Clone, Default)]
pub struct PolicyStore {
    policies: Arc<RwLock<HashMap<String, TuningPolicy>>>,
}

impl PolicyStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-loaded with the three built-in policies.
    pub fn with_builtins() -> Self {
        let store = Self::new();
        if let Ok(mut map) = store.policies.write() {
            for policy in BUILTIN_POLICIES.iter() {
                map.insert(policy.id.clone(), policy.clone());
            }
        }
        store
    }

    /// Register a new policy. Fails, leaving the store untouched, when the
    /// policy is structurally invalid or its id is already taken.
    pub fn register(&self, policy: TuningPolicy) -> Result<()> {
        policy.validate()?;
        let mut map = self
            .policies
            .write()
            .map_err(|_| TunerError::Validation("policy store lock poisoned".into()))?;
        if map.contains_key(&policy.id) {
            return Err(TunerError::Validation(format!(
                "policy id already exists: {}",
                policy.id
            )));
        }
        info!(policy_id = %policy.id, kind = %policy.kind, "policy registered");
        map.insert(policy.id.clone(), policy);
        Ok(())
    }

    /// Replace an existing policy. The only way to change a stored policy,
    /// built-ins included.
    pub fn update(&self, policy: TuningPolicy) -> Result<()> {
        policy.validate()?;
        let mut map = self
            .policies
            .write()
            .map_err(|_| TunerError::Validation("policy store lock poisoned".into()))?;
        if !map.contains_key(&policy.id) {
            return Err(TunerError::PolicyNotFound(policy.id.clone()));
        }
        info!(policy_id = %policy.id, kind = %policy.kind, "policy updated");
        map.insert(policy.id.clone(), policy);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<TuningPolicy> {
        self.policies.read().ok()?.get(id).cloned()
    }

    /// The policy to use for a risk level: highest priority among those of
    /// that kind, ties broken by id so selection stays deterministic.
    pub fn by_kind(&self, kind: PolicyKind) -> Option<TuningPolicy> {
        let map = self.policies.read().ok()?;
        map.values()
            .filter(|p| p.kind == kind)
            .max_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| b.id.cmp(&a.id))
            })
            .cloned()
    }

    /// Snapshot copy of every stored policy.
    pub fn snapshot(&self) -> HashMap<String, TuningPolicy> {
        self.policies
            .read()
            .map(|map| map.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.policies.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
