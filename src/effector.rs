//! # Stage: Effectors
//!
//! ## Responsibility
//! The seam between the tuning core and whatever actually changes the
//! running system. An [`Effector`] claims one action category and knows
//! how to apply and revert actions of that category; the
//! [`EffectorRegistry`] routes actions to the right one. The core has no
//! knowledge of what a "response time fix" concretely does.
//!
//! ## Guarantees
//! - Non-panicking: failure is a `false` return, never an unwind
//! - One effector per category; re-registering a category replaces it
//!
//! ## NOT Responsible For
//! - Deciding whether an action helped (executor scores it)
//! - Sequencing or cancelling actions (session worker)

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::debug;

use crate::action::{ActionCategory, TuningAction};

// ---------------------------------------------------------------------------
// Effector trait
// ---------------------------------------------------------------------------

/// Something that can carry a tuning action out against the running
/// system, and undo it again.
///
/// This trait is object-safe so heterogeneous effectors can be stored as
/// `Arc<dyn Effector>` in one registry.
///
/// # Panics
/// Implementations must never panic; a change that cannot be made is a
/// `false` return.
#[async_trait]
pub trait Effector: Send + Sync {
    /// The action category this effector claims.
    fn category(&self) -> ActionCategory;

    /// Apply the action's new value. `true` means the change took effect.
    async fn apply(&self, action: &TuningAction) -> bool;

    /// Undo a previously applied action, restoring its old value.
    async fn revert(&self, action: &TuningAction) -> bool;
}

// ---------------------------------------------------------------------------
// EffectorRegistry
// ---------------------------------------------------------------------------

/// Category-keyed effector lookup. Built once before the controller
/// starts; cloning shares the registered effectors.
#[derive(Clone, Default)]
pub struct EffectorRegistry {
    effectors: HashMap<ActionCategory, Arc<dyn Effector>>,
}

impl EffectorRegistry {
    /// An empty registry. Actions routed through it all fail.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with a simulated effector for every category.
    pub fn with_simulated_defaults() -> Self {
        let mut registry = Self::new();
        for category in [
            ActionCategory::Latency,
            ActionCategory::Throughput,
            ActionCategory::Resource,
        ] {
            registry.register(Arc::new(SimulatedEffector::new(category)));
        }
        registry
    }

    /// Register an effector under the category it claims, replacing any
    /// previous holder of that category.
    pub fn register(&mut self, effector: Arc<dyn Effector>) {
        self.effectors.insert(effector.category(), effector);
    }

    pub fn get(&self, category: ActionCategory) -> Option<&Arc<dyn Effector>> {
        self.effectors.get(&category)
    }

    pub fn len(&self) -> usize {
        self.effectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effectors.is_empty()
    }
}

// ---------------------------------------------------------------------------
// SimulatedEffector
// ---------------------------------------------------------------------------

/// An `Effector` that pretends to make the change, waiting a jittered
/// simulated latency and always succeeding. The stand-in until a real
/// integration claims the category.
pub struct SimulatedEffector {
    category: ActionCategory,
    base_delay: Duration,
}

impl SimulatedEffector {
    pub fn new(category: ActionCategory) -> Self {
        Self::with_delay(category, Duration::from_millis(25))
    }

    pub fn with_delay(category: ActionCategory, base_delay: Duration) -> Self {
        Self { category, base_delay }
    }

    async fn settle(&self) {
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        tokio::time::sleep(self.base_delay.mul_f64(jitter)).await;
    }
}

#[async_trait]
impl Effector for SimulatedEffector {
    fn category(&self) -> ActionCategory {
        self.category
    }

    async fn apply(&self, action: &TuningAction) -> bool {
        debug!(
            action_id = %action.id,
            parameter = %action.parameter,
            value = action.new_value,
            "simulated apply"
        );
        self.settle().await;
        true
    }

    async fn revert(&self, action: &TuningAction) -> bool {
        debug!(
            action_id = %action.id,
            parameter = %action.parameter,
            value = action.old_value,
            "simulated revert"
        );
        self.settle().await;
        true
    }
}

// ---------------------------------------------------------------------------
// RecordingEffector
// ---------------------------------------------------------------------------

/// An `Effector` that logs every call instead of touching anything.
///
/// Primarily intended for unit tests and development tooling where a real
/// downstream system is not available.
pub struct RecordingEffector {
    category: ActionCategory,
    apply_ok: bool,
    revert_ok: bool,
    log: Mutex<Vec<String>>,
}

impl RecordingEffector {
    /// A recording effector whose calls all succeed.
    pub fn new(category: ActionCategory) -> Self {
        Self {
            category,
            apply_ok: true,
            revert_ok: true,
            log: Mutex::new(Vec::new()),
        }
    }

    /// A recording effector whose `apply` always reports failure.
    pub fn failing_apply(category: ActionCategory) -> Self {
        Self { apply_ok: false, ..Self::new(category) }
    }

    /// A recording effector whose `revert` always reports failure.
    pub fn failing_revert(category: ActionCategory) -> Self {
        Self { revert_ok: false, ..Self::new(category) }
    }

    /// Every call made so far, in order, as `"apply <parameter>"` /
    /// `"revert <parameter>"` entries.
    pub fn calls(&self) -> Vec<String> {
        match self.log.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => Vec::new(),
        }
    }

    fn record(&self, verb: &str, action: &TuningAction) {
        if let Ok(mut guard) = self.log.lock() {
            guard.push(format!("{verb} {}", action.parameter));
        }
    }
}

#[async_trait]
impl Effector for RecordingEffector {
    fn category(&self) -> ActionCategory {
        self.category
    }

    async fn apply(&self, action: &TuningAction) -> bool {
        self.record("apply", action);
        self.apply_ok
    }

    async fn revert(&self, action: &TuningAction) -> bool {
        self.record("revert", action);
        self.revert_ok
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
