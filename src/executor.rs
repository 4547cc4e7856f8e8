//! # Stage: Action Execution
//!
//! ## Responsibility
//! Runs one action at a time: capture metrics, route to the claimed
//! effector, capture metrics again, score the delta, and roll the action
//! back when the score says it made things worse.
//!
//! ## Guarantees
//! - A failed action is marked `Failed` and never aborts anything else
//! - A regression past the rollback threshold is reverted through the
//!   same effector that applied it, with old/new values swapped
//! - Rollback is logged, never surfaced as a caller error
//!
//! ## NOT Responsible For
//! - Sequencing actions or stabilization waits (session worker)
//! - Deciding the rollback threshold (controller configuration)

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::action::{ActionStatus, TuningAction};
use crate::effector::EffectorRegistry;
use crate::metrics::{improvement_pct, MetricsSource};

/// Executes and, when needed, reverts single actions. Clone freely; all
/// clones share the registry and metrics source.
#[derive(Clone)]
pub struct ActionExecutor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    registry: EffectorRegistry,
    source: Arc<dyn MetricsSource>,
    /// Negative percentage; scores strictly below it trigger rollback.
    rollback_threshold_pct: f64,
}

impl ActionExecutor {
    pub fn new(
        registry: EffectorRegistry,
        source: Arc<dyn MetricsSource>,
        rollback_threshold_pct: f64,
    ) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                registry,
                source,
                rollback_threshold_pct,
            }),
        }
    }

    /// Run one action to a terminal status.
    ///
    /// Returns `true` when the effector applied the change, including the
    /// case where the change was subsequently rolled back; `false` when no
    /// effector is registered for the category or the effector rejected
    /// the change.
    pub async fn execute(&self, action: &mut TuningAction) -> bool {
        action.status = ActionStatus::Executing;

        let effector = match self.inner.registry.get(action.category) {
            Some(effector) => Arc::clone(effector),
            None => {
                warn!(
                    action_id = %action.id,
                    category = %action.category,
                    "no effector registered for category, marking action failed"
                );
                action.status = ActionStatus::Failed;
                return false;
            }
        };

        action.before = self.inner.source.latest();

        if !effector.apply(action).await {
            warn!(
                action_id = %action.id,
                parameter = %action.parameter,
                "effector rejected action, marking failed"
            );
            action.status = ActionStatus::Failed;
            return false;
        }

        action.after = self.inner.source.latest();
        action.improvement_pct = match (&action.before, &action.after) {
            (Some(before), Some(after)) => improvement_pct(before, after),
            _ => 0.0,
        };
        action.status = ActionStatus::Completed;

        debug!(
            action_id = %action.id,
            parameter = %action.parameter,
            improvement_pct = action.improvement_pct,
            "action applied"
        );

        if action.improvement_pct < self.inner.rollback_threshold_pct {
            warn!(
                action_id = %action.id,
                improvement_pct = action.improvement_pct,
                threshold_pct = self.inner.rollback_threshold_pct,
                "regression detected, rolling action back"
            );
            self.rollback(action).await;
        }

        true
    }

    /// Revert an applied action through its effector. On success the
    /// old/new values are swapped and the action is marked `RolledBack`;
    /// on revert failure the applied value and `Completed` status stand.
    pub async fn rollback(&self, action: &mut TuningAction) -> bool {
        let effector = match self.inner.registry.get(action.category) {
            Some(effector) => Arc::clone(effector),
            None => {
                error!(
                    action_id = %action.id,
                    category = %action.category,
                    "cannot roll back, no effector for category"
                );
                return false;
            }
        };

        if !effector.revert(action).await {
            error!(
                action_id = %action.id,
                parameter = %action.parameter,
                "revert failed, keeping applied value"
            );
            return false;
        }

        std::mem::swap(&mut action.old_value, &mut action.new_value);
        action.status = ActionStatus::RolledBack;
        info!(
            action_id = %action.id,
            parameter = %action.parameter,
            restored_value = action.new_value,
            "action rolled back"
        );
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
