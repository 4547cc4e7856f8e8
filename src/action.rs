//! # Stage: Tuning Actions
//!
//! ## Responsibility
//! The unit of remediation work: what kind of adjustment to make, which
//! effector category carries it out, and where the action currently sits
//! in its lifecycle.
//!
//! ## Guarantees
//! - Status transitions are one-way once a terminal state is reached
//! - Every action records both the value it moves from and the value it
//!   moves toward, so a rollback can restore the original target
//!
//! ## NOT Responsible For
//! - Choosing which actions to emit (generator)
//! - Applying actions to the running system (executor / effectors)

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::metrics::{now_ms, PerformanceMetrics};

// ---------------------------------------------------------------------------
// ActionKind — what is being adjusted
// ---------------------------------------------------------------------------

/// The dimension a tuning action adjusts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    AdjustResponseTime,
    AdjustThroughput,
    AdjustCpu,
    AdjustMemory,
}

impl ActionKind {
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::AdjustResponseTime => "adjust_response_time",
            ActionKind::AdjustThroughput => "adjust_throughput",
            ActionKind::AdjustCpu => "adjust_cpu",
            ActionKind::AdjustMemory => "adjust_memory",
        }
    }

    /// The tunable the action writes, as published to effectors.
    pub fn parameter(&self) -> &'static str {
        match self {
            ActionKind::AdjustResponseTime => "response_time_target_ms",
            ActionKind::AdjustThroughput => "throughput_target_rps",
            ActionKind::AdjustCpu => "cpu_usage_target_pct",
            ActionKind::AdjustMemory => "memory_usage_target_pct",
        }
    }

    /// Which effector family handles this kind of adjustment.
    pub fn category(&self) -> ActionCategory {
        match self {
            ActionKind::AdjustResponseTime => ActionCategory::Latency,
            ActionKind::AdjustThroughput => ActionCategory::Throughput,
            ActionKind::AdjustCpu | ActionKind::AdjustMemory => ActionCategory::Resource,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ---------------------------------------------------------------------------
// ActionCategory — which effector family applies it
// ---------------------------------------------------------------------------

/// Effector families. Each registered effector claims exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionCategory {
    Latency,
    Throughput,
    Resource,
}

impl ActionCategory {
    pub fn name(&self) -> &'static str {
        match self {
            ActionCategory::Latency => "latency",
            ActionCategory::Throughput => "throughput",
            ActionCategory::Resource => "resource",
        }
    }
}

impl fmt::Display for ActionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ---------------------------------------------------------------------------
// ActionStatus — lifecycle
// ---------------------------------------------------------------------------

/// Where an action sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionStatus {
    /// Generated, not yet picked up by the session worker.
    Pending,
    /// Handed to an effector, outcome not yet scored.
    Executing,
    /// Applied and kept; the post-apply score cleared the rollback bar.
    Completed,
    /// The effector rejected the change or no effector was registered.
    Failed,
    /// Applied, scored as a regression, and reverted.
    RolledBack,
}

impl ActionStatus {
    pub fn name(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Executing => "executing",
            ActionStatus::Completed => "completed",
            ActionStatus::Failed => "failed",
            ActionStatus::RolledBack => "rolled_back",
        }
    }

    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionStatus::Completed | ActionStatus::Failed | ActionStatus::RolledBack
        )
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ---------------------------------------------------------------------------
// TuningAction
// ---------------------------------------------------------------------------

/// One concrete adjustment: move `parameter` from `old_value` to
/// `new_value`. On rollback the two are swapped so the record always
/// reads as "what is in effect now" vs "what it was before". The executor
/// fills in `before`, `after`, and `improvement_pct` as it runs; a
/// rolled-back action keeps the improvement it measured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningAction {
    pub id: String,
    pub session_id: String,
    pub kind: ActionKind,
    /// Effector routing key, derived from `kind` at creation.
    pub category: ActionCategory,
    /// The tunable being written, e.g. `response_time_target_ms`.
    pub parameter: String,
    /// Value in effect before the action ran.
    pub old_value: f64,
    /// Value the action moves the tunable to.
    pub new_value: f64,
    /// Snapshot captured immediately before the effector applied the change.
    pub before: Option<PerformanceMetrics>,
    /// Snapshot captured after the change took effect.
    pub after: Option<PerformanceMetrics>,
    /// Measured improvement for this action, in percent.
    pub improvement_pct: f64,
    pub status: ActionStatus,
    pub created_at_ms: u64,
}

impl TuningAction {
    pub fn new(session_id: &str, kind: ActionKind, old_value: f64, new_value: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            kind,
            category: kind.category(),
            parameter: kind.parameter().to_string(),
            old_value,
            new_value,
            before: None,
            after: None,
            improvement_pct: 0.0,
            status: ActionStatus::Pending,
            created_at_ms: now_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
