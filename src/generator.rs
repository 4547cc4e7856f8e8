//! # Stage: Action Generation
//!
//! ## Responsibility
//! The pure mapping from (policy, metric snapshot) to an ordered list of
//! candidate actions. One rule family per dimension, emitted in a fixed
//! order: response time, throughput, CPU, memory. Foundational fixes go
//! first since later actions only run after earlier ones stabilize.
//!
//! ## Guarantees
//! - No side effects, no clock, no randomness besides action ids
//! - Emitted content (kinds, order, parameters, values) is a pure
//!   function of the inputs
//! - Every target honors the policy's safety clamp and the list never
//!   exceeds the per-session action bound
//!
//! ## NOT Responsible For
//! - Deciding whether tuning is warranted at all (evaluator)
//! - Applying or sequencing the actions (executor / session worker)

use crate::action::{ActionKind, TuningAction};
use crate::metrics::PerformanceMetrics;
use crate::policy::{DimensionParams, SafetyLimits, TuningPolicy};

/// Generate the candidate actions a session under `policy` would run
/// against `metrics`.
///
/// A dimension fires when its one-sided fractional deviation is strictly
/// greater than the policy's `target_improvement_pct / 100` for that
/// dimension. A dimension with a non-positive baseline never fires. The
/// proposed target moves the expected value one adjustment step in the
/// improving direction (down for response time, CPU, and memory, up for
/// throughput), clamped to the safety-limit window.
pub fn generate_actions(
    policy: &TuningPolicy,
    metrics: &PerformanceMetrics,
    session_id: &str,
) -> Vec<TuningAction> {
    let limits = &policy.safety_limits;
    let mut actions = Vec::new();

    let rt = metrics.response_time_ms;
    if fires(rt.over_expected(), &policy.response_time) {
        let target = shrink_target(rt.expected, &policy.response_time, limits);
        actions.push(TuningAction::new(
            session_id,
            ActionKind::AdjustResponseTime,
            rt.expected,
            target,
        ));
    }

    let tp = metrics.throughput_rps;
    if fires(tp.under_expected(), &policy.throughput) {
        let target = grow_target(tp.expected, &policy.throughput, limits);
        actions.push(TuningAction::new(
            session_id,
            ActionKind::AdjustThroughput,
            tp.expected,
            target,
        ));
    }

    let cpu = metrics.resources.cpu_pct;
    if fires(cpu.over_expected(), &policy.cpu) {
        let target = shrink_target(cpu.expected, &policy.cpu, limits);
        actions.push(TuningAction::new(
            session_id,
            ActionKind::AdjustCpu,
            cpu.expected,
            target,
        ));
    }

    let mem = metrics.resources.memory_pct;
    if fires(mem.over_expected(), &policy.memory) {
        let target = shrink_target(mem.expected, &policy.memory, limits);
        actions.push(TuningAction::new(
            session_id,
            ActionKind::AdjustMemory,
            mem.expected,
            target,
        ));
    }

    actions.truncate(limits.max_actions_per_session);
    actions
}

fn fires(deviation: f64, params: &DimensionParams) -> bool {
    deviation > params.target_improvement_pct / 100.0
}

fn shrink_target(expected: f64, params: &DimensionParams, limits: &SafetyLimits) -> f64 {
    clamp_target(
        expected * (1.0 - params.adjustment_step_pct / 100.0),
        expected,
        limits,
    )
}

fn grow_target(expected: f64, params: &DimensionParams, limits: &SafetyLimits) -> f64 {
    clamp_target(
        expected * (1.0 + params.adjustment_step_pct / 100.0),
        expected,
        limits,
    )
}

fn clamp_target(target: f64, expected: f64, limits: &SafetyLimits) -> f64 {
    target
        .max(expected * limits.min_target_factor)
        .min(expected * limits.max_target_factor)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
