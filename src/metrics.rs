//! # Stage: Metric Snapshots
//!
//! ## Responsibility
//! The read-only view of the system under tuning: [`PerformanceMetrics`]
//! snapshots produced by the external aggregation pipeline, the
//! [`MetricsSource`] seam the controller polls them through, and the
//! before/after improvement scoring shared by the action executor and
//! session finalization.
//!
//! ## Guarantees
//! - Snapshots are never mutated by the tuning core
//! - All scoring is guarded against zero/degenerate baselines
//! - `MetricsSource::latest` is synchronous and non-blocking
//!
//! ## NOT Responsible For
//! - Collecting or aggregating raw measurements (external pipeline)
//! - Deciding whether to tune (evaluator, `tuner` module)

use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch. Used for all wall-clock stamps.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// MetricPair — one observed/expected value pair
// ---------------------------------------------------------------------------

/// A current observation paired with its expected baseline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricPair {
    /// Latest observed value.
    pub current: f64,
    /// Baseline the observation is judged against.
    pub expected: f64,
}

impl MetricPair {
    pub fn new(current: f64, expected: f64) -> Self {
        Self { current, expected }
    }

    /// Fraction by which `current` exceeds `expected`, or 0.0 when it does
    /// not (or when the baseline is not positive).
    pub fn over_expected(&self) -> f64 {
        if self.expected <= 0.0 {
            return 0.0;
        }
        ((self.current - self.expected) / self.expected).max(0.0)
    }

    /// Fraction by which `current` falls short of `expected`, or 0.0 when
    /// it does not (or when the baseline is not positive).
    pub fn under_expected(&self) -> f64 {
        if self.expected <= 0.0 {
            return 0.0;
        }
        ((self.expected - self.current) / self.expected).max(0.0)
    }
}

// ---------------------------------------------------------------------------
// Resource usage
// ---------------------------------------------------------------------------

/// Per-resource utilization pairs, all in percent of capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetrics {
    pub cpu_pct: MetricPair,
    pub memory_pct: MetricPair,
    pub disk_pct: MetricPair,
    pub network_pct: MetricPair,
}

// ---------------------------------------------------------------------------
// PerformanceMetrics — the snapshot the controller consumes
// ---------------------------------------------------------------------------

/// A point-in-time snapshot of service performance, as published by the
/// external metrics pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// End-to-end response time in milliseconds. Lower is better.
    pub response_time_ms: MetricPair,
    /// Requests per second. Higher is better.
    pub throughput_rps: MetricPair,
    /// Fraction of requests succeeding, in percent. Higher is better.
    pub success_rate_pct: MetricPair,
    /// CPU / memory / disk / network utilization.
    pub resources: ResourceMetrics,
    /// Wall-clock capture time, milliseconds since the epoch.
    #[serde(default)]
    pub captured_at_ms: u64,
}

// ---------------------------------------------------------------------------
// Improvement scoring
// ---------------------------------------------------------------------------

/// Signed percentage improvement between two snapshots.
///
/// The score is the mean of up to three component deltas:
/// - response time: `(before - after) / before × 100` — shrinking is good
/// - throughput: `(after - before) / before × 100` — growing is good
/// - success rate: `(after - before) / before × 100` — growing is good
///
/// A component only participates when its `before` current value is
/// strictly positive; with no comparable component the score is 0.0.
pub fn improvement_pct(before: &PerformanceMetrics, after: &PerformanceMetrics) -> f64 {
    let mut deltas: Vec<f64> = Vec::with_capacity(3);

    let rt = before.response_time_ms.current;
    if rt > 0.0 {
        deltas.push((rt - after.response_time_ms.current) / rt * 100.0);
    }
    let tp = before.throughput_rps.current;
    if tp > 0.0 {
        deltas.push((after.throughput_rps.current - tp) / tp * 100.0);
    }
    let sr = before.success_rate_pct.current;
    if sr > 0.0 {
        deltas.push((after.success_rate_pct.current - sr) / sr * 100.0);
    }

    if deltas.is_empty() {
        0.0
    } else {
        deltas.iter().sum::<f64>() / deltas.len() as f64
    }
}

// ---------------------------------------------------------------------------
// MetricsSource — the GetMetrics seam
// ---------------------------------------------------------------------------

/// Where the controller reads snapshots from.
///
/// `latest` must be synchronous and non-blocking: return the most recent
/// snapshot, or `None` when the pipeline has nothing yet. Implementations
/// are shared across the evaluator, the action executor, and session
/// finalization, so they must be cheap to call.
pub trait MetricsSource: Send + Sync {
    fn latest(&self) -> Option<PerformanceMetrics>;
}

/// An in-process slot the platform's aggregation pipeline writes into.
///
/// Clone freely — all clones share the same slot.
///
/// # Example
/// ```ignore
/// let source = SharedMetricsSource::new();
/// source.set(snapshot);
/// assert!(source.latest().is_some());
/// ```
#[derive(Clone, Default)]
pub struct SharedMetricsSource {
    slot: Arc<RwLock<Option<PerformanceMetrics>>>,
}

impl SharedMetricsSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new snapshot, replacing any previous one.
    pub fn set(&self, metrics: PerformanceMetrics) {
        if let Ok(mut slot) = self.slot.write() {
            *slot = Some(metrics);
        }
    }

    /// Drop the stored snapshot; `latest` returns `None` until the next
    /// `set`.
    pub fn clear(&self) {
        if let Ok(mut slot) = self.slot.write() {
            *slot = None;
        }
    }
}

impl MetricsSource for SharedMetricsSource {
    fn latest(&self) -> Option<PerformanceMetrics> {
        self.slot.read().ok().and_then(|slot| slot.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
