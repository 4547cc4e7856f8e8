//! # Performance Tuner
//!
//! The controller that closes the tuning feedback loop:
//!
//! ```text
//! MetricsSource ──► should_tune ──► select_policy_kind ──► PolicyStore
//!      ▲                                                       │
//!      │              SessionManager ◄────────────────────────┘
//!      │                    │
//! Effectors ◄───────────────┘  (apply / revert targets)
//! ```
//!
//! ## What It Does
//!
//! 1. Samples the `MetricsSource` on a fixed evaluation interval.
//! 2. Decides whether the sample deviates enough to act ([`should_tune`]).
//! 3. Grades the response-time overrun into a policy kind
//!    ([`select_policy_kind`]) and resolves the winning policy from the
//!    `PolicyStore`.
//! 4. Opens a session through the `SessionManager` and hands it to a
//!    detached worker; the evaluator never blocks on execution.
//! 5. Reaps sessions that outlive the configured timeout.
//! 6. Exposes counters and live session state via [`TunerStatus`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use retune::metrics::SharedMetricsSource;
//! use retune::tuner::PerformanceTuner;
//! use retune::config::TunerConfig;
//! use std::sync::Arc;
//!
//! let source = Arc::new(SharedMetricsSource::new());
//! let tuner = PerformanceTuner::new(TunerConfig::default(), source.clone());
//! tuner.start()?;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::action::TuningAction;
use crate::config::TunerConfig;
use crate::effector::EffectorRegistry;
use crate::error::{Result, TunerError};
use crate::executor::ActionExecutor;
use crate::metrics::{MetricsSource, PerformanceMetrics};
use crate::policy::{PolicyKind, PolicyStore, TuningPolicy};
use crate::session::{CreateOutcome, SessionManager, SessionTallies, TuningSession};

// ---------------------------------------------------------------------------
// Evaluation predicates
// ---------------------------------------------------------------------------

/// Decide whether a metrics sample deviates enough to open a session.
///
/// Latency, throughput and success rate compare their relative deviation
/// from expected against `safety_margin_pct / 100`. CPU and memory compare
/// the raw utilization percentage against the margin value itself. The
/// relative-vs-absolute split is intentional and must not be normalized.
pub fn should_tune(metrics: &PerformanceMetrics, safety_margin_pct: f64) -> bool {
    let margin = safety_margin_pct / 100.0;
    metrics.response_time_ms.over_expected() > margin
        || metrics.throughput_rps.under_expected() > margin
        || metrics.success_rate_pct.under_expected() > margin
        || metrics.resources.cpu_pct.current > safety_margin_pct
        || metrics.resources.memory_pct.current > safety_margin_pct
}

/// Grade the response-time overrun into a policy kind.
///
/// Only response time participates in the grading, even though four
/// dimensions feed [`should_tune`]: above 2x expected is aggressive, above
/// 1.5x is balanced, anything milder is conservative.
pub fn select_policy_kind(metrics: &PerformanceMetrics) -> PolicyKind {
    let rt = &metrics.response_time_ms;
    if rt.current > rt.expected * 2.0 {
        PolicyKind::Aggressive
    } else if rt.current > rt.expected * 1.5 {
        PolicyKind::Balanced
    } else {
        PolicyKind::Conservative
    }
}

// ---------------------------------------------------------------------------
// TunerStatus — observable state snapshot
// ---------------------------------------------------------------------------

/// Counters about the tuner's activity, readable from outside the loops.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TunerStatus {
    /// Whether the evaluation and reaper loops are currently up.
    pub running: bool,
    /// Evaluation passes completed since construction.
    pub evaluations: u64,
    /// Passes skipped because the active-session set was full.
    pub skipped_at_capacity: u64,
    /// Sessions currently executing.
    pub active_sessions: usize,
    /// Lifetime session and action tallies.
    pub tallies: SessionTallies,
}

// ---------------------------------------------------------------------------
// PerformanceTuner
// ---------------------------------------------------------------------------

struct TunerInner {
    config: TunerConfig,
    source: Arc<dyn MetricsSource>,
    policies: PolicyStore,
    manager: SessionManager,
    /// Present between `start` and `stop`; sending `true` stops both loops.
    run_state: Mutex<Option<watch::Sender<bool>>>,
    evaluations: AtomicU64,
    skipped_at_capacity: AtomicU64,
}

/// Ties policies, sessions, and effectors into a single runnable controller.
///
/// Clone freely — all clones share the same state.
#[derive(Clone)]
pub struct PerformanceTuner {
    inner: Arc<TunerInner>,
}

impl PerformanceTuner {
    /// Create a tuner with the built-in policies and simulated effectors.
    /// Call [`start`](Self::start) to bring up the control loops.
    pub fn new(config: TunerConfig, source: Arc<dyn MetricsSource>) -> Self {
        Self::builder(source).config(config).build()
    }

    /// Start building a tuner that reads from `source`.
    pub fn builder(source: Arc<dyn MetricsSource>) -> PerformanceTunerBuilder {
        PerformanceTunerBuilder::new(source)
    }

    // -------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------

    /// Start the evaluation and reaper loops.
    ///
    /// # Errors
    /// Returns [`TunerError::AlreadyRunning`] when the loops are already up.
    /// The first `start` wins; no duplicate loops are ever spawned.
    pub fn start(&self) -> Result<()> {
        let mut run_state = match self.inner.run_state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if run_state.is_some() {
            return Err(TunerError::AlreadyRunning);
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        self.spawn_evaluator(stop_rx.clone());
        self.spawn_reaper(stop_rx);
        *run_state = Some(stop_tx);

        info!(
            evaluation_interval_ms = self.inner.config.evaluation_interval_ms,
            reaper_interval_ms = self.inner.config.reaper_interval_ms,
            max_concurrent_sessions = self.inner.config.max_concurrent_sessions,
            "performance tuner started"
        );
        Ok(())
    }

    /// Stop the evaluation and reaper loops.
    ///
    /// Sessions already executing keep running to completion; stopping only
    /// halts the loops that open and reap sessions. A stopped tuner can be
    /// started again.
    ///
    /// # Errors
    /// Returns [`TunerError::NotRunning`] when the loops are not up.
    pub fn stop(&self) -> Result<()> {
        let mut run_state = match self.inner.run_state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match run_state.take() {
            Some(stop_tx) => {
                stop_tx.send(true).ok();
                info!("performance tuner stopped");
                Ok(())
            }
            None => Err(TunerError::NotRunning),
        }
    }

    /// Whether the control loops are currently up.
    pub fn is_running(&self) -> bool {
        self.inner
            .run_state
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    fn spawn_evaluator(&self, mut stop_rx: watch::Receiver<bool>) {
        let tuner = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tuner.inner.config.evaluation_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        tuner.evaluate_once();
                    }
                    _ = stop_rx.wait_for(|stop| *stop) => {
                        debug!("evaluation loop stopping");
                        return;
                    }
                }
            }
        });
    }

    fn spawn_reaper(&self, mut stop_rx: watch::Receiver<bool>) {
        let tuner = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tuner.inner.config.reaper_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        tuner
                            .inner
                            .manager
                            .expire_overdue(tuner.inner.config.session_timeout());
                    }
                    _ = stop_rx.wait_for(|stop| *stop) => {
                        debug!("reaper loop stopping");
                        return;
                    }
                }
            }
        });
    }

    // -------------------------------------------------------------------
    // Evaluation
    // -------------------------------------------------------------------

    /// Run one evaluation pass against the latest metrics sample.
    ///
    /// This is `pub` so tests can drive the controller without spawning the
    /// interval loops. Returns the id of the session it opened, if any.
    pub fn evaluate_once(&self) -> Option<String> {
        self.inner.evaluations.fetch_add(1, Ordering::Relaxed);

        let metrics = match self.inner.source.latest() {
            Some(m) => m,
            None => {
                debug!("no metrics sample available, skipping evaluation");
                return None;
            }
        };

        if !should_tune(&metrics, self.inner.config.safety_margin_pct) {
            return None;
        }

        if self.inner.manager.active_count() >= self.inner.config.max_concurrent_sessions {
            self.inner.skipped_at_capacity.fetch_add(1, Ordering::Relaxed);
            debug!(
                max = self.inner.config.max_concurrent_sessions,
                "active session set is full, skipping evaluation"
            );
            return None;
        }

        let kind = select_policy_kind(&metrics);
        let policy = match self.inner.policies.by_kind(kind) {
            Some(p) => p,
            None => {
                warn!(kind = %kind, "no policy registered for selected kind");
                return None;
            }
        };

        match self.inner.manager.create_session(&policy, &metrics) {
            CreateOutcome::Created(handle) => {
                let session_id = handle
                    .lock()
                    .map(|session| session.id.clone())
                    .unwrap_or_default();
                self.inner.manager.spawn_worker(handle);
                Some(session_id)
            }
            CreateOutcome::NoActions => None,
            CreateOutcome::AtCapacity => {
                self.inner.skipped_at_capacity.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    // -------------------------------------------------------------------
    // Policy surface
    // -------------------------------------------------------------------

    /// Register a new policy. Fails on invalid fields or a duplicate id.
    pub fn register_policy(&self, policy: TuningPolicy) -> Result<()> {
        self.inner.policies.register(policy)
    }

    /// Replace an existing policy in full.
    pub fn update_policy(&self, policy: TuningPolicy) -> Result<()> {
        self.inner.policies.update(policy)
    }

    /// Look up a policy by id.
    pub fn policy(&self, id: &str) -> Option<TuningPolicy> {
        self.inner.policies.get(id)
    }

    /// Snapshot every registered policy, keyed by id.
    pub fn policies(&self) -> HashMap<String, TuningPolicy> {
        self.inner.policies.snapshot()
    }

    // -------------------------------------------------------------------
    // Session surface
    // -------------------------------------------------------------------

    /// Request cooperative cancellation of an active session. The worker
    /// honors the request at its next step boundary.
    pub fn cancel_session(&self, session_id: &str) -> Result<()> {
        self.inner.manager.cancel(session_id)
    }

    /// Snapshot every active session, keyed by id.
    pub fn sessions(&self) -> HashMap<String, TuningSession> {
        self.inner.manager.sessions()
    }

    /// Every executed action so far, oldest first.
    pub fn history(&self) -> Vec<TuningAction> {
        self.inner.manager.history()
    }

    /// Snapshot the tuner's counters and session tallies.
    pub fn status(&self) -> TunerStatus {
        TunerStatus {
            running: self.is_running(),
            evaluations: self.inner.evaluations.load(Ordering::Relaxed),
            skipped_at_capacity: self.inner.skipped_at_capacity.load(Ordering::Relaxed),
            active_sessions: self.inner.manager.active_count(),
            tallies: self.inner.manager.tallies(),
        }
    }
}

// ---------------------------------------------------------------------------
// PerformanceTunerBuilder
// ---------------------------------------------------------------------------

/// Builder for [`PerformanceTuner`].
///
/// # Example
/// ```rust,ignore
/// let tuner = PerformanceTuner::builder(source)
///     .config(config)
///     .effectors(registry)
///     .build();
/// ```
pub struct PerformanceTunerBuilder {
    config: TunerConfig,
    source: Arc<dyn MetricsSource>,
    effectors: Option<EffectorRegistry>,
    policies: Option<PolicyStore>,
}

impl PerformanceTunerBuilder {
    /// Create a builder reading from `source`.
    pub fn new(source: Arc<dyn MetricsSource>) -> Self {
        Self {
            config: TunerConfig::default(),
            source,
            effectors: None,
            policies: None,
        }
    }

    /// Override the default configuration.
    pub fn config(mut self, config: TunerConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the effector registry (default: simulated effectors for
    /// every category).
    pub fn effectors(mut self, registry: EffectorRegistry) -> Self {
        self.effectors = Some(registry);
        self
    }

    /// Override the policy store (default: the three built-ins).
    pub fn policies(mut self, store: PolicyStore) -> Self {
        self.policies = Some(store);
        self
    }

    /// Consume the builder and construct a [`PerformanceTuner`].
    pub fn build(self) -> PerformanceTuner {
        let effectors = self
            .effectors
            .unwrap_or_else(EffectorRegistry::with_simulated_defaults);
        let policies = self.policies.unwrap_or_else(PolicyStore::with_builtins);

        let executor = ActionExecutor::new(
            effectors,
            Arc::clone(&self.source),
            self.config.rollback_threshold_pct,
        );
        let manager = SessionManager::new(
            executor,
            Arc::clone(&self.source),
            self.config.stabilization(),
            self.config.max_concurrent_sessions,
        );

        PerformanceTuner {
            inner: Arc::new(TunerInner {
                config: self.config,
                source: self.source,
                policies,
                manager,
                run_state: Mutex::new(None),
                evaluations: AtomicU64::new(0),
                skipped_at_capacity: AtomicU64::new(0),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
