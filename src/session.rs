//! # Stage: Tuning Sessions
//!
//! ## Responsibility
//! The lifecycle of a tuning session: one bounded run of actions under a
//! single policy invocation. The [`SessionManager`] creates sessions,
//! drives them on independent workers, finalizes their results, and owns
//! the active-session set, the append-only action history, and the
//! running tallies.
//!
//! ## Guarantees
//! - Actions within a session execute strictly sequentially, in
//!   generation order
//! - The active set never exceeds the concurrency bound
//! - Cancellation is cooperative: the flag is checked before and after
//!   every blocking step and never interrupts an in-flight action
//! - A session is finalized exactly once, by whichever of the worker or
//!   the reaper gets there first
//! - No lock is held across an action execution or a stabilization wait
//!
//! ## NOT Responsible For
//! - Deciding when to create sessions (evaluator)
//! - Applying individual actions (executor / effectors)

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::action::{ActionStatus, TuningAction};
use crate::error::{Result, TunerError};
use crate::executor::ActionExecutor;
use crate::generator::generate_actions;
use crate::metrics::{improvement_pct, now_ms, MetricsSource, PerformanceMetrics};
use crate::policy::TuningPolicy;

// ---------------------------------------------------------------------------
// SessionStatus
// ---------------------------------------------------------------------------

/// Where a session sits in its lifecycle. Everything but `Active` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionStatus {
    Active,
    Completed,
    Cancelled,
    TimedOut,
}

impl SessionStatus {
    pub fn name(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::TimedOut => "timeout",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Active)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ---------------------------------------------------------------------------
// CancelFlag
// ---------------------------------------------------------------------------

/// Cloneable cancellation handle shared by the session worker, the
/// reaper, and external cancel calls. Observed at action boundaries only;
/// an in-flight effector call is never interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    flag: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_signalled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// TuningSession
// ---------------------------------------------------------------------------

/// One bounded execution of a policy's action sequence. Mutated only by
/// its single worker, plus status/end fields by the reaper, always under
/// the session lock.
#[derive(Debug, Clone, Serialize)]
pub struct TuningSession {
    pub id: String,
    pub policy_id: String,
    pub status: SessionStatus,
    pub started_at_ms: u64,
    pub ended_at_ms: Option<u64>,
    /// Fixed length once generated; only statuses and per-action fields
    /// mutate during execution.
    pub actions: Vec<TuningAction>,
    /// Index of the action currently executing, if any.
    pub current_index: Option<usize>,
    pub initial_metrics: PerformanceMetrics,
    pub final_metrics: Option<PerformanceMetrics>,
    /// Aggregate improvement over (initial, final) metrics.
    pub total_improvement_pct: f64,
    /// Applied actions, rolled-back ones included.
    pub actions_succeeded: usize,
    pub actions_failed: usize,
    pub actions_rolled_back: usize,
    #[serde(skip)]
    pub started: Instant,
    #[serde(skip)]
    pub cancel: CancelFlag,
}

impl TuningSession {
    /// Wall-clock age since creation, from the monotonic clock.
    pub fn age(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Shared handle to one session record. The worker owns mutation; other
/// paths lock briefly to read or to finalize.
pub type SessionHandle = Arc<Mutex<TuningSession>>;

/// What `create_session` did.
#[derive(Debug)]
pub enum CreateOutcome {
    /// Session registered in the active set, ready to run.
    Created(SessionHandle),
    /// The policy's rules produced no actions for these metrics.
    NoActions,
    /// The active set is at the concurrency bound.
    AtCapacity,
}

// ---------------------------------------------------------------------------
// SessionTallies
// ---------------------------------------------------------------------------

/// Running totals since startup. How terminal sessions stay observable
/// after they leave the active set, alongside the history log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionTallies {
    pub sessions_started: u64,
    pub sessions_completed: u64,
    pub sessions_cancelled: u64,
    pub sessions_timed_out: u64,
    pub actions_executed: u64,
    pub actions_failed: u64,
    pub actions_rolled_back: u64,
}

// ---------------------------------------------------------------------------
// SessionManager
// ---------------------------------------------------------------------------

/// Owns session lifecycles. Clone freely; all clones share the active
/// set, history, and tallies.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    sessions: RwLock<HashMap<String, SessionHandle>>,
    history: Mutex<Vec<TuningAction>>,
    tallies: Mutex<SessionTallies>,
    executor: ActionExecutor,
    source: Arc<dyn MetricsSource>,
    stabilization: Duration,
    max_concurrent: usize,
}

impl SessionManager {
    pub fn new(
        executor: ActionExecutor,
        source: Arc<dyn MetricsSource>,
        stabilization: Duration,
        max_concurrent: usize,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                sessions: RwLock::new(HashMap::new()),
                history: Mutex::new(Vec::new()),
                tallies: Mutex::new(SessionTallies::default()),
                executor,
                source,
                stabilization,
                max_concurrent,
            }),
        }
    }

    // -------------------------------------------------------------------
    // Creation
    // -------------------------------------------------------------------

    /// Generate actions for `policy` against `metrics` and, if there are
    /// any and capacity allows, register a new active session.
    pub fn create_session(
        &self,
        policy: &TuningPolicy,
        metrics: &PerformanceMetrics,
    ) -> CreateOutcome {
        let session_id = Uuid::new_v4().to_string();
        let actions = generate_actions(policy, metrics, &session_id);
        if actions.is_empty() {
            debug!(policy_id = %policy.id, "policy produced no actions, skipping session");
            return CreateOutcome::NoActions;
        }

        let action_count = actions.len();
        let handle: SessionHandle = Arc::new(Mutex::new(TuningSession {
            id: session_id.clone(),
            policy_id: policy.id.clone(),
            status: SessionStatus::Active,
            started_at_ms: now_ms(),
            ended_at_ms: None,
            actions,
            current_index: None,
            initial_metrics: metrics.clone(),
            final_metrics: None,
            total_improvement_pct: 0.0,
            actions_succeeded: 0,
            actions_failed: 0,
            actions_rolled_back: 0,
            started: Instant::now(),
            cancel: CancelFlag::new(),
        }));

        {
            // A poisoned active set refuses new work.
            let mut map = match self.inner.sessions.write() {
                Ok(map) => map,
                Err(_) => return CreateOutcome::AtCapacity,
            };
            if map.len() >= self.inner.max_concurrent {
                return CreateOutcome::AtCapacity;
            }
            map.insert(session_id.clone(), Arc::clone(&handle));
        }

        if let Ok(mut tallies) = self.inner.tallies.lock() {
            tallies.sessions_started += 1;
        }
        info!(
            session_id = %session_id,
            policy_id = %policy.id,
            actions = action_count,
            "tuning session created"
        );
        CreateOutcome::Created(handle)
    }

    /// Spawn the worker that drives `handle` to a terminal status.
    pub fn spawn_worker(&self, handle: SessionHandle) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            manager.run(handle).await;
        })
    }

    // -------------------------------------------------------------------
    // Worker
    // -------------------------------------------------------------------

    /// Execute the session's actions strictly in order, one at a time,
    /// with a stabilization wait between consecutive actions. The session
    /// lock is released around every effector call and every sleep.
    pub async fn run(&self, handle: SessionHandle) {
        let (session_id, cancel, total) = {
            let guard = match handle.lock() {
                Ok(guard) => guard,
                Err(_) => return,
            };
            (guard.id.clone(), guard.cancel.clone(), guard.actions.len())
        };
        info!(session_id = %session_id, actions = total, "session worker started");

        let mut cancelled = false;
        for index in 0..total {
            if cancel.is_signalled() {
                cancelled = true;
                break;
            }

            let mut action = {
                let mut guard = match handle.lock() {
                    Ok(guard) => guard,
                    Err(_) => return,
                };
                // Someone else finalized this session; its record already
                // left the active set, so just stop.
                if guard.status != SessionStatus::Active {
                    return;
                }
                guard.current_index = Some(index);
                guard.actions[index].clone()
            };

            let executed = self.inner.executor.execute(&mut action).await;

            {
                let mut guard = match handle.lock() {
                    Ok(guard) => guard,
                    Err(_) => return,
                };
                match action.status {
                    ActionStatus::Completed => guard.actions_succeeded += 1,
                    ActionStatus::RolledBack => {
                        guard.actions_succeeded += 1;
                        guard.actions_rolled_back += 1;
                    }
                    ActionStatus::Failed => guard.actions_failed += 1,
                    _ => {}
                }
                guard.actions[index] = action.clone();
            }
            if let Ok(mut tallies) = self.inner.tallies.lock() {
                if executed {
                    tallies.actions_executed += 1;
                } else {
                    tallies.actions_failed += 1;
                }
                if action.status == ActionStatus::RolledBack {
                    tallies.actions_rolled_back += 1;
                }
            }
            self.append_history(action);

            if cancel.is_signalled() {
                cancelled = true;
                break;
            }
            if index + 1 < total {
                tokio::time::sleep(self.inner.stabilization).await;
                if cancel.is_signalled() {
                    cancelled = true;
                    break;
                }
            }
        }

        let outcome = if cancelled {
            SessionStatus::Cancelled
        } else {
            SessionStatus::Completed
        };
        self.finalize(&handle, outcome);
    }

    /// Record final metrics and the aggregate improvement, stamp the end,
    /// and drop the session from the active set. Skipped when the session
    /// is no longer active (the reaper got there first).
    fn finalize(&self, handle: &SessionHandle, status: SessionStatus) {
        let (session_id, improvement, succeeded, failed) = {
            let mut guard = match handle.lock() {
                Ok(guard) => guard,
                Err(_) => return,
            };
            if guard.status != SessionStatus::Active {
                return;
            }
            guard.status = status;
            guard.ended_at_ms = Some(now_ms());
            guard.current_index = None;
            guard.final_metrics = self.inner.source.latest();
            if let Some(final_metrics) = guard.final_metrics.clone() {
                guard.total_improvement_pct =
                    improvement_pct(&guard.initial_metrics, &final_metrics);
            }
            (
                guard.id.clone(),
                guard.total_improvement_pct,
                guard.actions_succeeded,
                guard.actions_failed,
            )
        };

        self.remove(&session_id);
        if let Ok(mut tallies) = self.inner.tallies.lock() {
            match status {
                SessionStatus::Completed => tallies.sessions_completed += 1,
                SessionStatus::Cancelled => tallies.sessions_cancelled += 1,
                _ => {}
            }
        }
        info!(
            session_id = %session_id,
            status = %status,
            total_improvement_pct = improvement,
            succeeded,
            failed,
            "session finalized"
        );
    }

    // -------------------------------------------------------------------
    // External control
    // -------------------------------------------------------------------

    /// Request cancellation of an active session. Takes effect at the
    /// worker's next action boundary, not preemptively.
    pub fn cancel(&self, session_id: &str) -> Result<()> {
        let handle = {
            let map = self
                .inner
                .sessions
                .read()
                .map_err(|_| TunerError::SessionNotFound(session_id.to_string()))?;
            map.get(session_id).cloned()
        }
        .ok_or_else(|| TunerError::SessionNotFound(session_id.to_string()))?;

        if let Ok(guard) = handle.lock() {
            guard.cancel.signal();
            info!(session_id = %session_id, "session cancellation requested");
        }
        Ok(())
    }

    /// Finalize every active session whose age exceeds `timeout`: mark it
    /// timed out, stamp the end, signal its cancel flag so the worker
    /// stops at the next boundary, and drop it from the active set.
    /// Returns the ids that were expired.
    pub fn expire_overdue(&self, timeout: Duration) -> Vec<String> {
        let handles: Vec<SessionHandle> = match self.inner.sessions.read() {
            Ok(map) => map.values().cloned().collect(),
            Err(_) => return Vec::new(),
        };

        let mut expired = Vec::new();
        for handle in handles {
            let timed_out = {
                let mut guard = match handle.lock() {
                    Ok(guard) => guard,
                    Err(_) => continue,
                };
                if guard.status != SessionStatus::Active || guard.age() <= timeout {
                    None
                } else {
                    guard.status = SessionStatus::TimedOut;
                    guard.ended_at_ms = Some(now_ms());
                    guard.cancel.signal();
                    Some(guard.id.clone())
                }
            };
            if let Some(session_id) = timed_out {
                self.remove(&session_id);
                if let Ok(mut tallies) = self.inner.tallies.lock() {
                    tallies.sessions_timed_out += 1;
                }
                warn!(
                    session_id = %session_id,
                    timeout_secs = timeout.as_secs_f64(),
                    "session exceeded its wall-clock budget, timed out"
                );
                expired.push(session_id);
            }
        }
        expired
    }

    // -------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------

    pub fn active_count(&self) -> usize {
        self.inner.sessions.read().map(|map| map.len()).unwrap_or(0)
    }

    /// Snapshot copies of every active session.
    pub fn sessions(&self) -> HashMap<String, TuningSession> {
        let handles: Vec<SessionHandle> = match self.inner.sessions.read() {
            Ok(map) => map.values().cloned().collect(),
            Err(_) => return HashMap::new(),
        };
        handles
            .iter()
            .filter_map(|handle| handle.lock().ok().map(|guard| guard.clone()))
            .map(|session| (session.id.clone(), session))
            .collect()
    }

    /// Snapshot copy of the append-only action history, in execution
    /// order.
    pub fn history(&self) -> Vec<TuningAction> {
        self.inner
            .history
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    pub fn tallies(&self) -> SessionTallies {
        self.inner
            .tallies
            .lock()
            .map(|tallies| *tallies)
            .unwrap_or_default()
    }

    // -------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------

    fn remove(&self, session_id: &str) {
        if let Ok(mut map) = self.inner.sessions.write() {
            map.remove(session_id);
        }
    }

    fn append_history(&self, action: TuningAction) {
        if let Ok(mut log) = self.inner.history.lock() {
            log.push(action);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionCategory;
    use crate::effector::{Effector, EffectorRegistry, RecordingEffector};
    use crate::metrics::{MetricPair, ResourceMetrics, SharedMetricsSource};
    use crate::policy::PolicyKind;
    use std::collections::VecDeque;
    use tokio::time::timeout;

    const GUARD: Duration = Duration::from_secs(5);

    /// Scripted source: each `latest()` call pops the next snapshot.
    struct SequenceSource {
        queue: Mutex<VecDeque<PerformanceMetrics>>,
    }

    impl SequenceSource {
        fn new(snapshots: Vec<PerformanceMetrics>) -> Self {
            Self {
                queue: Mutex::new(snapshots.into()),
            }
        }
    }

    impl MetricsSource for SequenceSource {
        fn latest(&self) -> Option<PerformanceMetrics> {
            self.queue.lock().ok()?.pop_front()
        }
    }

    fn metrics(rt: f64, tp: f64, cpu: f64) -> PerformanceMetrics {
        PerformanceMetrics {
            response_time_ms: MetricPair::new(rt, 500.0),
            throughput_rps: MetricPair::new(tp, 1000.0),
            success_rate_pct: MetricPair::new(99.0, 99.0),
            resources: ResourceMetrics {
                cpu_pct: MetricPair::new(cpu, 70.0),
                memory_pct: MetricPair::new(55.0, 70.0),
                disk_pct: MetricPair::default(),
                network_pct: MetricPair::default(),
            },
            captured_at_ms: 0,
        }
    }

    /// Deviant on response time, throughput, and CPU: three actions under
    /// the aggressive policy.
    fn deviant_metrics() -> PerformanceMetrics {
        metrics(700.0, 700.0, 95.0)
    }

    fn quiet_metrics() -> PerformanceMetrics {
        metrics(500.0, 1000.0, 50.0)
    }

    struct Rig {
        manager: SessionManager,
        latency: Arc<RecordingEffector>,
        throughput: Arc<RecordingEffector>,
        resource: Arc<RecordingEffector>,
    }

    fn rig_with_source(source: Arc<dyn MetricsSource>, max_concurrent: usize) -> Rig {
        let latency = Arc::new(RecordingEffector::new(ActionCategory::Latency));
        let throughput = Arc::new(RecordingEffector::new(ActionCategory::Throughput));
        let resource = Arc::new(RecordingEffector::new(ActionCategory::Resource));
        let mut registry = EffectorRegistry::new();
        registry.register(Arc::clone(&latency) as Arc<dyn Effector>);
        registry.register(Arc::clone(&throughput) as Arc<dyn Effector>);
        registry.register(Arc::clone(&resource) as Arc<dyn Effector>);

        let executor = ActionExecutor::new(registry, Arc::clone(&source), -5.0);
        let manager =
            SessionManager::new(executor, source, Duration::from_millis(5), max_concurrent);
        Rig {
            manager,
            latency,
            throughput,
            resource,
        }
    }

    fn rig(max_concurrent: usize) -> Rig {
        let source = SharedMetricsSource::new();
        source.set(quiet_metrics());
        rig_with_source(Arc::new(source), max_concurrent)
    }

    fn created(outcome: CreateOutcome) -> SessionHandle {
        match outcome {
            CreateOutcome::Created(handle) => handle,
            other => panic!("expected Created, got {other:?}"),
        }
    }

    // -------------------------------------------------------------------
    // Creation
    // -------------------------------------------------------------------

    #[test]
    fn test_create_registers_active_session() {
        let rig = rig(3);
        let policy = TuningPolicy::builtin(PolicyKind::Aggressive);
        let handle = created(rig.manager.create_session(&policy, &deviant_metrics()));

        assert_eq!(rig.manager.active_count(), 1);
        let guard = handle.lock().expect("session lock");
        assert_eq!(guard.status, SessionStatus::Active);
        assert_eq!(guard.actions.len(), 3);
        assert_eq!(guard.policy_id, "aggressive");
        let id = guard.id.clone();
        drop(guard);
        assert!(rig.manager.sessions().contains_key(&id));
        let tallies = rig.manager.tallies();
        assert_eq!(tallies.sessions_started, 1);
    }

    #[test]
    fn test_create_skips_empty_action_list() {
        let rig = rig(3);
        let policy = TuningPolicy::builtin(PolicyKind::Aggressive);
        let outcome = rig.manager.create_session(&policy, &quiet_metrics());
        assert!(matches!(outcome, CreateOutcome::NoActions));
        assert_eq!(rig.manager.active_count(), 0);
        assert_eq!(rig.manager.tallies().sessions_started, 0);
    }

    #[test]
    fn test_create_respects_capacity_bound() {
        let rig = rig(1);
        let policy = TuningPolicy::builtin(PolicyKind::Aggressive);
        let _first = created(rig.manager.create_session(&policy, &deviant_metrics()));
        let second = rig.manager.create_session(&policy, &deviant_metrics());
        assert!(matches!(second, CreateOutcome::AtCapacity));
        assert_eq!(rig.manager.active_count(), 1);
    }

    // -------------------------------------------------------------------
    // Worker
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_run_executes_all_actions_in_order() {
        let rig = rig(3);
        let policy = TuningPolicy::builtin(PolicyKind::Aggressive);
        let handle = created(rig.manager.create_session(&policy, &deviant_metrics()));

        timeout(GUARD, rig.manager.run(Arc::clone(&handle)))
            .await
            .expect("worker finishes");

        let guard = handle.lock().expect("session lock");
        assert_eq!(guard.status, SessionStatus::Completed);
        assert!(guard.ended_at_ms.is_some());
        assert!(guard.final_metrics.is_some());
        assert_eq!(guard.actions_succeeded, 3);
        assert_eq!(guard.actions_failed, 0);
        assert_eq!(guard.current_index, None);
        assert!(guard
            .actions
            .iter()
            .all(|a| a.status == ActionStatus::Completed));
        drop(guard);

        assert_eq!(rig.manager.active_count(), 0);
        assert_eq!(rig.latency.calls().len(), 1);
        assert_eq!(rig.throughput.calls().len(), 1);
        assert_eq!(rig.resource.calls().len(), 1);

        let parameters: Vec<String> = rig
            .manager
            .history()
            .into_iter()
            .map(|a| a.parameter)
            .collect();
        assert_eq!(
            parameters,
            vec![
                "response_time_target_ms".to_string(),
                "throughput_target_rps".to_string(),
                "cpu_usage_target_pct".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_run_continues_past_failed_action() {
        let source = SharedMetricsSource::new();
        source.set(quiet_metrics());
        let mut registry = EffectorRegistry::new();
        registry.register(Arc::new(RecordingEffector::failing_apply(
            ActionCategory::Latency,
        )));
        registry.register(Arc::new(RecordingEffector::new(ActionCategory::Throughput)));
        registry.register(Arc::new(RecordingEffector::new(ActionCategory::Resource)));
        let executor = ActionExecutor::new(registry, Arc::new(source.clone()), -5.0);
        let manager = SessionManager::new(executor, Arc::new(source), Duration::from_millis(5), 3);

        let policy = TuningPolicy::builtin(PolicyKind::Aggressive);
        let handle = created(manager.create_session(&policy, &deviant_metrics()));
        timeout(GUARD, manager.run(Arc::clone(&handle)))
            .await
            .expect("worker finishes");

        let guard = handle.lock().expect("session lock");
        assert_eq!(guard.status, SessionStatus::Completed);
        assert_eq!(guard.actions[0].status, ActionStatus::Failed);
        assert_eq!(guard.actions[1].status, ActionStatus::Completed);
        assert_eq!(guard.actions[2].status, ActionStatus::Completed);
        assert_eq!(guard.actions_failed, 1);
        assert_eq!(guard.actions_succeeded, 2);
        drop(guard);

        let tallies = manager.tallies();
        assert_eq!(tallies.actions_executed, 2);
        assert_eq!(tallies.actions_failed, 1);
        assert_eq!(tallies.sessions_completed, 1);
    }

    #[tokio::test]
    async fn test_rolled_back_action_counts_as_succeeded() {
        // Scripted reads: action before 400, action after 800 (a clear
        // regression), then the finalization snapshot.
        let source = Arc::new(SequenceSource::new(vec![
            metrics(400.0, 0.0, 50.0),
            metrics(800.0, 0.0, 50.0),
            metrics(800.0, 0.0, 50.0),
        ]));
        let rig = rig_with_source(source, 3);

        // Conservative thresholds fire only on response time here.
        let policy = TuningPolicy::builtin(PolicyKind::Conservative);
        let handle = created(rig.manager.create_session(&policy, &metrics(700.0, 1000.0, 50.0)));
        {
            let guard = handle.lock().expect("session lock");
            assert_eq!(guard.actions.len(), 1);
        }

        timeout(GUARD, rig.manager.run(Arc::clone(&handle)))
            .await
            .expect("worker finishes");

        let guard = handle.lock().expect("session lock");
        assert_eq!(guard.status, SessionStatus::Completed);
        assert_eq!(guard.actions[0].status, ActionStatus::RolledBack);
        assert_eq!(guard.actions_succeeded, 1);
        assert_eq!(guard.actions_rolled_back, 1);
        assert_eq!(guard.actions_failed, 0);
        assert!(guard.total_improvement_pct < 0.0);
        drop(guard);

        let tallies = rig.manager.tallies();
        assert_eq!(tallies.actions_executed, 1);
        assert_eq!(tallies.actions_rolled_back, 1);
    }

    // -------------------------------------------------------------------
    // Cancellation
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_cancel_takes_effect_at_action_boundary() {
        let source = SharedMetricsSource::new();
        source.set(quiet_metrics());
        let mut registry = EffectorRegistry::new();
        registry.register(Arc::new(RecordingEffector::new(ActionCategory::Latency)));
        registry.register(Arc::new(RecordingEffector::new(ActionCategory::Throughput)));
        registry.register(Arc::new(RecordingEffector::new(ActionCategory::Resource)));
        let executor = ActionExecutor::new(registry, Arc::new(source.clone()), -5.0);
        // A long stabilization wait keeps the worker between actions
        // while the cancel request arrives.
        let manager = SessionManager::new(
            executor,
            Arc::new(source),
            Duration::from_millis(300),
            3,
        );

        let policy = TuningPolicy::builtin(PolicyKind::Aggressive);
        let handle = created(manager.create_session(&policy, &deviant_metrics()));
        let session_id = handle.lock().expect("session lock").id.clone();

        let worker = manager.spawn_worker(Arc::clone(&handle));
        tokio::time::sleep(Duration::from_millis(50)).await;
        manager.cancel(&session_id).expect("cancel succeeds");
        timeout(GUARD, worker)
            .await
            .expect("worker finishes")
            .expect("worker task not aborted");

        let guard = handle.lock().expect("session lock");
        assert_eq!(guard.status, SessionStatus::Cancelled);
        let executed = guard.actions_succeeded + guard.actions_failed;
        assert!(executed < guard.actions.len());
        assert!(guard
            .actions
            .iter()
            .skip(executed)
            .all(|a| a.status == ActionStatus::Pending));
        drop(guard);

        assert_eq!(manager.active_count(), 0);
        assert_eq!(manager.tallies().sessions_cancelled, 1);
    }

    #[test]
    fn test_cancel_unknown_session_is_not_found() {
        let rig = rig(3);
        assert!(matches!(
            rig.manager.cancel("no-such-session"),
            Err(TunerError::SessionNotFound(_))
        ));
    }

    // -------------------------------------------------------------------
    // Reaper-side expiry
    // -------------------------------------------------------------------

    #[test]
    fn test_expire_overdue_times_out_old_sessions() {
        let rig = rig(3);
        let policy = TuningPolicy::builtin(PolicyKind::Aggressive);
        let handle = created(rig.manager.create_session(&policy, &deviant_metrics()));

        let expired = rig.manager.expire_overdue(Duration::ZERO);
        assert_eq!(expired.len(), 1);
        assert_eq!(rig.manager.active_count(), 0);

        let guard = handle.lock().expect("session lock");
        assert_eq!(guard.status, SessionStatus::TimedOut);
        assert!(guard.ended_at_ms.is_some());
        assert!(guard.cancel.is_signalled());
        drop(guard);
        assert_eq!(rig.manager.tallies().sessions_timed_out, 1);
    }

    #[test]
    fn test_expire_overdue_spares_young_sessions() {
        let rig = rig(3);
        let policy = TuningPolicy::builtin(PolicyKind::Aggressive);
        let _handle = created(rig.manager.create_session(&policy, &deviant_metrics()));

        let expired = rig.manager.expire_overdue(Duration::from_secs(60));
        assert!(expired.is_empty());
        assert_eq!(rig.manager.active_count(), 1);
    }

    #[tokio::test]
    async fn test_worker_stops_after_reaper_finalizes() {
        let rig = rig(3);
        let policy = TuningPolicy::builtin(PolicyKind::Aggressive);
        let handle = created(rig.manager.create_session(&policy, &deviant_metrics()));

        let expired = rig.manager.expire_overdue(Duration::ZERO);
        assert_eq!(expired.len(), 1);

        // The worker starts only now; it must observe the signal and exit
        // without executing anything or finalizing a second time.
        timeout(GUARD, rig.manager.run(Arc::clone(&handle)))
            .await
            .expect("worker finishes");

        let guard = handle.lock().expect("session lock");
        assert_eq!(guard.status, SessionStatus::TimedOut);
        assert!(guard.actions.iter().all(|a| a.status == ActionStatus::Pending));
        drop(guard);

        let tallies = rig.manager.tallies();
        assert_eq!(tallies.sessions_timed_out, 1);
        assert_eq!(tallies.sessions_completed, 0);
        assert_eq!(tallies.sessions_cancelled, 0);
        assert_eq!(tallies.actions_executed, 0);
    }

    // -------------------------------------------------------------------
    // Snapshots and serialization
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_sessions_snapshot_excludes_finished() {
        let rig = rig(3);
        let policy = TuningPolicy::builtin(PolicyKind::Aggressive);
        let handle = created(rig.manager.create_session(&policy, &deviant_metrics()));
        assert_eq!(rig.manager.sessions().len(), 1);

        timeout(GUARD, rig.manager.run(handle))
            .await
            .expect("worker finishes");
        assert!(rig.manager.sessions().is_empty());
    }

    #[test]
    fn test_session_serializes_without_runtime_fields() {
        let rig = rig(3);
        let policy = TuningPolicy::builtin(PolicyKind::Aggressive);
        let handle = created(rig.manager.create_session(&policy, &deviant_metrics()));
        let guard = handle.lock().expect("session lock");

        let value = serde_json::to_value(&*guard).expect("serializes");
        let object = value.as_object().expect("object");
        assert!(object.contains_key("id"));
        assert!(object.contains_key("actions"));
        assert!(!object.contains_key("started"));
        assert!(!object.contains_key("cancel"));
    }

    #[test]
    fn test_status_display_names() {
        assert_eq!(SessionStatus::Active.to_string(), "active");
        assert_eq!(SessionStatus::TimedOut.to_string(), "timeout");
        assert!(SessionStatus::Cancelled.is_terminal());
        assert!(!SessionStatus::Active.is_terminal());
    }
}
