//! # retune
//!
//! Closed-loop performance tuning for the verification platform's
//! observability plane.
//!
//! The controller watches live performance metrics, compares them against
//! expected values, and opens bounded tuning sessions that adjust runtime
//! targets one reversible action at a time: act, wait, measure, keep or
//! roll back.
//!
//! ## Modules
//! - [`metrics`] — snapshots, deviation math, the `MetricsSource` seam
//! - [`policy`] — tuning policies and the validated policy store
//! - [`action`] — action kinds, categories, and lifecycle statuses
//! - [`generator`] — turns a policy plus a snapshot into concrete actions
//! - [`effector`] — the pluggable apply/revert capability, one per category
//! - [`executor`] — runs one action and rolls back regressions
//! - [`session`] — session state machine, workers, cancellation, reaping
//! - [`tuner`] — the controller: evaluation loop, severity bands, lifecycle
//! - [`config`] — TOML-backed runtime knobs
//! - [`error`] — the caller-visible error taxonomy
//! - [`cli`] — daemon argument parsing
//! - `http_source` (feature `http-source`) — polls the metrics gateway

pub mod action;
pub mod cli;
pub mod config;
pub mod effector;
pub mod error;
pub mod executor;
pub mod generator;
pub mod metrics;
pub mod policy;
pub mod session;
pub mod tuner;

#[cfg(feature = "http-source")]
pub mod http_source;
