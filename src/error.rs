//! Crate-level error type.
//!
//! Only caller-visible failures live here. An action whose effector fails
//! is marked [`ActionStatus::Failed`](crate::action::ActionStatus) and the
//! session carries on; a regression that triggers rollback is logged, not
//! surfaced. See the taxonomy notes on each variant.

use thiserror::Error;

/// All errors returned by the public tuning API.
#[derive(Debug, Error)]
pub enum TunerError {
    /// A policy failed validation at registration or update time. The
    /// store is left untouched when this is returned.
    #[error("policy validation failed: {0}")]
    Validation(String),

    /// Lookup or update named a policy id that is not registered.
    #[error("policy not found: {0}")]
    PolicyNotFound(String),

    /// Cancel or lookup named a session id that is not in the active set.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// `start` was called while the control loops are already running.
    #[error("tuner is already running")]
    AlreadyRunning,

    /// `stop` was called without a prior successful `start`.
    #[error("tuner is not running")]
    NotRunning,

    /// Configuration could not be loaded or failed validation.
    #[error("config error: {0}")]
    Config(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TunerError>;
