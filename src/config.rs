//! Runtime configuration for the tuning controller.
//!
//! Intervals are stored as integer milliseconds so partial TOML overrides
//! stay simple; `Duration` accessors convert at the call sites.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TunerError};

/// Knobs for the control loops and safety behavior.
///
/// Every field has a default, so a TOML file only needs to name the knobs
/// it overrides:
///
/// ```toml
/// evaluation_interval_ms = 10000
/// max_concurrent_sessions = 5
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    /// How often the evaluator samples metrics and considers a session.
    pub evaluation_interval_ms: u64,
    /// Wait between consecutive actions inside a session.
    pub stabilization_ms: u64,
    /// Active sessions older than this are timed out by the reaper.
    pub session_timeout_ms: u64,
    /// How often the reaper sweeps the active set.
    pub reaper_interval_ms: u64,
    /// Upper bound on simultaneously active sessions.
    pub max_concurrent_sessions: usize,
    /// Deviation magnitude, in percent, that triggers tuning.
    pub safety_margin_pct: f64,
    /// Negative percentage; action scores strictly below it roll back.
    pub rollback_threshold_pct: f64,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            evaluation_interval_ms: 30_000,
            stabilization_ms: 30_000,
            session_timeout_ms: 300_000,
            reaper_interval_ms: 60_000,
            max_concurrent_sessions: 3,
            safety_margin_pct: 10.0,
            rollback_threshold_pct: -5.0,
        }
    }
}

impl TunerConfig {
    pub fn evaluation_interval(&self) -> Duration {
        Duration::from_millis(self.evaluation_interval_ms)
    }

    pub fn stabilization(&self) -> Duration {
        Duration::from_millis(self.stabilization_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_millis(self.reaper_interval_ms)
    }

    /// Parse a TOML document, filling absent fields from the defaults.
    ///
    /// # Errors
    /// Returns [`TunerError::Config`] on a parse failure or a value the
    /// loops cannot run with.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: TunerConfig = toml::from_str(raw)
            .map_err(|e| TunerError::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| TunerError::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    /// Check the knobs for values the loops cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.evaluation_interval_ms == 0 {
            return Err(TunerError::Config(
                "evaluation_interval_ms must be greater than 0".into(),
            ));
        }
        if self.reaper_interval_ms == 0 {
            return Err(TunerError::Config(
                "reaper_interval_ms must be greater than 0".into(),
            ));
        }
        if self.session_timeout_ms == 0 {
            return Err(TunerError::Config(
                "session_timeout_ms must be greater than 0".into(),
            ));
        }
        if self.max_concurrent_sessions == 0 {
            return Err(TunerError::Config(
                "max_concurrent_sessions must be greater than 0".into(),
            ));
        }
        if !self.safety_margin_pct.is_finite() || self.safety_margin_pct <= 0.0 {
            return Err(TunerError::Config(
                "safety_margin_pct must be a positive number".into(),
            ));
        }
        if !self.rollback_threshold_pct.is_finite() || self.rollback_threshold_pct >= 0.0 {
            return Err(TunerError::Config(
                "rollback_threshold_pct must be a negative number".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
