use clap::Parser;

use crate::config::TunerConfig;
use crate::error::Result;

#[derive(Parser)]
#[command(name = "retune")]
#[command(version = "0.5.0")]
#[command(about = "Closed-loop performance tuning controller for the verification platform")]
pub struct Args {
    /// Base URL of the metrics gateway to poll
    #[arg(long, default_value = "http://127.0.0.1:9600")]
    pub metrics_url: String,

    /// Path to a TOML config file; absent fields fall back to defaults
    #[arg(long)]
    pub config: Option<String>,

    /// Override evaluation_interval_ms from the config
    #[arg(long)]
    pub evaluation_interval_ms: Option<u64>,

    /// Override safety_margin_pct from the config
    #[arg(long)]
    pub safety_margin_pct: Option<f64>,

    /// Override max_concurrent_sessions from the config
    #[arg(long)]
    pub max_sessions: Option<usize>,

    /// Seconds between status lines printed to the terminal
    #[arg(long, default_value = "10")]
    pub status_interval_secs: u64,

    /// Log at debug level (RUST_LOG still wins when set)
    #[arg(long)]
    pub debug: bool,

    /// Suppress the banner and periodic status lines
    #[arg(long, short)]
    pub quiet: bool,
}

/// Build the effective config: the file (or defaults) first, CLI overrides
/// on top, validation last so a bad override is caught the same way a bad
/// file is.
pub fn resolve_config(args: &Args) -> Result<TunerConfig> {
    let mut config = match &args.config {
        Some(path) => TunerConfig::load(path)?,
        None => TunerConfig::default(),
    };
    if let Some(ms) = args.evaluation_interval_ms {
        config.evaluation_interval_ms = ms;
    }
    if let Some(pct) = args.safety_margin_pct {
        config.safety_margin_pct = pct;
    }
    if let Some(max) = args.max_sessions {
        config.max_concurrent_sessions = max;
    }
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TunerError;

    #[test]
    fn test_args_parse_minimal() {
        let args = Args::parse_from(["retune"]);
        assert_eq!(args.metrics_url, "http://127.0.0.1:9600");
        assert!(args.config.is_none());
        assert!(args.evaluation_interval_ms.is_none());
        assert!(args.safety_margin_pct.is_none());
        assert!(args.max_sessions.is_none());
        assert_eq!(args.status_interval_secs, 10);
        assert!(!args.debug);
        assert!(!args.quiet);
    }

    #[test]
    fn test_args_parse_full() {
        let args = Args::parse_from([
            "retune",
            "--metrics-url",
            "http://metrics.internal:7000",
            "--config",
            "/etc/retune.toml",
            "--evaluation-interval-ms",
            "5000",
            "--safety-margin-pct",
            "15.0",
            "--max-sessions",
            "5",
            "--status-interval-secs",
            "30",
            "--debug",
            "--quiet",
        ]);
        assert_eq!(args.metrics_url, "http://metrics.internal:7000");
        assert_eq!(args.config.as_deref(), Some("/etc/retune.toml"));
        assert_eq!(args.evaluation_interval_ms, Some(5_000));
        assert_eq!(args.safety_margin_pct, Some(15.0));
        assert_eq!(args.max_sessions, Some(5));
        assert_eq!(args.status_interval_secs, 30);
        assert!(args.debug);
        assert!(args.quiet);
    }

    #[test]
    fn test_args_parse_short_quiet() {
        let args = Args::parse_from(["retune", "-q"]);
        assert!(args.quiet);
    }

    #[test]
    fn test_resolve_config_defaults_without_file() {
        let args = Args::parse_from(["retune"]);
        let config = resolve_config(&args).expect("resolve");
        assert_eq!(config, TunerConfig::default());
    }

    #[test]
    fn test_resolve_config_applies_overrides() {
        let args = Args::parse_from([
            "retune",
            "--evaluation-interval-ms",
            "2000",
            "--safety-margin-pct",
            "20.0",
            "--max-sessions",
            "8",
        ]);
        let config = resolve_config(&args).expect("resolve");
        assert_eq!(config.evaluation_interval_ms, 2_000);
        assert_eq!(config.safety_margin_pct, 20.0);
        assert_eq!(config.max_concurrent_sessions, 8);
        assert_eq!(config.stabilization_ms, TunerConfig::default().stabilization_ms);
    }

    #[test]
    fn test_resolve_config_file_then_overrides() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("retune.toml");
        std::fs::write(&path, "stabilization_ms = 1000\nsafety_margin_pct = 5.0\n")
            .expect("write config");

        let path_str = path.to_string_lossy().into_owned();
        let args = Args::parse_from([
            "retune",
            "--config",
            &path_str,
            "--safety-margin-pct",
            "25.0",
        ]);
        let config = resolve_config(&args).expect("resolve");
        assert_eq!(config.stabilization_ms, 1_000);
        assert_eq!(config.safety_margin_pct, 25.0);
    }

    #[test]
    fn test_resolve_config_rejects_bad_override() {
        let args = Args::parse_from(["retune", "--max-sessions", "0"]);
        let err = resolve_config(&args).expect_err("zero sessions must fail");
        assert!(matches!(err, TunerError::Config(_)));
    }

    #[test]
    fn test_resolve_config_missing_file_fails() {
        let args = Args::parse_from(["retune", "--config", "/no/such/file.toml"]);
        let err = resolve_config(&args).expect_err("missing file must fail");
        assert!(matches!(err, TunerError::Config(_)));
    }
}
