use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::*;
use tracing::error;

use retune::cli::{resolve_config, Args};
use retune::config::TunerConfig;
use retune::http_source::HttpMetricsSource;
use retune::tuner::{PerformanceTuner, TunerStatus};

fn build_env_filter(debug: bool) -> tracing_subscriber::EnvFilter {
    let fallback = if debug { "retune=debug" } else { "retune=info" };
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback))
}

fn print_banner(args: &Args, config: &TunerConfig) {
    println!("{}", "RETUNE PERFORMANCE CONTROLLER".bright_cyan().bold());
    println!(
        "{}: {}",
        "Metrics".bright_yellow(),
        args.metrics_url.bright_white()
    );
    println!(
        "{}: every {} ms, margin {}%",
        "Evaluation".bright_yellow(),
        config.evaluation_interval_ms,
        config.safety_margin_pct
    );
    println!(
        "{}: up to {} concurrent, timeout {} ms, rollback below {}%",
        "Sessions".bright_yellow(),
        config.max_concurrent_sessions,
        config.session_timeout_ms,
        config.rollback_threshold_pct
    );
    println!("{}", "=".repeat(50).bright_blue());
}

fn print_status(status: &TunerStatus) {
    let tallies = &status.tallies;
    println!(
        "{} evaluations={} active={} completed={} cancelled={} timed_out={} actions={} failed={} rolled_back={}",
        "[retune]".bright_blue(),
        status.evaluations,
        status.active_sessions,
        tallies.sessions_completed,
        tallies.sessions_cancelled,
        tallies.sessions_timed_out,
        tallies.actions_executed,
        tallies.actions_failed,
        tallies.actions_rolled_back,
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(build_env_filter(args.debug))
        .init();

    let config = resolve_config(&args)?;

    let source = HttpMetricsSource::builder(args.metrics_url.clone()).build();
    let tuner = PerformanceTuner::new(config.clone(), Arc::new(source.clone()));

    if !args.quiet {
        print_banner(&args, &config);
    }

    source.start_poller();
    tuner.start()?;

    let mut status_ticker =
        tokio::time::interval(Duration::from_secs(args.status_interval_secs.max(1)));
    status_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = status_ticker.tick() => {
                if !args.quiet {
                    print_status(&tuner.status());
                }
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!(error = %e, "failed to listen for shutdown signal");
                }
                break;
            }
        }
    }

    tuner.stop()?;
    if !args.quiet {
        println!("{}", "Shutting down.".bright_green());
    }
    Ok(())
}
