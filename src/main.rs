//! Observability demo service.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────┐
//!                 │                 LifecycleCoordinator                 │
//!                 │   Starting → Running → Stopping → Stopped            │
//!                 └───┬──────────────────┬──────────────────┬────────────┘
//!                     │ (1) open         │ (2) start        │ (3) listen
//!                     ▼                  ▼                  ▼
//!              ┌────────────┐    ┌───────────────┐   ┌───────────────┐
//!  Logstash ◀──│  LogSink   │    │  Telemetry    │   │ RequestServer │◀── Clients
//!   (TCP)      │ JSON lines │◀─┐ │   Emitter     │   │  axum routes  │
//!              └────────────┘  │ └───────┬───────┘   └──────┬────────┘
//!                              │         │ samples          │ samples, records
//!                              │         ▼                  │
//!                              │ ┌───────────────┐          │
//!                              │ │MetricsRegistry│◀─────────┤
//!                              │ │ GET /metrics  │          │
//!                              │ └───────────────┘          │
//!                              └────────────────────────────┘
//! ```
//!
//! SIGINT/SIGTERM → cancel emitter → drain server (deadline) → close sink → exit 0.
//! An unreachable log aggregator at startup exits non-zero before serving.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use observability_demo::config::{load_config, validation::validate_config, ServiceConfig};
use observability_demo::lifecycle::{wait_for_termination, LifecycleCoordinator};
use observability_demo::observability::{logging::init_logging, MetricsRegistry};

#[derive(Parser)]
#[command(name = "observability-demo")]
#[command(
    about = "Demo HTTP service with metrics, log shipping and graceful shutdown",
    long_about = None
)]
struct Cli {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(long)]
    bind: Option<String>,

    /// Override `log_sink.address`.
    #[arg(long)]
    log_sink: Option<String>,
}

fn resolve_config(cli: &Cli) -> Result<ServiceConfig, String> {
    let mut config = match &cli.config {
        Some(path) => load_config(path).map_err(|e| format!("{}: {e}", path.display()))?,
        None => ServiceConfig::default(),
    };

    if let Some(bind) = &cli.bind {
        config.listener.bind_address = bind.clone();
    }
    if let Some(address) = &cli.log_sink {
        config.log_sink.address = address.clone();
    }

    validate_config(&config).map_err(|errors| {
        errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    })?;
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match resolve_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&config.observability) {
        eprintln!("logging already initialized: {e}");
    }

    tracing::info!(
        bind_address = %config.listener.bind_address,
        log_sink = %config.log_sink.address,
        shutdown_deadline = ?config.shutdown.deadline,
        "Configuration loaded"
    );

    let metrics = match MetricsRegistry::new(&config.observability.namespace) {
        Ok(metrics) => metrics,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build metrics registry");
            return ExitCode::FAILURE;
        }
    };

    let running = match LifecycleCoordinator::new(config, metrics).start().await {
        Ok(running) => running,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            return ExitCode::FAILURE;
        }
    };

    let report = running.run_until(wait_for_termination()).await;
    tracing::info!(
        signal = %report.signal,
        forced = report.server.is_forced(),
        elapsed = ?report.elapsed,
        "Shutdown complete"
    );
    ExitCode::SUCCESS
}
