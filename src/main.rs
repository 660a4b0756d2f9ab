//! # Domain operator entry point
//!
//! ## Startup
//!
//! 1. **Tracing** - `RUST_LOG` wins over `--log-level`
//! 2. **Configuration** - TOML from `--config`, or defaults
//! 3. **Runtime** - multi-threaded tokio runtime sized by `engine.worker_threads`
//! 4. **Engine** - one fiber engine bound to that runtime
//!
//! ## Shutdown
//!
//! The engine is drained with `engine.drain_grace_ms` before the process
//! exits, whether the command finished or Ctrl+C arrived first.

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use domain_operator::cli::{Cli, Commands};
use domain_operator::operator_core::OperatorConfig;
use domain_operator::operator_work::Engine;
use domain_operator::simulate::{self, SimulationOptions};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = load_config(&cli).context("Configuration could not be loaded")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.engine.worker_threads)
        .enable_all()
        .thread_name("fiber-worker")
        .build()
        .context("Failed to build the tokio runtime")?;

    runtime.block_on(run(cli.command, config))
}

async fn run(command: Commands, config: OperatorConfig) -> Result<()> {
    let start_time = Instant::now();
    let engine = Engine::new(config.engine.clone(), tokio::runtime::Handle::current());

    let result = tokio::select! {
        result = execute(command, &engine, &config) => result,
        () = wait_for_shutdown() => Ok(()),
    };

    let report = engine.shutdown().await;
    if report.remaining > 0 {
        warn!(
            remaining = report.remaining,
            force_cancelled = report.force_cancelled,
            "Fibers still alive after drain"
        );
    }
    info!(
        elapsed_ms = start_time.elapsed().as_millis(),
        "Domain operator stopped"
    );

    result
}

async fn execute(command: Commands, engine: &Engine, config: &OperatorConfig) -> Result<()> {
    match command {
        Commands::Config => {
            let rendered = serde_json::to_string_pretty(config)
                .context("Failed to render configuration as JSON")?;
            println!("{rendered}");
        }
        Commands::Simulate {
            conflicts,
            items,
            max_retries,
        } => {
            let options = SimulationOptions {
                conflicts,
                items,
                max_retries,
            };
            let report = simulate::run(engine, &config.calls, options).await?;
            let rendered = serde_json::to_string_pretty(&report)
                .context("Failed to render simulation report as JSON")?;
            println!("{rendered}");
        }
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<OperatorConfig> {
    match &cli.config {
        Some(path) => OperatorConfig::load(path)
            .with_context(|| format!("Failed to load {}", path.display())),
        None => {
            info!("No configuration file given, using defaults");
            Ok(OperatorConfig::default())
        }
    }
}

/// Initialize tracing; `RUST_LOG` takes precedence over `level`.
///
/// Logs go to stderr so command output on stdout stays machine-readable.
fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn wait_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
        Err(err) => {
            error!("Failed to listen for shutdown signal: {}", err);
            std::future::pending::<()>().await;
        }
    }
}
