//! Approval Daemon - hosts the approval engine
//!
//! The daemon provides:
//! - An in-memory approval engine wired from configuration
//! - Instances restored from, and saved back to, a JSON snapshot
//! - The expiry sweeper on its configured schedule
//! - A dashboard summary on demand (`--once`) and at shutdown

use anyhow::Context;
use approval_engine::{EngineConfig, ExpirySweeper};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod bootstrap;

/// Approval Daemon CLI
#[derive(Parser)]
#[command(name = "approvald")]
#[command(about = "Approval Daemon - document approval workflows", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "APPROVAL_CONFIG")]
    config: Option<String>,

    /// JSON file with the user directory
    #[arg(short, long, env = "APPROVAL_USERS")]
    users: Option<PathBuf>,

    /// JSON snapshot of workflow instances, read at start and rewritten on exit
    #[arg(short, long, env = "APPROVAL_INSTANCES", default_value = "approval-instances.json")]
    instances: PathBuf,

    /// Override the sweep interval in seconds
    #[arg(long, env = "APPROVAL_SWEEP_INTERVAL")]
    sweep_interval: Option<u64>,

    /// Run a single sweep, print the dashboard and exit
    #[arg(long)]
    once: bool,

    /// Log level
    #[arg(long, env = "APPROVAL_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "APPROVAL_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = EngineConfig::load(cli.config.as_deref()).context("invalid configuration")?;

    // Override with CLI args
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.json {
        config.logging.json = true;
    }
    if let Some(secs) = cli.sweep_interval {
        config.sweeper.interval_secs = secs;
    }

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let users = cli
        .users
        .as_deref()
        .map(bootstrap::load_users)
        .transpose()?;
    let instances = bootstrap::load_instances(&cli.instances)?;
    let engine = bootstrap::build_engine(&config, users, instances).await?;

    let (sweeper, sweep_rx) = ExpirySweeper::new(config.sweeper.clone(), engine.clone());

    if cli.once {
        let report = sweeper.sweep_once().await?;
        tracing::info!(
            scanned = report.scanned,
            expired = report.expired.len(),
            "Single sweep finished"
        );
        bootstrap::save_instances(&engine, &cli.instances).await?;
        println!("{}", serde_json::to_string_pretty(&engine.dashboard().await?)?);
        return Ok(());
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        sweep_interval_secs = config.sweeper.interval().as_secs(),
        operation_timeout_ms = config.store.operation_timeout_ms,
        "Approval daemon starting"
    );

    let handle = tokio::spawn(sweeper.clone().start(sweep_rx));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    sweeper.stop().await;
    sweeper.trigger_sweep().await;
    handle.await.context("sweeper task panicked")?;
    bootstrap::save_instances(&engine, &cli.instances).await?;

    let snapshot = engine.dashboard().await?;
    tracing::info!(
        total = snapshot.total,
        closed = snapshot.closed(),
        overdue = snapshot.overdue,
        "Approval daemon stopped"
    );
    Ok(())
}
