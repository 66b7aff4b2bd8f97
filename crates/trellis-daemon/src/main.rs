//! Trellis Daemon - component orchestration reconciler
//!
//! Runs the schedule and projection daemons over a store, with the
//! simulated domain driver registered for development setups.

use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trellis_daemon::{DaemonConfig, DaemonError, ProjectionDaemon, ScheduleDaemon};
use trellis_domain::{DriverRegistry, SimulatedDriver};
use trellis_scheduler::Scheduler;
use trellis_store::{Datastore, MemoryStore, RetryPolicy};
use trellis_topology::{TreeBuilder, TreeConnector};

/// Trellis Daemon CLI
#[derive(Parser)]
#[command(name = "trellisd")]
#[command(about = "Trellis component orchestration daemon", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "TRELLIS_CONFIG")]
    config: Option<String>,

    /// Log level
    #[arg(long, env = "TRELLIS_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, env = "TRELLIS_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> trellis_daemon::Result<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| cli.log_level.clone().into());

    if cli.json {
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

    let config = DaemonConfig::load(cli.config.as_deref())
        .map_err(|e| DaemonError::Config(e.to_string()))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        schedule_interval = config.schedule.interval_secs,
        projection_interval = config.projection.interval_secs,
        "trellisd starting"
    );

    let ds = Datastore::new(Arc::new(MemoryStore::new()));
    let registry = Arc::new(DriverRegistry::new());
    registry.register("simulated", Arc::new(SimulatedDriver::new()));

    let scheduler = Arc::new(Scheduler::new(ds.clone()));
    let builder = Arc::new(TreeBuilder::new(
        ds.clone(),
        scheduler.clone(),
        RetryPolicy::default(),
    ));
    let connector = Arc::new(TreeConnector::new(ds.clone()));

    let schedule = Arc::new(ScheduleDaemon::new(
        config.schedule.clone(),
        ds.clone(),
        scheduler,
        builder,
        connector,
    ));
    let projection = Arc::new(ProjectionDaemon::new(
        config.projection.clone(),
        ds,
        registry,
    ));

    let schedule_handle = tokio::spawn(schedule.clone().start());
    let projection_handle = tokio::spawn(projection.clone().start());

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| DaemonError::Config(format!("failed to listen for shutdown: {e}")))?;
    tracing::info!("shutdown signal received");

    schedule.stop().await;
    projection.stop().await;
    let _ = schedule_handle.await;
    let _ = projection_handle.await;

    tracing::info!("trellisd stopped");
    Ok(())
}
