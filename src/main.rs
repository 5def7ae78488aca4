// src/main.rs
//
// =============================================================================
// GRIDMASTER: ENTRY POINT
// =============================================================================
//
// The wiring center of the master.
//
// Boot order:
// 1. Settings from environment (CLI flags override host/port).
// 2. Logger.
// 3. Store -> Supervisors -> Scheduler (explicit graph, no globals).
// 4. Scheduler loop, then the HTTP server.
//
// Shutdown: ctrl-c drains the HTTP server gracefully, then stops the
// scheduler. Startup failures exit non-zero.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;

use gridmaster::api::{self, AppState};
use gridmaster::config::Settings;
use gridmaster::jobs::JobSupervisor;
use gridmaster::nodes::NodeSupervisor;
use gridmaster::scheduler::Scheduler;
use gridmaster::store::ClusterStore;

// ============================================================================
// 1. CLI DEFINITION
// ============================================================================

#[derive(Parser)]
#[command(
    name = "gridmaster",
    version,
    about = "Master orchestrator for small ML compute clusters"
)]
struct Cli {
    /// Bind address (overrides MASTER_HOST).
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides MASTER_PORT).
    #[arg(long)]
    port: Option<u16>,
}

// ============================================================================
// 2. ENTRY POINT
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::from_env()?;
    if let Some(host) = cli.host {
        settings.host = host;
    }
    if let Some(port) = cli.port {
        settings.port = port;
    }

    // Init Logger. DEV_MODE drops the default filter to debug.
    let default_filter = if settings.dev_mode {
        "debug".to_string()
    } else {
        settings.log_level.to_lowercase()
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&default_filter))
        .init();

    log::info!("🚀 Booting Gridmaster v{}", env!("CARGO_PKG_VERSION"));

    // A. BUILD THE COMPONENT GRAPH
    let store = Arc::new(ClusterStore::new(
        settings.max_concurrent_jobs,
        settings.assignment_grace(),
    ));
    let jobs = Arc::new(JobSupervisor::new(store.clone()));
    let nodes = Arc::new(NodeSupervisor::new(store.clone(), settings.node_timeout()));
    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        jobs.clone(),
        nodes.clone(),
        settings.scheduler_interval(),
    ));

    // B. START THE SCHEDULER LOOP
    scheduler.start().await;

    // C. SERVE
    let state = Arc::new(AppState {
        store,
        jobs,
        nodes,
        scheduler: scheduler.clone(),
        settings: settings.clone(),
    });
    let app = api::router(state);

    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    log::info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    // D. WIND DOWN
    scheduler.stop().await;
    log::info!("👋 Master shutdown complete.");
    Ok(())
}

async fn shutdown_signal() {
    signal::ctrl_c().await.ok();
    log::warn!("🛑 Interrupt received. Stopping...");
}
