//! CLI entry point for manually driving the squad orchestration core.
//!
//! Deliberately thin: this binary wires the library crates together for
//! smoke-testing `squad run`/`squad status` by hand. It does not implement
//! ticket-system authentication, YAML workspace config loading, or LLM
//! worker dispatch -- those are integration concerns for a caller embedding
//! these crates, not this driver's job.

mod cli;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use squad_captain::Captain;
use squad_convoy::BattlePlanManager;
use squad_core::config::WorkspaceConfig;
use squad_store::WorkStore;

use crate::cli::{Cli, Commands};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).compact().init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let workspace_root = Path::new(&cli.workspace);
    let config = WorkspaceConfig::default();
    let store = WorkStore::open(workspace_root, &config)?;

    match cli.command {
        Commands::Run { issue, task } => cmd_run(store, workspace_root, issue, task).await,
        Commands::Status => cmd_status(store).await,
    }
}

async fn cmd_run(store: Arc<WorkStore>, workspace_root: &Path, issue: i64, task: String) -> Result<()> {
    info!(issue, "coordinating issue");
    let strategy_manager = Arc::new(BattlePlanManager::load(None, workspace_root)?);
    let captain = Captain::new(store, strategy_manager);
    let report = captain.run(issue, &task, vec![]).await?;
    println!("{report}");
    Ok(())
}

async fn cmd_status(store: Arc<WorkStore>) -> Result<()> {
    let strategy_manager = Arc::new(BattlePlanManager::load(None, Path::new("."))?);
    let captain = Captain::new(store, strategy_manager);
    let status = captain.get_status(None).await?;

    println!("total: {}", status.total);
    for (status_name, count) in &status.by_status {
        println!("  {status_name}: {count}");
    }
    println!("ready: {}", status.ready.len());
    println!("in_progress: {}", status.in_progress.len());
    println!("hooked: {}", status.hooked.len());
    Ok(())
}
