mod config;
mod orchestrator;

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tracing::info;

use watchpost::pool::LibsqlManager;

use config::Config;
use orchestrator::Orchestrator;

#[derive(Parser)]
#[command(name = "watchpost-service", about = "Uptime check scheduling and execution service")]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    logger::init();

    let args = Args::parse();
    let config = Config::from_config(args.config.as_ref())
        .map_err(|e| anyhow!("failed to load configuration: {e:?}"))?;
    info!("{config}");

    let database = libsql::Builder::new_local(&config.database.path)
        .build()
        .await
        .context("failed to open database")?;

    let pool = deadpool::managed::Pool::builder(LibsqlManager::new(database))
        .config(deadpool::managed::PoolConfig::default())
        .build()
        .context("failed to build connection pool")?;

    Orchestrator::start(config, pool).await
}
