//! `beanqueue`: run workers, submit tasks, and manage the schema from the
//! command line.

use anyhow::Context;
use clap::Parser;
use tokio::sync::OnceCell;
use tracing_subscriber::prelude::*;

mod create_tables;
mod process;
mod submit;

#[derive(Debug, clap::Parser)]
struct Args {
    #[command(flatten)]
    common: CommonOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, clap::Subcommand)]
enum Commands {
    /// Create (or migrate) the bq_tasks/bq_workers/bq_events schema.
    CreateTables(self::create_tables::CreateTables),
    /// Run a worker, dispatching tasks from one or more channels.
    Process(self::process::Process),
    /// Submit a single task for a registered handler.
    Submit(self::submit::Submit),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();

    match args.command {
        Commands::CreateTables(cmd) => cmd.run(&args.common).await,
        Commands::Process(cmd) => cmd.run(&args.common).await,
        Commands::Submit(cmd) => cmd.run(&args.common).await,
    }
}

#[derive(Debug, clap::Args)]
struct CommonOptions {
    #[arg(long, env = "BQ_DATABASE_URL")]
    database_url: String,

    #[arg(skip)]
    pool: OnceCell<sqlx::PgPool>,
}

impl CommonOptions {
    pub async fn pool(&self) -> anyhow::Result<sqlx::PgPool> {
        self.pool
            .get_or_try_init(|| async {
                sqlx::PgPool::connect(&self.database_url)
                    .await
                    .context("failed to connect to the database")
            })
            .await
            .map(|pool| pool.clone())
    }
}
