//! depscope: continuous metrics collection for open-source components.
//!
//! One binary, one subcommand per pipeline loop:
//!
//!   depscope scheduler              # enqueue stale (component, job) pairs, forever
//!   depscope scheduler --once       # a single refresh cycle
//!   depscope scheduler --target pkg:npm/chalk
//!   depscope worker                 # execute collector jobs from the queue
//!   depscope importer               # merge job results into the metadata store
//!   depscope run                    # all three loops in one process
//!   depscope import pkg:npm/chalk   # register components by coordinate
//!   depscope migrate                # apply schema migrations and exit

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use depscope_core::defaults::{QUEUE_WORK_COMPLETE, QUEUE_WORK_TO_DO};
use depscope_core::{ComponentRepository, JobCatalog};
use depscope_db::Database;
use depscope_jobs::{
    ImporterConfig, Orchestrator, OrchestratorConfig, ResultImporter, Scheduler, SchedulerConfig,
};

#[derive(Parser)]
#[command(
    name = "depscope",
    version,
    about = "Collects and stores metrics about open-source components"
)]
struct Cli {
    /// PostgreSQL connection string (also the queue backend)
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: String,

    /// Path to the job catalog JSON file
    #[arg(long, env = "JOB_CATALOG_FILE", default_value = "config/jobs.json")]
    catalog: String,

    /// Logical name of the work-to-do queue
    #[arg(long, env = "QUEUE_WORK_TO_DO", default_value = QUEUE_WORK_TO_DO)]
    work_queue: String,

    /// Logical name of the work-complete queue
    #[arg(long, env = "QUEUE_WORK_COMPLETE", default_value = QUEUE_WORK_COMPLETE)]
    complete_queue: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Populate the work queue with stale (component, job) pairs
    Scheduler {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
        /// Schedule a single component by coordinate and exit
        #[arg(long)]
        target: Option<String>,
    },
    /// Execute collector jobs from the work-to-do queue
    Worker,
    /// Merge job results from the work-complete queue into the store
    Importer,
    /// Run scheduler, worker, and importer together
    Run,
    /// Register components by package coordinate
    Import {
        #[arg(required = true)]
        purls: Vec<String>,
    },
    /// Apply database schema migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let db = Database::connect(&cli.database_url)
        .await
        .context("connecting to the database")?;
    db.migrate().await.context("applying migrations")?;

    match cli.command {
        Command::Migrate => {
            info!("Migrations applied");
        }
        Command::Import { purls } => {
            for purl in purls {
                let component = db.components.ensure(&purl).await?;
                info!(purl = %component.purl, name = %component.name, "Component registered");
            }
        }
        Command::Scheduler { once, ref target } => {
            let scheduler = build_scheduler(&cli, &db)?;
            if let Some(target) = target {
                let stats = scheduler.run_cycle_for(target).await?;
                info!(enqueued = stats.enqueued, "Targeted cycle complete");
            } else if once {
                let stats = scheduler.run_cycle().await?;
                info!(
                    examined = stats.examined,
                    enqueued = stats.enqueued,
                    failures = stats.failures,
                    "Cycle complete"
                );
            } else {
                let handle = scheduler.start();
                wait_for_shutdown().await;
                handle.shutdown().await;
            }
        }
        Command::Worker => {
            let worker = build_worker(&cli, &db)?;
            let handle = worker.start();
            wait_for_shutdown().await;
            handle.shutdown().await;
        }
        Command::Importer => {
            let importer = build_importer(&cli, &db)?;
            let handle = importer.start();
            wait_for_shutdown().await;
            handle.shutdown().await;
        }
        Command::Run => {
            let scheduler = build_scheduler(&cli, &db)?.start();
            let worker = build_worker(&cli, &db)?.start();
            let importer = build_importer(&cli, &db)?.start();
            wait_for_shutdown().await;
            scheduler.shutdown().await;
            worker.shutdown().await;
            importer.shutdown().await;
        }
    }

    Ok(())
}

fn load_catalog(path: &str) -> anyhow::Result<Arc<JobCatalog>> {
    let catalog = JobCatalog::load(path).with_context(|| format!("loading catalog [{path}]"))?;
    if catalog.is_empty() {
        warn!(path, "No jobs defined in the catalog");
    }
    Ok(Arc::new(catalog))
}

fn build_scheduler(cli: &Cli, db: &Database) -> anyhow::Result<Scheduler> {
    Ok(Scheduler::new(
        Arc::new(db.components.clone()),
        Arc::new(db.work_queue(&cli.work_queue)),
        Arc::new(db.dedup.clone()),
        load_catalog(&cli.catalog)?,
        SchedulerConfig::from_env(),
    ))
}

fn build_worker(cli: &Cli, db: &Database) -> anyhow::Result<Orchestrator> {
    Ok(Orchestrator::new(
        Arc::new(db.work_queue(&cli.work_queue)),
        Arc::new(db.work_queue(&cli.complete_queue)),
        load_catalog(&cli.catalog)?,
        OrchestratorConfig::from_env(),
    ))
}

fn build_importer(cli: &Cli, db: &Database) -> anyhow::Result<ResultImporter> {
    Ok(ResultImporter::new(
        Arc::new(db.work_queue(&cli.complete_queue)),
        Arc::new(db.components.clone()),
        load_catalog(&cli.catalog)?,
        ImporterConfig::from_env(),
    ))
}

async fn wait_for_shutdown() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl-c; shutting down");
    }
    info!("Shutdown signal received");
}
