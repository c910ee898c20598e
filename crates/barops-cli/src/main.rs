use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use barops_core::{BarId, DateWindow};
use barops_storage::{MemoryStore, PgStore, Store};
use barops_sync::{
    build_scheduler, default_window, export_snapshot, BarRegistry, DailyJob, SyncConfig,
    SyncService,
};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const DB_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Parser)]
#[command(name = "barops-cli")]
#[command(about = "BarOps sync pipeline command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve the HTTP API, with the cron scheduler when enabled.
    Serve,
    /// Ingest one source for one bar.
    Sync {
        #[arg(long)]
        bar_id: BarId,
        #[arg(long)]
        source: String,
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
    },
    /// Normalize pending raw records.
    Process {
        /// Process a single batch of this size instead of draining.
        #[arg(long)]
        max_records: Option<usize>,
    },
    Recompute {
        #[arg(long)]
        bar_id: Option<BarId>,
        #[arg(long)]
        period_key: Option<String>,
        /// Recompute the trailing periods instead of one period.
        #[arg(long)]
        all: bool,
        #[arg(long)]
        limit_periods: Option<usize>,
    },
    /// Run the daily job once, or resume a previous run.
    Daily {
        #[arg(long)]
        resume: Option<Uuid>,
    },
    /// Run only the cron scheduler until interrupted.
    Schedule,
    Migrate,
    /// Write summaries and recent runs to Parquet.
    Export {
        #[arg(long, default_value = "exports")]
        out_dir: PathBuf,
        #[arg(long, default_value_t = 52)]
        periods: usize,
        #[arg(long, default_value_t = 500)]
        runs: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("barops=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Daily { resume: None }) {
        Commands::Migrate => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL must be set to run migrations")?;
            let store = PgStore::connect(url, DB_MAX_CONNECTIONS).await?;
            store.migrate().await.context("applying migrations")?;
            println!("migrations applied");
        }
        Commands::Serve => {
            let service = build_service(config).await?;
            let port = service.config().web_port;
            let scheduler = build_scheduler(service.clone()).await?;
            if let Some(scheduler) = &scheduler {
                scheduler.start().await.context("starting scheduler")?;
                info!(cron = %service.config().daily_cron, "scheduler started");
            }
            barops_web::serve(service, port).await?;
        }
        Commands::Schedule => {
            let service = build_service(config).await?;
            let Some(mut scheduler) = build_scheduler(service.clone()).await? else {
                bail!("scheduler is disabled; set BAROPS_SCHEDULER_ENABLED=true");
            };
            scheduler.start().await.context("starting scheduler")?;
            info!(cron = %service.config().daily_cron, "scheduler started");
            tokio::signal::ctrl_c()
                .await
                .context("waiting for shutdown signal")?;
            scheduler.shutdown().await.context("stopping scheduler")?;
        }
        Commands::Sync {
            bar_id,
            source,
            start,
            end,
        } => {
            let service = build_service(config).await?;
            let fallback = default_window(Utc::now().date_naive());
            let window = DateWindow::new(start.unwrap_or(fallback.start), end.unwrap_or(fallback.end))?;
            let outcome = service.sync_source(bar_id, &source, window).await?;
            print_json(&outcome)?;
        }
        Commands::Process { max_records } => {
            let service = build_service(config).await?;
            match max_records {
                Some(max) => print_json(&service.processor().process_batch(max).await)?,
                None => print_json(&service.drain().await)?,
            }
        }
        Commands::Recompute {
            bar_id,
            period_key,
            all,
            limit_periods,
        } => {
            let service = build_service(config).await?;
            let aggregator = service.aggregator();
            if all {
                let report = aggregator
                    .recompute_all(bar_id, limit_periods, Utc::now().date_naive())
                    .await?;
                print_json(&report)?;
            } else {
                let (Some(bar_id), Some(period_key)) = (bar_id, period_key) else {
                    bail!("--bar-id and --period-key are required unless --all is given");
                };
                print_json(&aggregator.recompute(bar_id, &period_key).await?)?;
            }
        }
        Commands::Daily { resume } => {
            let service = build_service(config).await?;
            let job = DailyJob::new(service);
            let report = match resume {
                Some(run_id) => job.resume(run_id).await?,
                None => job.run(default_window(Utc::now().date_naive())).await?,
            };
            print_json(&report)?;
        }
        Commands::Export {
            out_dir,
            periods,
            runs,
        } => {
            let service = build_service(config).await?;
            let bars = service.aggregator().known_bars().await?;
            let manifest = export_snapshot(service.store().as_ref(), &bars, periods, runs, &out_dir).await?;
            println!("export complete: manifest={}", manifest.display());
        }
    }

    Ok(())
}

async fn build_service(config: SyncConfig) -> Result<Arc<SyncService>> {
    let registry = if config.registry_path.exists() {
        BarRegistry::load(&config.registry_path).await?
    } else {
        warn!(path = %config.registry_path.display(), "bar registry not found; no bars configured");
        BarRegistry::default()
    };

    let store: Arc<dyn Store> = match config.database_url.as_deref() {
        Some(url) => Arc::new(
            PgStore::connect(url, DB_MAX_CONNECTIONS)
                .await
                .context("connecting to postgres")?,
        ),
        None => {
            warn!("DATABASE_URL is not set; using the in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    Ok(Arc::new(SyncService::new(config, registry, store)?))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("serializing output")?);
    Ok(())
}
