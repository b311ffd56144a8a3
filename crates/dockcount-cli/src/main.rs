use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use dockcount_adapters::{FixturePageSource, PageSource, ReportPageParser};
use dockcount_sync::{
    build_page_source, build_pipeline, maybe_build_scheduler, AbortSignal, BatchSummary,
    IngestConfig, MemoryTripStore, PgTripStore, TripStore,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "dockcount")]
#[command(about = "Dock-total trip ingestion and deduplication")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Ingest an inclusive date range (defaults to yesterday).
    Ingest {
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
        /// Read `<dir>/<YYYY-MM-DD>.html` instead of fetching.
        #[arg(long)]
        pages_dir: Option<PathBuf>,
        /// Resolve against an empty in-memory store; nothing is persisted.
        #[arg(long)]
        dry_run: bool,
    },
    /// Apply database migrations.
    Migrate,
    /// Parse a saved page offline and print its trips as JSON.
    ParseFile {
        path: PathBuf,
        #[arg(long)]
        date: NaiveDate,
    },
    /// Run the daily cron ingest until Ctrl-C.
    Schedule,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = IngestConfig::from_env()?;

    let command = cli.command.unwrap_or(Commands::Ingest {
        start: None,
        end: None,
        pages_dir: None,
        dry_run: false,
    });

    match command {
        Commands::Ingest {
            start,
            end,
            pages_dir,
            dry_run,
        } => {
            let yesterday = Local::now()
                .date_naive()
                .pred_opt()
                .context("computing yesterday")?;
            let start = start.unwrap_or(yesterday);
            let end = end.unwrap_or(start);

            let source: Arc<dyn PageSource> = match pages_dir {
                Some(dir) => Arc::new(FixturePageSource::new(dir)),
                None => Arc::new(build_page_source(&config)?),
            };
            let store = open_store(&config, dry_run).await?;
            let pipeline = build_pipeline(&config, source, store)?;

            let abort = AbortSignal::new();
            watch_ctrl_c(abort.clone());
            let summary = pipeline.run_batch(start, end, &abort).await?;
            print_summary(&summary);
        }
        Commands::Migrate => {
            let store = PgTripStore::connect(&config.database_url)
                .await
                .context("connecting to database")?;
            store.migrate().await?;
            println!("migrations applied");
        }
        Commands::ParseFile { path, date } => {
            let body = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let parser = ReportPageParser::new(config.load_rules()?)?;
            let trips = parser.parse_trips(&body, date)?;
            println!("{}", serde_json::to_string_pretty(&trips)?);
        }
        Commands::Schedule => {
            let store = open_store(&config, false).await?;
            let source: Arc<dyn PageSource> = Arc::new(build_page_source(&config)?);
            let pipeline = Arc::new(build_pipeline(&config, source, store)?);
            let abort = AbortSignal::new();

            let Some(mut sched) = maybe_build_scheduler(&config, pipeline, abort.clone()).await? else {
                anyhow::bail!("scheduler disabled; set DOCKCOUNT_SCHEDULER_ENABLED=true");
            };
            sched.start().await.context("starting scheduler")?;
            info!(cron = %config.sync_cron, "scheduler running; Ctrl-C to stop");

            tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
            abort.raise();
            sched.shutdown().await.context("stopping scheduler")?;
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

async fn open_store(config: &IngestConfig, dry_run: bool) -> Result<Arc<dyn TripStore>> {
    if dry_run {
        warn!("dry run: results are kept in memory only");
        return Ok(Arc::new(MemoryTripStore::new()));
    }
    let store = PgTripStore::connect(&config.database_url)
        .await
        .context("connecting to database")?;
    store.migrate().await?;
    Ok(Arc::new(store))
}

fn watch_ctrl_c(abort: AbortSignal) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received; finishing the current date");
            abort.raise();
        }
    });
}

fn print_summary(summary: &BatchSummary) {
    let c = summary.counters();
    println!(
        "ingest {}: job_id={} dates_ok={} dates_failed={} inserted={} duplicates={} collisions={} failed={} suspected_redates={}",
        summary.status(),
        summary.job.id,
        c.dates_succeeded,
        c.dates_failed,
        c.trips_inserted,
        c.duplicates,
        c.collisions,
        c.trips_failed,
        summary.suspected_redates,
    );
    if let Some(dir) = &summary.reports_dir {
        println!("reports: {}", dir.display());
    }
}
