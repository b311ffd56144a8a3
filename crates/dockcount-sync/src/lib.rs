//! Identity hashing, duplicate resolution, persistence and batch orchestration
//! for dock-total ingestion.

use std::sync::Arc;

use anyhow::{Context, Result};
use dockcount_adapters::{PageSource, ReportPageParser, ReportPageSource};
use dockcount_storage::{PageArchive, ReportHttpClient};

pub mod config;
pub mod identity;
pub mod pipeline;
pub mod report;
pub mod resolver;
pub mod scheduler;
pub mod store;

pub use config::{HashScheme, IngestConfig};
pub use identity::IdentityHasher;
pub use pipeline::{
    AbortSignal, BatchSummary, DateOutcome, DateResult, IngestPipeline, PipelineOptions,
    TripDisposition, TripReport,
};
pub use resolver::{resolve, Resolution};
pub use scheduler::maybe_build_scheduler;
pub use store::{InsertOutcome, MemoryTripStore, PgTripStore, StoreError, TripStore};

pub const CRATE_NAME: &str = "dockcount-sync";

/// Live page source per `config`: paced HTTP client plus optional archive.
pub fn build_page_source(config: &IngestConfig) -> Result<ReportPageSource> {
    let http = ReportHttpClient::new(config.http_client_config()).context("building http client")?;
    let mut source = ReportPageSource::new("dock-totals", config.base_url.clone(), http);
    if let Some(dir) = &config.archive_dir {
        source = source.with_archive(PageArchive::new(dir.clone()));
    }
    Ok(source)
}

pub fn build_pipeline(
    config: &IngestConfig,
    source: Arc<dyn PageSource>,
    store: Arc<dyn TripStore>,
) -> Result<IngestPipeline> {
    let rules = config.load_rules()?;
    let parser = ReportPageParser::new(rules).context("compiling page selectors")?;
    Ok(IngestPipeline::new(
        source,
        parser,
        store,
        IdentityHasher::new(config.hash_scheme),
        PipelineOptions {
            operator: config.operator.clone(),
            stop_on_first_failure: config.stop_on_first_failure,
            redate_window_days: config.redate_window_days,
            reports_dir: Some(config.reports_dir.clone()),
        },
    ))
}
