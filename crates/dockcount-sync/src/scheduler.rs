use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::config::IngestConfig;
use crate::pipeline::{AbortSignal, IngestPipeline};

/// Builds a scheduler that ingests the previous day on `config.sync_cron`.
/// Returns `None` when scheduling is disabled.
pub async fn maybe_build_scheduler(
    config: &IngestConfig,
    pipeline: Arc<IngestPipeline>,
    abort: AbortSignal,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let cron = config.sync_cron.as_str();
    let job = Job::new_async(cron, move |_uuid, _lock| {
        let pipeline = Arc::clone(&pipeline);
        let abort = abort.clone();
        Box::pin(async move {
            if abort.is_raised() {
                return;
            }
            match pipeline.run_previous_day(&abort).await {
                Ok(summary) => info!(
                    job_id = %summary.job.id,
                    status = %summary.job.status,
                    "scheduled ingest finished"
                ),
                Err(err) => error!(error = %format!("{err:#}"), "scheduled ingest failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    info!(cron, "daily ingest scheduled");
    Ok(Some(sched))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityHasher;
    use crate::pipeline::PipelineOptions;
    use crate::store::MemoryTripStore;
    use dockcount_adapters::{FixturePageSource, ParseRules, ReportPageParser};

    fn pipeline() -> Arc<IngestPipeline> {
        Arc::new(IngestPipeline::new(
            Arc::new(FixturePageSource::new("/nonexistent")),
            ReportPageParser::new(ParseRules::default()).unwrap(),
            Arc::new(MemoryTripStore::new()),
            IdentityHasher::default(),
            PipelineOptions::default(),
        ))
    }

    #[tokio::test]
    async fn disabled_scheduler_is_not_built() {
        let config = IngestConfig::default();
        let sched = maybe_build_scheduler(&config, pipeline(), AbortSignal::new())
            .await
            .unwrap();
        assert!(sched.is_none());
    }
}
