//! Batch ingestion: one report page per date, one trip at a time.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use dockcount_adapters::{PageError, PageSource, ReportPageParser};
use dockcount_core::{
    CatchSet, CompositeKey, IdentityHashes, JobCounters, JobStatus, NewTrip, ParsedTrip, ScrapeJob, TripCollision,
};
use serde::Serialize;
use tracing::{debug, debug_span, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::identity::IdentityHasher;
use crate::report::write_batch_reports;
use crate::resolver::{resolve, Resolution};
use crate::store::{InsertOutcome, StoreError, TripStore};

/// Lookup-then-insert rounds per trip before a contested key is given up.
const MAX_RESOLVE_ATTEMPTS: usize = 2;

/// Shared flag checked between dates.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub operator: String,
    pub stop_on_first_failure: bool,
    pub redate_window_days: i64,
    pub reports_dir: Option<PathBuf>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            operator: "dockcount".to_string(),
            stop_on_first_failure: false,
            redate_window_days: 1,
            reports_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum TripDisposition {
    Inserted { trip_id: Uuid },
    Duplicate { existing_trip_id: Uuid },
    Collision { existing_trip_id: Uuid, collision_id: Uuid },
    Failed { reason: String },
}

impl TripDisposition {
    pub fn label(&self) -> &'static str {
        match self {
            TripDisposition::Inserted { .. } => "inserted",
            TripDisposition::Duplicate { .. } => "duplicate",
            TripDisposition::Collision { .. } => "collision",
            TripDisposition::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TripReport {
    pub trip_date: NaiveDate,
    pub row_index: usize,
    pub boat_name: String,
    pub landing_name: String,
    pub trip_duration: String,
    pub anglers: u32,
    pub total_fish: u64,
    pub catches: CatchSet,
    #[serde(flatten)]
    pub disposition: TripDisposition,
    /// Nearby date already holding a trip with the same identity hash.
    pub suspected_redate_of: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DateOutcome {
    Ingested {
        trips_seen: u32,
        inserted: u32,
        duplicates: u32,
        collisions: u32,
        failed: u32,
    },
    FetchFailed { error: String },
    ParserFailed { error: String },
    DateMismatch { found: NaiveDate },
}

impl DateOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DateOutcome::Ingested { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DateResult {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub outcome: DateOutcome,
    pub trips: Vec<TripReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub job: ScrapeJob,
    pub dates: Vec<DateResult>,
    pub collisions: Vec<TripCollision>,
    pub suspected_redates: u32,
    pub reports_dir: Option<PathBuf>,
}

impl BatchSummary {
    pub fn counters(&self) -> &JobCounters {
        &self.job.counters
    }

    pub fn status(&self) -> JobStatus {
        self.job.status
    }

    pub fn trips(&self) -> impl Iterator<Item = &TripReport> {
        self.dates.iter().flat_map(|d| d.trips.iter())
    }
}

pub struct IngestPipeline {
    source: Arc<dyn PageSource>,
    parser: ReportPageParser,
    store: Arc<dyn TripStore>,
    hasher: IdentityHasher,
    options: PipelineOptions,
}

impl IngestPipeline {
    pub fn new(
        source: Arc<dyn PageSource>,
        parser: ReportPageParser,
        store: Arc<dyn TripStore>,
        hasher: IdentityHasher,
        options: PipelineOptions,
    ) -> Self {
        Self {
            source,
            parser,
            store,
            hasher,
            options,
        }
    }

    /// Ingests every date in `start..=end`, in order. Per-date failures are
    /// recorded on the job; only job bookkeeping failures end the batch early
    /// with an error.
    pub async fn run_batch(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        abort: &AbortSignal,
    ) -> Result<BatchSummary> {
        anyhow::ensure!(start <= end, "start date {start} is after end date {end}");

        let mut job = ScrapeJob::start(self.options.operator.clone(), start, end, Utc::now());
        self.store
            .create_job(&job)
            .await
            .context("creating scrape job")?;
        info!(
            job_id = %job.id,
            %start,
            %end,
            source = self.source.source_id(),
            hash_scheme = %self.hasher.scheme(),
            "batch started"
        );

        let mut dates = Vec::new();
        let mut collisions = Vec::new();
        let mut aborted = false;
        let mut stopped_early = false;

        for date in start.iter_days().take_while(|d| *d <= end) {
            if abort.is_raised() {
                warn!(job_id = %job.id, next_date = %date, "abort requested; stopping before next date");
                aborted = true;
                break;
            }

            let (result, mut found) = self
                .ingest_date(date, job.id)
                .instrument(info_span!("ingest_date", %date, job_id = %job.id))
                .await;
            collisions.append(&mut found);

            job.record(|c| tally(c, &result))?;
            self.store
                .update_job(&job)
                .await
                .context("updating scrape job counters")?;

            let failed = !result.outcome.is_success();
            dates.push(result);
            if failed && self.options.stop_on_first_failure {
                warn!(job_id = %job.id, %date, "stopping batch after first failed date");
                stopped_early = true;
                break;
            }
        }

        let status = if aborted {
            JobStatus::Aborted
        } else if stopped_early || job.counters.dates_failed > 0 {
            JobStatus::Failed
        } else {
            JobStatus::Success
        };
        job.finalize(status, Utc::now())?;
        self.store
            .update_job(&job)
            .await
            .context("finalizing scrape job")?;

        let suspected_redates = dates
            .iter()
            .flat_map(|d| d.trips.iter())
            .filter(|t| t.suspected_redate_of.is_some())
            .count() as u32;

        let mut summary = BatchSummary {
            job,
            dates,
            collisions,
            suspected_redates,
            reports_dir: None,
        };
        if let Some(root) = &self.options.reports_dir {
            summary.reports_dir = Some(write_batch_reports(root, &summary).await?);
        }

        let c = summary.job.counters;
        info!(
            job_id = %summary.job.id,
            status = %summary.job.status,
            dates_succeeded = c.dates_succeeded,
            dates_failed = c.dates_failed,
            inserted = c.trips_inserted,
            duplicates = c.duplicates,
            collisions = c.collisions,
            failed = c.trips_failed,
            suspected_redates,
            "batch finished"
        );
        Ok(summary)
    }

    async fn ingest_date(&self, date: NaiveDate, job_id: Uuid) -> (DateResult, Vec<TripCollision>) {
        let failed = |outcome: DateOutcome| -> (DateResult, Vec<TripCollision>) {
            (
                DateResult {
                    date,
                    outcome,
                    trips: Vec::new(),
                },
                Vec::new(),
            )
        };

        let page = match self.source.fetch_page(date).await {
            Ok(page) => page,
            Err(err) => {
                error!(error = %err, "fetch failed; skipping date");
                return failed(DateOutcome::FetchFailed {
                    error: err.to_string(),
                });
            }
        };

        let trips = match self.parser.parse_trips(&page.body_text(), date) {
            Ok(trips) => trips,
            Err(PageError::DateMismatch { found, .. }) => {
                error!(%found, url = %page.url, "page header date mismatch; discarding page");
                return failed(DateOutcome::DateMismatch { found });
            }
            Err(err @ PageError::Parser(_)) => {
                error!(error = %err, url = %page.url, "page structure not recognised; discarding page");
                return failed(DateOutcome::ParserFailed {
                    error: err.to_string(),
                });
            }
        };
        if trips.is_empty() {
            warn!(url = %page.url, "page carried no trip rows");
        }

        let mut reports = Vec::with_capacity(trips.len());
        let mut collisions = Vec::new();
        for trip in &trips {
            let (report, collision) = self
                .ingest_trip(trip, job_id)
                .instrument(debug_span!("trip", row = trip.row_index, boat = %trip.boat_name))
                .await;
            collisions.extend(collision);
            reports.push(report);
        }

        let count = |label: &str| reports.iter().filter(|r| r.disposition.label() == label).count() as u32;
        let outcome = DateOutcome::Ingested {
            trips_seen: reports.len() as u32,
            inserted: count("inserted"),
            duplicates: count("duplicate"),
            collisions: count("collision"),
            failed: count("failed"),
        };
        info!(?outcome, "date ingested");
        (
            DateResult {
                date,
                outcome,
                trips: reports,
            },
            collisions,
        )
    }

    async fn ingest_trip(&self, trip: &ParsedTrip, job_id: Uuid) -> (TripReport, Option<TripCollision>) {
        let written = match self.write_trip(trip, job_id).await {
            Ok(written) => written,
            Err(err) => {
                error!(error = %err, "trip not recorded");
                Written::plain(TripDisposition::Failed {
                    reason: err.to_string(),
                })
            }
        };
        let report = TripReport {
            trip_date: trip.trip_date,
            row_index: trip.row_index,
            boat_name: trip.boat_name.clone(),
            landing_name: trip.landing_name.clone(),
            trip_duration: trip.trip_duration.clone(),
            anglers: trip.anglers,
            total_fish: trip.catches.total_fish(),
            catches: trip.catches.clone(),
            disposition: written.disposition,
            suspected_redate_of: written.redate_of,
        };
        (report, written.collision)
    }

    async fn write_trip(&self, trip: &ParsedTrip, job_id: Uuid) -> Result<Written, StoreError> {
        let boat = self.store.resolve_boat(&trip.boat_name, &trip.landing_name).await?;
        let hashes = self.hasher.compute(&boat, trip);
        let key = CompositeKey::for_trip(&boat, trip);

        for attempt in 1..=MAX_RESOLVE_ATTEMPTS {
            let same_key = self.store.find_by_composite_key(&key).await?;
            let resolution = resolve(&trip.catches, &same_key);
            debug!(attempt, candidates = same_key.len(), resolution = resolution.label(), "trip resolved");
            match resolution {
                Resolution::Duplicate { existing_trip_id } => {
                    info!(%existing_trip_id, "duplicate trip; skipped");
                    return Ok(Written::plain(TripDisposition::Duplicate { existing_trip_id }));
                }
                Resolution::Collision { existing } => {
                    let collision = TripCollision::skipped(
                        key.clone(),
                        boat.name.clone(),
                        &existing,
                        trip.catches.clone(),
                        job_id,
                        Utc::now(),
                    );
                    self.store.append_collision(&collision).await?;
                    warn!(
                        existing_trip_id = %existing.id,
                        key = %key,
                        stored_total = existing.catches.total_fish(),
                        incoming_total = trip.catches.total_fish(),
                        "composite key collision; neither trip changed"
                    );
                    return Ok(Written {
                        disposition: TripDisposition::Collision {
                            existing_trip_id: existing.id,
                            collision_id: collision.id,
                        },
                        collision: Some(collision),
                        redate_of: None,
                    });
                }
                Resolution::New => {
                    let new_trip = NewTrip {
                        id: NewTrip::deterministic_id(&key),
                        boat: boat.clone(),
                        landing: trip.landing_name.clone(),
                        trip_date: trip.trip_date,
                        trip_duration: trip.trip_duration.clone(),
                        anglers: trip.anglers,
                        catches: trip.catches.clone(),
                        identity: self.hasher.for_storage(&hashes),
                        job_id,
                    };
                    match self.store.insert_trip(&new_trip).await? {
                        InsertOutcome::Inserted(trip_id) => {
                            info!(%trip_id, total_fish = new_trip.total_fish(), "trip inserted");
                            let redate_of = self.check_redate(&hashes, trip.trip_date).await;
                            return Ok(Written {
                                disposition: TripDisposition::Inserted { trip_id },
                                collision: None,
                                redate_of,
                            });
                        }
                        InsertOutcome::KeyConflict => {
                            warn!(attempt, key = %key, "key taken by a concurrent writer; re-resolving");
                        }
                    }
                }
            }
        }

        Err(StoreError::WriteRejected(format!(
            "composite key {key} still contested after {MAX_RESOLVE_ATTEMPTS} attempts"
        )))
    }

    /// Same content on a neighbouring date hints at a misdated report.
    async fn check_redate(&self, hashes: &IdentityHashes, date: NaiveDate) -> Option<NaiveDate> {
        if self.options.redate_window_days <= 0 {
            return None;
        }
        match self
            .store
            .find_by_identity(hashes, date, self.options.redate_window_days)
            .await
        {
            Ok(matches) => {
                let other = matches.first()?;
                warn!(
                    other_trip_id = %other.id,
                    other_date = %other.trip_date,
                    "identical trip content already stored on a nearby date; possible misdated report"
                );
                Some(other.trip_date)
            }
            Err(err) => {
                warn!(error = %err, "redate lookup failed");
                None
            }
        }
    }

    /// Ingests yesterday's page. Used by the scheduler.
    pub async fn run_previous_day(&self, abort: &AbortSignal) -> Result<BatchSummary> {
        let today = chrono::Local::now().date_naive();
        let yesterday = today
            .pred_opt()
            .context("no previous day before the minimum date")?;
        self.run_batch(yesterday, yesterday, abort).await
    }
}

struct Written {
    disposition: TripDisposition,
    collision: Option<TripCollision>,
    redate_of: Option<NaiveDate>,
}

impl Written {
    fn plain(disposition: TripDisposition) -> Self {
        Self {
            disposition,
            collision: None,
            redate_of: None,
        }
    }
}

fn tally(counters: &mut JobCounters, result: &DateResult) {
    match &result.outcome {
        DateOutcome::Ingested {
            inserted,
            duplicates,
            collisions,
            failed,
            ..
        } => {
            counters.dates_succeeded += 1;
            counters.trips_inserted += inserted;
            counters.duplicates += duplicates;
            counters.collisions += collisions;
            counters.trips_failed += failed;
        }
        _ => counters.dates_failed += 1,
    }
}
