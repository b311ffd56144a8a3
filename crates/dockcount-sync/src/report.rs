//! Per-batch report files: markdown and JSON summaries plus Parquet snapshots
//! with a SHA-256 manifest.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{RecordBatch, StringArray, UInt32Array, UInt64Array};
use arrow_schema::{DataType, Field, Schema};
use parquet::arrow::ArrowWriter;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs;

use crate::pipeline::{BatchSummary, DateOutcome, TripDisposition, TripReport};
use dockcount_core::TripCollision;

#[derive(Debug, Clone, Serialize)]
pub struct ReportManifest {
    pub schema_version: u32,
    pub job_id: String,
    pub files: Vec<ManifestFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

/// Writes `<root>/<job_id>/` and returns that directory.
pub async fn write_batch_reports(root: &Path, summary: &BatchSummary) -> Result<PathBuf> {
    let dir = root.join(summary.job.id.to_string());
    fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;

    let markdown_path = dir.join("batch_summary.md");
    fs::write(&markdown_path, render_markdown(summary))
        .await
        .context("writing batch_summary.md")?;

    let json_path = dir.join("batch_summary.json");
    let json = serde_json::to_vec_pretty(summary).context("serializing batch summary")?;
    fs::write(&json_path, json)
        .await
        .context("writing batch_summary.json")?;

    let trips: Vec<&TripReport> = summary.trips().collect();
    let trips_path = dir.join("trips.parquet");
    write_trips_parquet(&trips_path, &trips)?;
    let collisions_path = dir.join("collisions.parquet");
    write_collisions_parquet(&collisions_path, &summary.collisions)?;

    let manifest = ReportManifest {
        schema_version: 1,
        job_id: summary.job.id.to_string(),
        files: vec![
            manifest_entry("batch_summary", &dir, &json_path)?,
            manifest_entry("trips", &dir, &trips_path)?,
            manifest_entry("collisions", &dir, &collisions_path)?,
        ],
    };
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing report manifest")?;
    fs::write(dir.join("manifest.json"), bytes)
        .await
        .context("writing manifest.json")?;

    tracing::info!(dir = %dir.display(), "batch reports written");
    Ok(dir)
}

pub fn render_markdown(summary: &BatchSummary) -> String {
    let job = &summary.job;
    let c = &job.counters;
    let mut out = format!(
        "# Dock Count Batch Summary\n\n\
         - Job: `{}`\n- Operator: {}\n- Range: {} to {}\n- Status: **{}**\n\
         - Started: {}\n- Finished: {}\n\n\
         ## Totals\n\n\
         - Dates succeeded: {}\n- Dates failed: {}\n- Trips inserted: {}\n\
         - Duplicates skipped: {}\n- Collisions logged: {}\n- Trips failed: {}\n\
         - Suspected redates: {}\n\n\
         ## Dates\n\n| Date | Outcome | Detail |\n|---|---|---|\n",
        job.id,
        job.operator,
        job.range_start,
        job.range_end,
        job.status,
        job.started_at,
        job.finished_at
            .map(|t| t.to_string())
            .unwrap_or_else(|| "-".to_string()),
        c.dates_succeeded,
        c.dates_failed,
        c.trips_inserted,
        c.duplicates,
        c.collisions,
        c.trips_failed,
        summary.suspected_redates,
    );

    for date in &summary.dates {
        let (outcome, detail) = match &date.outcome {
            DateOutcome::Ingested {
                trips_seen,
                inserted,
                duplicates,
                collisions,
                failed,
            } => (
                "ingested",
                format!("{trips_seen} rows: {inserted} new, {duplicates} dup, {collisions} collision, {failed} failed"),
            ),
            DateOutcome::FetchFailed { error } => ("fetch failed", error.clone()),
            DateOutcome::ParserFailed { error } => ("parser failed", error.clone()),
            DateOutcome::DateMismatch { found } => ("date mismatch", format!("page claims {found}")),
        };
        out.push_str(&format!("| {} | {} | {} |\n", date.date, outcome, detail.replace('|', "/")));
    }

    if !summary.collisions.is_empty() {
        out.push_str("\n## Collisions\n\n");
        for collision in &summary.collisions {
            out.push_str(&format!(
                "- {} {} {} ({} anglers): stored {} fish vs incoming {} fish\n",
                collision.boat_name,
                collision.key.trip_date,
                collision.key.trip_duration,
                collision.key.anglers,
                collision.stored_catches.total_fish(),
                collision.incoming_catches.total_fish(),
            ));
        }
    }
    out
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn write_trips_parquet(path: &Path, trips: &[&TripReport]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("trip_date", DataType::Utf8, false),
        Field::new("row_index", DataType::UInt32, false),
        Field::new("boat_name", DataType::Utf8, false),
        Field::new("landing_name", DataType::Utf8, false),
        Field::new("trip_duration", DataType::Utf8, false),
        Field::new("anglers", DataType::UInt32, false),
        Field::new("total_fish", DataType::UInt64, false),
        Field::new("disposition", DataType::Utf8, false),
        Field::new("trip_id", DataType::Utf8, true),
        Field::new("suspected_redate_of", DataType::Utf8, true),
        Field::new("catches_json", DataType::Utf8, false),
    ]));

    let trip_ids = trips
        .iter()
        .map(|t| match &t.disposition {
            TripDisposition::Inserted { trip_id } => Some(trip_id.to_string()),
            TripDisposition::Duplicate { existing_trip_id }
            | TripDisposition::Collision {
                existing_trip_id, ..
            } => Some(existing_trip_id.to_string()),
            TripDisposition::Failed { .. } => None,
        })
        .collect::<Vec<_>>();
    let catches = trips
        .iter()
        .map(|t| serde_json::to_string(&t.catches).map(Some))
        .collect::<Result<Vec<_>, _>>()
        .context("serializing catch sets")?;

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from(
                trips.iter().map(|t| Some(t.trip_date.to_string())).collect::<Vec<_>>(),
            )),
            Arc::new(UInt32Array::from(
                trips.iter().map(|t| t.row_index as u32).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                trips.iter().map(|t| Some(t.boat_name.as_str())).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                trips.iter().map(|t| Some(t.landing_name.as_str())).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                trips.iter().map(|t| Some(t.trip_duration.as_str())).collect::<Vec<_>>(),
            )),
            Arc::new(UInt32Array::from(trips.iter().map(|t| t.anglers).collect::<Vec<_>>())),
            Arc::new(UInt64Array::from(trips.iter().map(|t| t.total_fish).collect::<Vec<_>>())),
            Arc::new(StringArray::from(
                trips.iter().map(|t| Some(t.disposition.label())).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(trip_ids)),
            Arc::new(StringArray::from(
                trips
                    .iter()
                    .map(|t| t.suspected_redate_of.map(|d| d.to_string()))
                    .collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(catches)),
        ],
    )
    .context("building trips record batch")?;
    write_parquet(path, batch)
}

fn write_collisions_parquet(path: &Path, collisions: &[TripCollision]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("collision_id", DataType::Utf8, false),
        Field::new("boat_name", DataType::Utf8, false),
        Field::new("trip_date", DataType::Utf8, false),
        Field::new("trip_duration", DataType::Utf8, false),
        Field::new("anglers", DataType::UInt32, false),
        Field::new("existing_trip_id", DataType::Utf8, false),
        Field::new("stored_catches", DataType::Utf8, false),
        Field::new("incoming_catches", DataType::Utf8, false),
        Field::new("stored_total", DataType::UInt64, false),
        Field::new("incoming_total", DataType::UInt64, false),
        Field::new("resolution", DataType::Utf8, false),
    ]));

    let json = |pick: fn(&TripCollision) -> &dockcount_core::CatchSet| {
        collisions
            .iter()
            .map(|c| serde_json::to_string(pick(c)).map(Some))
            .collect::<Result<Vec<_>, _>>()
    };
    let stored = json(|c| &c.stored_catches).context("serializing stored catches")?;
    let incoming = json(|c| &c.incoming_catches).context("serializing incoming catches")?;

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from(
                collisions.iter().map(|c| Some(c.id.to_string())).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                collisions.iter().map(|c| Some(c.boat_name.as_str())).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                collisions
                    .iter()
                    .map(|c| Some(c.key.trip_date.to_string()))
                    .collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                collisions
                    .iter()
                    .map(|c| Some(c.key.trip_duration.as_str()))
                    .collect::<Vec<_>>(),
            )),
            Arc::new(UInt32Array::from(
                collisions.iter().map(|c| c.key.anglers).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                collisions
                    .iter()
                    .map(|c| Some(c.existing_trip_id.to_string()))
                    .collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(stored)),
            Arc::new(StringArray::from(incoming)),
            Arc::new(UInt64Array::from(
                collisions
                    .iter()
                    .map(|c| c.stored_catches.total_fish())
                    .collect::<Vec<_>>(),
            )),
            Arc::new(UInt64Array::from(
                collisions
                    .iter()
                    .map(|c| c.incoming_catches.total_fish())
                    .collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                collisions
                    .iter()
                    .map(|c| Some(c.resolution.as_str()))
                    .collect::<Vec<_>>(),
            )),
        ],
    )
    .context("building collisions record batch")?;
    write_parquet(path, batch)
}

fn manifest_entry(name: &str, dir: &Path, path: &Path) -> Result<ManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let sha256 = hex::encode(Sha256::digest(&bytes));
    let rel = path.strip_prefix(dir).unwrap_or(path).display().to_string();
    Ok(ManifestFile {
        name: name.to_string(),
        path: rel,
        sha256,
        bytes: bytes.len() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use dockcount_core::{CatchLine, CatchSet, CompositeKey, JobStatus, ScrapeJob, StoredTrip};
    use parquet::file::reader::{FileReader, SerializedFileReader};
    use uuid::Uuid;

    use crate::pipeline::DateResult;

    fn set(pairs: &[(&str, u32)]) -> CatchSet {
        pairs.iter().map(|(s, c)| CatchLine::new(*s, *c)).collect()
    }

    fn summary() -> BatchSummary {
        let day = NaiveDate::from_ymd_opt(2025, 8, 7).unwrap();
        let at = Utc.with_ymd_and_hms(2025, 8, 8, 9, 30, 0).single().unwrap();
        let mut job = ScrapeJob::start("test", day, day.succ_opt().unwrap(), at);
        job.record(|c| {
            c.dates_succeeded = 1;
            c.dates_failed = 1;
            c.trips_inserted = 1;
            c.collisions = 1;
        })
        .unwrap();
        job.finalize(JobStatus::Failed, at).unwrap();

        let existing = StoredTrip {
            id: Uuid::from_u128(5),
            boat_id: Uuid::from_u128(1),
            landing: "Fisherman's Landing".into(),
            trip_date: day,
            trip_duration: "1/2 Day PM".into(),
            anglers: 58,
            total_fish: 72,
            identity_hash: "a".into(),
            legacy_identity_hash: None,
            job_id: None,
            catches: set(&[("Calico Bass", 51), ("Rockfish", 21)]),
        };
        let key = CompositeKey {
            boat_id: existing.boat_id,
            trip_date: day,
            trip_duration: existing.trip_duration.clone(),
            anglers: 58,
        };
        let collision = TripCollision::skipped(
            key,
            "Daily Double",
            &existing,
            set(&[("Calico Bass", 48), ("Rockfish", 28), ("Barracuda", 2)]),
            job.id,
            at,
        );

        BatchSummary {
            dates: vec![
                DateResult {
                    date: day,
                    outcome: DateOutcome::Ingested {
                        trips_seen: 2,
                        inserted: 1,
                        duplicates: 0,
                        collisions: 1,
                        failed: 0,
                    },
                    trips: vec![TripReport {
                        trip_date: day,
                        row_index: 2,
                        boat_name: "Daily Double".into(),
                        landing_name: "Fisherman's Landing".into(),
                        trip_duration: "1/2 Day AM".into(),
                        anglers: 58,
                        total_fish: 36,
                        catches: set(&[("Calico Bass", 30), ("Sculpin", 6)]),
                        disposition: TripDisposition::Inserted {
                            trip_id: Uuid::from_u128(6),
                        },
                        suspected_redate_of: None,
                    }],
                },
                DateResult {
                    date: day.succ_opt().unwrap(),
                    outcome: DateOutcome::DateMismatch { found: day },
                    trips: vec![],
                },
            ],
            collisions: vec![collision],
            suspected_redates: 0,
            reports_dir: None,
            job,
        }
    }

    #[test]
    fn markdown_lists_dates_and_collisions() {
        let md = render_markdown(&summary());
        assert!(md.contains("Status: **FAILED**"));
        assert!(md.contains("| 2025-08-08 | date mismatch | page claims 2025-08-07 |"));
        assert!(md.contains("Daily Double 2025-08-07 1/2 Day PM (58 anglers): stored 72 fish vs incoming 78 fish"));
    }

    #[tokio::test]
    async fn writes_summaries_snapshots_and_manifest() {
        let root = tempfile::tempdir().unwrap();
        let summary = summary();
        let dir = write_batch_reports(root.path(), &summary).await.unwrap();

        assert_eq!(dir, root.path().join(summary.job.id.to_string()));
        for name in ["batch_summary.md", "batch_summary.json", "trips.parquet", "collisions.parquet", "manifest.json"] {
            assert!(dir.join(name).exists(), "missing {name}");
        }

        let manifest: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.join("manifest.json")).unwrap()).unwrap();
        let files = manifest["files"].as_array().unwrap();
        assert_eq!(files.len(), 3);
        assert!(files.iter().all(|f| f["sha256"].as_str().unwrap().len() == 64));

        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.join("batch_summary.json")).unwrap()).unwrap();
        assert_eq!(json["job"]["status"], "FAILED");
        assert_eq!(json["dates"][1]["outcome"], "date_mismatch");

        let trips = SerializedFileReader::new(File::open(dir.join("trips.parquet")).unwrap()).unwrap();
        assert_eq!(trips.metadata().file_metadata().num_rows(), 1);
        let collisions =
            SerializedFileReader::new(File::open(dir.join("collisions.parquet")).unwrap()).unwrap();
        assert_eq!(collisions.metadata().file_metadata().num_rows(), 1);
    }
}
