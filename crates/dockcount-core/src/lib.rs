//! Core trip/catch domain model and job provenance types for Dock Count.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "dockcount-core";

/// One species line inside a trip's catch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatchLine {
    pub species: String,
    pub count: u32,
    /// Approximate weight text such as "up to 150 pounds". Never affects `count`.
    pub weight_note: Option<String>,
}

impl CatchLine {
    pub fn new(species: impl Into<String>, count: u32) -> Self {
        Self {
            species: species.into(),
            count,
            weight_note: None,
        }
    }

    pub fn with_weight_note(mut self, note: impl Into<String>) -> Self {
        self.weight_note = Some(note.into());
        self
    }
}

/// Species-keyed catch set. Iteration order is species order, which is also the
/// canonical order used for identity hashing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CatchSet {
    lines: BTreeMap<String, CatchLine>,
}

impl CatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a line, summing counts when the species is already present.
    /// Zero counts are ignored.
    pub fn add(&mut self, line: CatchLine) {
        if line.count == 0 {
            return;
        }
        match self.lines.get_mut(&line.species) {
            Some(existing) => {
                existing.count = existing.count.saturating_add(line.count);
                if existing.weight_note.is_none() {
                    existing.weight_note = line.weight_note;
                }
            }
            None => {
                self.lines.insert(line.species.clone(), line);
            }
        }
    }

    pub fn contains_species(&self, species: &str) -> bool {
        self.lines.contains_key(species)
    }

    pub fn count_of(&self, species: &str) -> Option<u32> {
        self.lines.get(species).map(|l| l.count)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CatchLine> {
        self.lines.values()
    }

    pub fn total_fish(&self) -> u64 {
        self.lines.values().map(|l| u64::from(l.count)).sum()
    }

    /// Element-wise species+count equality. Weight notes are informational and
    /// do not participate.
    pub fn same_counts(&self, other: &CatchSet) -> bool {
        self.lines.len() == other.lines.len()
            && self
                .lines
                .iter()
                .all(|(species, line)| other.count_of(species) == Some(line.count))
    }

    /// `(species, count)` pairs in canonical order.
    pub fn pairs(&self) -> Vec<(&str, u32)> {
        self.lines
            .values()
            .map(|l| (l.species.as_str(), l.count))
            .collect()
    }
}

impl FromIterator<CatchLine> for CatchSet {
    fn from_iter<I: IntoIterator<Item = CatchLine>>(iter: I) -> Self {
        let mut set = CatchSet::new();
        for line in iter {
            set.add(line);
        }
        set
    }
}

/// Stable boat identity as assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoatRef {
    pub id: Uuid,
    pub name: String,
}

/// Parsed handoff contract from the page parsers into the sync pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedTrip {
    pub row_index: usize,
    pub boat_name: String,
    pub landing_name: String,
    pub trip_date: NaiveDate,
    pub trip_duration: String,
    pub anglers: u32,
    pub catches: CatchSet,
}

/// Fields used to find candidate existing trips before catches are compared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompositeKey {
    pub boat_id: Uuid,
    pub trip_date: NaiveDate,
    pub trip_duration: String,
    pub anglers: u32,
}

impl CompositeKey {
    pub fn for_trip(boat: &BoatRef, trip: &ParsedTrip) -> Self {
        Self {
            boat_id: boat.id,
            trip_date: trip.trip_date,
            trip_duration: trip.trip_duration.clone(),
            anglers: trip.anglers,
        }
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{} anglers",
            self.boat_id, self.trip_date, self.trip_duration, self.anglers
        )
    }
}

/// Both identity-hash variants for one trip. `legacy` is absent once the store
/// has moved to current-only hashing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityHashes {
    pub current: String,
    pub legacy: Option<String>,
}

impl IdentityHashes {
    pub fn matches(&self, current: &str, legacy: Option<&str>) -> bool {
        let ours = [Some(self.current.as_str()), self.legacy.as_deref()];
        let theirs = [Some(current), legacy];
        ours.iter()
            .flatten()
            .any(|h| theirs.iter().flatten().any(|t| t == h))
    }
}

/// A trip accepted for writing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTrip {
    pub id: Uuid,
    pub boat: BoatRef,
    pub landing: String,
    pub trip_date: NaiveDate,
    pub trip_duration: String,
    pub anglers: u32,
    pub catches: CatchSet,
    pub identity: IdentityHashes,
    pub job_id: Uuid,
}

impl NewTrip {
    /// Trip ids are derived from the raw composite key, so an id clash is
    /// always a key clash and a retried write addresses the same row.
    pub fn deterministic_id(key: &CompositeKey) -> Uuid {
        let name = format!(
            "trip:{}:{}:{}:{}",
            key.boat_id, key.trip_date, key.trip_duration, key.anglers
        );
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
    }

    pub fn total_fish(&self) -> u64 {
        self.catches.total_fish()
    }

    pub fn composite_key(&self) -> CompositeKey {
        CompositeKey {
            boat_id: self.boat.id,
            trip_date: self.trip_date,
            trip_duration: self.trip_duration.clone(),
            anglers: self.anglers,
        }
    }
}

/// A trip as read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTrip {
    pub id: Uuid,
    pub boat_id: Uuid,
    pub landing: String,
    pub trip_date: NaiveDate,
    pub trip_duration: String,
    pub anglers: u32,
    pub total_fish: u64,
    pub identity_hash: String,
    pub legacy_identity_hash: Option<String>,
    pub job_id: Option<Uuid>,
    pub catches: CatchSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Running,
    Success,
    Failed,
    Aborted,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Running => "RUNNING",
            JobStatus::Success => "SUCCESS",
            JobStatus::Failed => "FAILED",
            JobStatus::Aborted => "ABORTED",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown job status {0:?}")]
pub struct UnknownJobStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownJobStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(JobStatus::Running),
            "SUCCESS" => Ok(JobStatus::Success),
            "FAILED" => Ok(JobStatus::Failed),
            "ABORTED" => Ok(JobStatus::Aborted),
            other => Err(UnknownJobStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounters {
    pub trips_inserted: u32,
    /// Kept for the jobs table contract; ingestion never updates an existing trip.
    pub trips_updated: u32,
    pub trips_failed: u32,
    pub duplicates: u32,
    pub collisions: u32,
    pub dates_succeeded: u32,
    pub dates_failed: u32,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("scrape job {job_id} is already finalized as {status}")]
pub struct JobFinalized {
    pub job_id: Uuid,
    pub status: JobStatus,
}

/// Audit envelope for one ingestion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeJob {
    pub id: Uuid,
    pub operator: String,
    pub range_start: NaiveDate,
    pub range_end: NaiveDate,
    pub status: JobStatus,
    pub counters: JobCounters,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ScrapeJob {
    pub fn start(
        operator: impl Into<String>,
        range_start: NaiveDate,
        range_end: NaiveDate,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            operator: operator.into(),
            range_start,
            range_end,
            status: JobStatus::Running,
            counters: JobCounters::default(),
            started_at,
            finished_at: None,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.status.is_terminal()
    }

    /// Applies an incremental counter update. Refused once finalized.
    pub fn record(&mut self, update: impl FnOnce(&mut JobCounters)) -> Result<(), JobFinalized> {
        self.ensure_open()?;
        update(&mut self.counters);
        Ok(())
    }

    pub fn finalize(
        &mut self,
        status: JobStatus,
        finished_at: DateTime<Utc>,
    ) -> Result<(), JobFinalized> {
        self.ensure_open()?;
        self.status = status;
        self.finished_at = Some(finished_at);
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), JobFinalized> {
        if self.is_finalized() {
            return Err(JobFinalized {
                job_id: self.id,
                status: self.status,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionResolution {
    /// Neither record was touched; a human or reconciliation job decides.
    Skipped,
}

impl CollisionResolution {
    pub fn as_str(self) -> &'static str {
        match self {
            CollisionResolution::Skipped => "skipped",
        }
    }
}

/// Append-only audit record of a same-key, different-catch observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripCollision {
    pub id: Uuid,
    pub key: CompositeKey,
    pub boat_name: String,
    pub existing_trip_id: Uuid,
    pub stored_catches: CatchSet,
    pub incoming_catches: CatchSet,
    pub job_id: Uuid,
    pub resolution: CollisionResolution,
    pub recorded_at: DateTime<Utc>,
}

impl TripCollision {
    pub fn skipped(
        key: CompositeKey,
        boat_name: impl Into<String>,
        existing: &StoredTrip,
        incoming_catches: CatchSet,
        job_id: Uuid,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            boat_name: boat_name.into(),
            existing_trip_id: existing.id,
            stored_catches: existing.catches.clone(),
            incoming_catches,
            job_id,
            resolution: CollisionResolution::Skipped,
            recorded_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(pairs: &[(&str, u32)]) -> CatchSet {
        pairs
            .iter()
            .map(|(species, count)| CatchLine::new(*species, *count))
            .collect()
    }

    #[test]
    fn catch_set_comparison_ignores_order_and_weight_notes() {
        let a = set(&[("Rockfish", 21), ("Calico Bass", 51)]);
        let mut b = CatchSet::new();
        b.add(CatchLine::new("Calico Bass", 51).with_weight_note("up to 4 pounds"));
        b.add(CatchLine::new("Rockfish", 21));
        assert!(a.same_counts(&b));
        assert!(!a.same_counts(&set(&[("Calico Bass", 51)])));
        assert!(!a.same_counts(&set(&[("Calico Bass", 51), ("Rockfish", 22)])));
    }

    #[test]
    fn catch_set_sums_repeated_species_and_drops_zero_counts() {
        let s = set(&[("Yellowtail", 10), ("Yellowtail", 5), ("Bonito", 0)]);
        assert_eq!(s.len(), 1);
        assert_eq!(s.count_of("Yellowtail"), Some(15));
        assert_eq!(s.total_fish(), 15);
    }

    #[test]
    fn catch_set_serializes_as_species_map() {
        let s = set(&[("Rockfish", 28), ("Barracuda", 2)]);
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["Barracuda"]["count"], 2);
        assert_eq!(json["Rockfish"]["count"], 28);
        let back: CatchSet = serde_json::from_value(json).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn finalized_job_refuses_further_mutation() {
        let d = NaiveDate::from_ymd_opt(2025, 8, 7).unwrap();
        let mut job = ScrapeJob::start("test", d, d, Utc::now());
        job.record(|c| c.trips_inserted += 2).unwrap();
        job.finalize(JobStatus::Success, Utc::now()).unwrap();
        assert_eq!(job.counters.trips_inserted, 2);

        let err = job.record(|c| c.trips_inserted += 1).unwrap_err();
        assert_eq!(err.status, JobStatus::Success);
        assert!(job.finalize(JobStatus::Failed, Utc::now()).is_err());
        assert_eq!(job.counters.trips_inserted, 2);
        assert_eq!(job.status, JobStatus::Success);
    }

    #[test]
    fn job_status_round_trips_through_text() {
        for status in [
            JobStatus::Running,
            JobStatus::Success,
            JobStatus::Failed,
            JobStatus::Aborted,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("DONE".parse::<JobStatus>().is_err());
    }

    #[test]
    fn trip_ids_follow_the_raw_composite_key() {
        let key = CompositeKey {
            boat_id: Uuid::from_u128(1),
            trip_date: NaiveDate::from_ymd_opt(2025, 8, 7).unwrap(),
            trip_duration: "Full Day".into(),
            anglers: 25,
        };
        let shouted = CompositeKey {
            trip_duration: "FULL DAY".into(),
            ..key.clone()
        };
        assert_eq!(NewTrip::deterministic_id(&key), NewTrip::deterministic_id(&key.clone()));
        assert_ne!(NewTrip::deterministic_id(&key), NewTrip::deterministic_id(&shouted));
    }

    #[test]
    fn identity_hashes_match_across_either_variant() {
        let hashes = IdentityHashes {
            current: "cur".into(),
            legacy: Some("leg".into()),
        };
        assert!(hashes.matches("other", Some("leg")));
        assert!(hashes.matches("cur", None));
        assert!(!hashes.matches("other", None));
    }
}
