use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use dockcount_adapters::normalize_name;
use dockcount_core::{BoatRef, CompositeKey, IdentityHashes, NewTrip, ScrapeJob, StoredTrip, TripCollision};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{boat_id_for, InsertOutcome, StoreError, TripStore};

#[derive(Debug, Default)]
struct MemoryState {
    boats: BTreeMap<String, BoatRef>,
    trips: Vec<StoredTrip>,
    collisions: Vec<TripCollision>,
    jobs: BTreeMap<Uuid, ScrapeJob>,
    failing_species: BTreeSet<String>,
}

/// In-process store with the same write semantics as the Postgres one.
#[derive(Debug, Default)]
pub struct MemoryTripStore {
    state: Mutex<MemoryState>,
}

impl MemoryTripStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes any write carrying `species` fail after the trip row would have
    /// been written, to exercise rollback.
    pub async fn fail_writes_for_species(&self, species: &str) {
        self.state
            .lock()
            .await
            .failing_species
            .insert(normalize_name(species));
    }

    /// Puts a trip in place directly, bypassing resolution.
    pub async fn seed_trip(&self, trip: StoredTrip) {
        self.state.lock().await.trips.push(trip);
    }

    pub async fn trips(&self) -> Vec<StoredTrip> {
        self.state.lock().await.trips.clone()
    }

    pub async fn collisions(&self) -> Vec<TripCollision> {
        self.state.lock().await.collisions.clone()
    }

    pub async fn job(&self, id: Uuid) -> Option<ScrapeJob> {
        self.state.lock().await.jobs.get(&id).cloned()
    }
}

fn key_of(trip: &StoredTrip) -> CompositeKey {
    CompositeKey {
        boat_id: trip.boat_id,
        trip_date: trip.trip_date,
        trip_duration: trip.trip_duration.clone(),
        anglers: trip.anglers,
    }
}

#[async_trait]
impl TripStore for MemoryTripStore {
    async fn resolve_boat(&self, name: &str, _landing: &str) -> Result<BoatRef, StoreError> {
        let mut state = self.state.lock().await;
        let boat = state
            .boats
            .entry(normalize_name(name))
            .or_insert_with(|| BoatRef {
                id: boat_id_for(name),
                name: name.to_string(),
            });
        Ok(boat.clone())
    }

    async fn find_by_composite_key(&self, key: &CompositeKey) -> Result<Vec<StoredTrip>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .trips
            .iter()
            .filter(|t| key_of(t) == *key)
            .cloned()
            .collect())
    }

    async fn find_by_identity(
        &self,
        hashes: &IdentityHashes,
        around: NaiveDate,
        window_days: i64,
    ) -> Result<Vec<StoredTrip>, StoreError> {
        let window = Duration::days(window_days);
        let state = self.state.lock().await;
        Ok(state
            .trips
            .iter()
            .filter(|t| t.trip_date != around)
            .filter(|t| t.trip_date >= around - window && t.trip_date <= around + window)
            .filter(|t| hashes.matches(&t.identity_hash, t.legacy_identity_hash.as_deref()))
            .cloned()
            .collect())
    }

    async fn insert_trip(&self, trip: &NewTrip) -> Result<InsertOutcome, StoreError> {
        let mut state = self.state.lock().await;
        let key = trip.composite_key();
        if state.trips.iter().any(|t| t.id == trip.id || key_of(t) == key) {
            return Ok(InsertOutcome::KeyConflict);
        }
        if let Some(bad) = trip
            .catches
            .iter()
            .find(|c| state.failing_species.contains(&normalize_name(&c.species)))
        {
            return Err(StoreError::WriteRejected(format!(
                "catch row for {} failed; trip {} rolled back",
                bad.species, trip.id
            )));
        }
        state.trips.push(StoredTrip {
            id: trip.id,
            boat_id: trip.boat.id,
            landing: trip.landing.clone(),
            trip_date: trip.trip_date,
            trip_duration: trip.trip_duration.clone(),
            anglers: trip.anglers,
            total_fish: trip.total_fish(),
            identity_hash: trip.identity.current.clone(),
            legacy_identity_hash: trip.identity.legacy.clone(),
            job_id: Some(trip.job_id),
            catches: trip.catches.clone(),
        });
        Ok(InsertOutcome::Inserted(trip.id))
    }

    async fn append_collision(&self, collision: &TripCollision) -> Result<(), StoreError> {
        self.state.lock().await.collisions.push(collision.clone());
        Ok(())
    }

    async fn create_job(&self, job: &ScrapeJob) -> Result<(), StoreError> {
        self.state.lock().await.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn update_job(&self, job: &ScrapeJob) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let stored = state.jobs.get_mut(&job.id).ok_or(StoreError::UnknownJob(job.id))?;
        if stored.is_finalized() {
            return Err(StoreError::JobFinalized(job.id));
        }
        *stored = job.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dockcount_core::{CatchLine, CatchSet, JobStatus};

    fn new_trip(boat: &BoatRef, duration: &str, catches: &[(&str, u32)]) -> NewTrip {
        let catches: CatchSet = catches.iter().map(|(s, c)| CatchLine::new(*s, *c)).collect();
        let identity = IdentityHashes {
            current: format!("{}-{duration}", boat.name),
            legacy: None,
        };
        let trip_date = NaiveDate::from_ymd_opt(2025, 8, 7).unwrap();
        let key = CompositeKey {
            boat_id: boat.id,
            trip_date,
            trip_duration: duration.into(),
            anglers: 20,
        };
        NewTrip {
            id: NewTrip::deterministic_id(&key),
            boat: boat.clone(),
            landing: "Fisherman's Landing".into(),
            trip_date,
            trip_duration: duration.into(),
            anglers: 20,
            catches,
            identity,
            job_id: Uuid::from_u128(99),
        }
    }

    #[tokio::test]
    async fn boats_resolve_to_one_id_per_name() {
        let store = MemoryTripStore::new();
        let a = store.resolve_boat("Daily Double", "Fisherman's Landing").await.unwrap();
        let b = store.resolve_boat("daily  double", "Fisherman's Landing").await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.name, "Daily Double");
    }

    #[tokio::test]
    async fn second_insert_on_same_key_conflicts() {
        let store = MemoryTripStore::new();
        let boat = store.resolve_boat("Excel", "H&M Landing").await.unwrap();
        let first = new_trip(&boat, "Full Day", &[("Yellowtail", 4)]);
        assert_eq!(store.insert_trip(&first).await.unwrap(), InsertOutcome::Inserted(first.id));

        let mut other = new_trip(&boat, "Full Day", &[("Yellowtail", 5)]);
        other.identity.current = "different".into();
        other.id = Uuid::from_u128(7);
        assert_eq!(store.insert_trip(&other).await.unwrap(), InsertOutcome::KeyConflict);
        assert_eq!(store.trips().await.len(), 1);
    }

    #[tokio::test]
    async fn failed_catch_write_leaves_no_trip_behind() {
        let store = MemoryTripStore::new();
        store.fail_writes_for_species("Opah").await;
        let boat = store.resolve_boat("Excel", "H&M Landing").await.unwrap();
        let trip = new_trip(&boat, "2 Day", &[("Yellowtail", 4), ("Opah", 1)]);
        assert!(matches!(
            store.insert_trip(&trip).await,
            Err(StoreError::WriteRejected(_))
        ));
        assert!(store.trips().await.is_empty());
    }

    #[tokio::test]
    async fn finalized_jobs_refuse_updates() {
        let store = MemoryTripStore::new();
        let day = NaiveDate::from_ymd_opt(2025, 8, 7).unwrap();
        let mut job = ScrapeJob::start("test", day, day, Utc::now());
        store.create_job(&job).await.unwrap();
        job.finalize(JobStatus::Success, Utc::now()).unwrap();
        store.update_job(&job).await.unwrap();

        assert!(matches!(
            store.update_job(&job).await,
            Err(StoreError::JobFinalized(id)) if id == job.id
        ));
    }
}
