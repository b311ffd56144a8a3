use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use dockcount_core::{
    BoatRef, CatchLine, CatchSet, CompositeKey, IdentityHashes, NewTrip, ScrapeJob, StoredTrip,
    TripCollision,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use super::{boat_id_for, hash_values, InsertOutcome, StoreError, TripStore};

const TRIP_COLUMNS: &str = "id, boat_id, landing, trip_date, trip_duration, anglers, total_fish, \
                            identity_hash, legacy_identity_hash, job_id";

#[derive(Debug, Clone)]
pub struct PgTripStore {
    pool: PgPool,
}

impl PgTripStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }

    async fn with_catches(&self, rows: Vec<PgRow>) -> Result<Vec<StoredTrip>, StoreError> {
        let mut trips = rows.iter().map(trip_from_row).collect::<Result<Vec<_>, _>>()?;
        if trips.is_empty() {
            return Ok(trips);
        }

        let ids: Vec<Uuid> = trips.iter().map(|t| t.id).collect();
        let catch_rows = sqlx::query(
            r#"
            SELECT trip_id, species, count, weight_note
              FROM catches
             WHERE trip_id = ANY($1)
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_trip: HashMap<Uuid, CatchSet> = HashMap::new();
        for row in catch_rows {
            let trip_id: Uuid = row.try_get("trip_id")?;
            let count: i32 = row.try_get("count")?;
            let count = u32::try_from(count)
                .map_err(|_| StoreError::Corrupt(format!("negative catch count on trip {trip_id}")))?;
            let mut line = CatchLine::new(row.try_get::<String, _>("species")?, count);
            if let Some(note) = row.try_get::<Option<String>, _>("weight_note")? {
                line = line.with_weight_note(note);
            }
            by_trip.entry(trip_id).or_default().add(line);
        }
        for trip in &mut trips {
            trip.catches = by_trip.remove(&trip.id).unwrap_or_default();
        }
        Ok(trips)
    }
}

fn trip_from_row(row: &PgRow) -> Result<StoredTrip, StoreError> {
    let id: Uuid = row.try_get("id")?;
    let anglers: i32 = row.try_get("anglers")?;
    let total_fish: i64 = row.try_get("total_fish")?;
    Ok(StoredTrip {
        id,
        boat_id: row.try_get("boat_id")?,
        landing: row.try_get("landing")?,
        trip_date: row.try_get("trip_date")?,
        trip_duration: row.try_get("trip_duration")?,
        anglers: u32::try_from(anglers)
            .map_err(|_| StoreError::Corrupt(format!("negative anglers on trip {id}")))?,
        total_fish: u64::try_from(total_fish)
            .map_err(|_| StoreError::Corrupt(format!("negative total_fish on trip {id}")))?,
        identity_hash: row.try_get("identity_hash")?,
        legacy_identity_hash: row.try_get("legacy_identity_hash")?,
        job_id: row.try_get("job_id")?,
        catches: CatchSet::new(),
    })
}

fn to_i32(value: u32, what: &str) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| StoreError::WriteRejected(format!("{what} {value} out of range")))
}

#[async_trait]
impl TripStore for PgTripStore {
    async fn resolve_boat(&self, name: &str, landing: &str) -> Result<BoatRef, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO boats (id, name, landing)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET name = boats.name
            RETURNING id, name
            "#,
        )
        .bind(boat_id_for(name))
        .bind(name)
        .bind(landing)
        .fetch_one(&self.pool)
        .await?;
        Ok(BoatRef {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
        })
    }

    async fn find_by_composite_key(&self, key: &CompositeKey) -> Result<Vec<StoredTrip>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {TRIP_COLUMNS}
              FROM trips
             WHERE boat_id = $1
               AND trip_date = $2
               AND trip_duration = $3
               AND anglers = $4
            "#
        ))
        .bind(key.boat_id)
        .bind(key.trip_date)
        .bind(&key.trip_duration)
        .bind(to_i32(key.anglers, "anglers")?)
        .fetch_all(&self.pool)
        .await?;
        self.with_catches(rows).await
    }

    async fn find_by_identity(
        &self,
        hashes: &IdentityHashes,
        around: NaiveDate,
        window_days: i64,
    ) -> Result<Vec<StoredTrip>, StoreError> {
        let window = Duration::days(window_days);
        let rows = sqlx::query(&format!(
            r#"
            SELECT {TRIP_COLUMNS}
              FROM trips
             WHERE (identity_hash = ANY($1) OR legacy_identity_hash = ANY($1))
               AND trip_date BETWEEN $2 AND $3
               AND trip_date <> $4
             ORDER BY trip_date
            "#
        ))
        .bind(hash_values(hashes))
        .bind(around - window)
        .bind(around + window)
        .bind(around)
        .fetch_all(&self.pool)
        .await?;
        self.with_catches(rows).await
    }

    async fn insert_trip(&self, trip: &NewTrip) -> Result<InsertOutcome, StoreError> {
        let total_fish = i64::try_from(trip.total_fish())
            .map_err(|_| StoreError::WriteRejected(format!("total_fish overflow on trip {}", trip.id)))?;

        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO trips (id, boat_id, landing, trip_date, trip_duration, anglers,
                               total_fish, identity_hash, legacy_identity_hash, job_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT DO NOTHING
            RETURNING id
            "#,
        )
        .bind(trip.id)
        .bind(trip.boat.id)
        .bind(&trip.landing)
        .bind(trip.trip_date)
        .bind(&trip.trip_duration)
        .bind(to_i32(trip.anglers, "anglers")?)
        .bind(total_fish)
        .bind(&trip.identity.current)
        .bind(trip.identity.legacy.as_deref())
        .bind(trip.job_id)
        .fetch_optional(&mut *tx)
        .await?;

        if inserted.is_none() {
            tx.rollback().await?;
            debug!(trip_id = %trip.id, key = %trip.composite_key(), "composite key already taken");
            return Ok(InsertOutcome::KeyConflict);
        }

        for line in trip.catches.iter() {
            sqlx::query(
                r#"
                INSERT INTO catches (id, trip_id, species, count, weight_note)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(trip.id)
            .bind(&line.species)
            .bind(to_i32(line.count, "catch count")?)
            .bind(line.weight_note.as_deref())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(InsertOutcome::Inserted(trip.id))
    }

    async fn append_collision(&self, collision: &TripCollision) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO trip_collisions (id, boat_id, boat_name, trip_date, trip_duration, anglers,
                                         existing_trip_id, stored_catches, incoming_catches,
                                         job_id, resolution, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(collision.id)
        .bind(collision.key.boat_id)
        .bind(&collision.boat_name)
        .bind(collision.key.trip_date)
        .bind(&collision.key.trip_duration)
        .bind(to_i32(collision.key.anglers, "anglers")?)
        .bind(collision.existing_trip_id)
        .bind(Json(&collision.stored_catches))
        .bind(Json(&collision.incoming_catches))
        .bind(collision.job_id)
        .bind(collision.resolution.as_str())
        .bind(collision.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_job(&self, job: &ScrapeJob) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO scrape_jobs (id, operator, range_start, range_end, status, started_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(job.id)
        .bind(&job.operator)
        .bind(job.range_start)
        .bind(job.range_end)
        .bind(job.status.as_str())
        .bind(job.started_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_job(&self, job: &ScrapeJob) -> Result<(), StoreError> {
        let c = &job.counters;
        let result = sqlx::query(
            r#"
            UPDATE scrape_jobs
               SET status = $2,
                   trips_inserted = $3,
                   trips_updated = $4,
                   trips_failed = $5,
                   duplicates = $6,
                   collisions = $7,
                   dates_succeeded = $8,
                   dates_failed = $9,
                   finished_at = $10
             WHERE id = $1
               AND status = 'RUNNING'
            "#,
        )
        .bind(job.id)
        .bind(job.status.as_str())
        .bind(to_i32(c.trips_inserted, "trips_inserted")?)
        .bind(to_i32(c.trips_updated, "trips_updated")?)
        .bind(to_i32(c.trips_failed, "trips_failed")?)
        .bind(to_i32(c.duplicates, "duplicates")?)
        .bind(to_i32(c.collisions, "collisions")?)
        .bind(to_i32(c.dates_succeeded, "dates_succeeded")?)
        .bind(to_i32(c.dates_failed, "dates_failed")?)
        .bind(job.finished_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM scrape_jobs WHERE id = $1")
                .bind(job.id)
                .fetch_optional(&self.pool)
                .await?;
            return Err(match exists {
                Some(_) => StoreError::JobFinalized(job.id),
                None => StoreError::UnknownJob(job.id),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Runs only when `DOCKCOUNT_TEST_DATABASE_URL` points at a scratch database.
    async fn test_store() -> Option<PgTripStore> {
        let url = std::env::var("DOCKCOUNT_TEST_DATABASE_URL").ok()?;
        let store = PgTripStore::connect(&url).await.expect("connect");
        store.migrate().await.expect("migrate");
        Some(store)
    }

    #[tokio::test]
    async fn boat_name_variants_resolve_to_the_first_stored_boat() {
        let Some(store) = test_store().await else {
            return;
        };
        let first = store
            .resolve_boat("Point Loma", "Point Loma Sportfishing")
            .await
            .unwrap();
        let shouted = store
            .resolve_boat("POINT-LOMA", "Point Loma Sportfishing")
            .await
            .unwrap();
        assert_eq!(first.id, boat_id_for("Point Loma"));
        assert_eq!(shouted, first);
    }
}
