//! Persistence port for trips, collisions and scrape jobs.

use async_trait::async_trait;
use chrono::NaiveDate;
use dockcount_adapters::normalize_name;
use dockcount_core::{BoatRef, CompositeKey, IdentityHashes, NewTrip, ScrapeJob, StoredTrip, TripCollision};
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::MemoryTripStore;
pub use postgres::PgTripStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("running migrations: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("trip write rejected: {0}")]
    WriteRejected(String),
    #[error("stored row is inconsistent: {0}")]
    Corrupt(String),
    #[error("scrape job {0} not found")]
    UnknownJob(Uuid),
    #[error("scrape job {0} is already finalized")]
    JobFinalized(Uuid),
}

/// Result of an attempted trip write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(Uuid),
    /// Another writer holds the composite key. Nothing was written.
    KeyConflict,
}

#[async_trait]
pub trait TripStore: Send + Sync {
    /// Returns the boat registered under `name`, creating it on first sight.
    async fn resolve_boat(&self, name: &str, landing: &str) -> Result<BoatRef, StoreError>;

    async fn find_by_composite_key(&self, key: &CompositeKey) -> Result<Vec<StoredTrip>, StoreError>;

    /// Trips within `window_days` of `around`, excluding `around` itself, whose
    /// current or legacy identity hash equals either of `hashes`.
    async fn find_by_identity(
        &self,
        hashes: &IdentityHashes,
        around: NaiveDate,
        window_days: i64,
    ) -> Result<Vec<StoredTrip>, StoreError>;

    /// Writes the trip row and all of its catch rows, or nothing.
    async fn insert_trip(&self, trip: &NewTrip) -> Result<InsertOutcome, StoreError>;

    async fn append_collision(&self, collision: &TripCollision) -> Result<(), StoreError>;

    async fn create_job(&self, job: &ScrapeJob) -> Result<(), StoreError>;

    /// Persists counters and status. Refused once the stored job is terminal.
    async fn update_job(&self, job: &ScrapeJob) -> Result<(), StoreError>;
}

/// Stable boat id for a first-seen boat name.
pub fn boat_id_for(name: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("boat:{}", normalize_name(name)).as_bytes())
}

/// Every hash value worth matching against either stored column.
pub(crate) fn hash_values(hashes: &IdentityHashes) -> Vec<String> {
    std::iter::once(hashes.current.clone())
        .chain(hashes.legacy.clone())
        .collect()
}
