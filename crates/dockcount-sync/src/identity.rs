//! Date-independent content identity for trips.
//!
//! Two variants exist. The legacy one is keyed by the store's boat id and the
//! current one by boat name plus landing slug, so it survives boat-table
//! rebuilds. Neither includes the trip date: the same trip reported under a
//! wrong date hashes identically.

use dockcount_adapters::normalize_name;
use dockcount_core::{BoatRef, CatchSet, IdentityHashes, ParsedTrip};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::HashScheme;

#[derive(Serialize)]
struct LegacyIdentity<'a> {
    boat_id: Uuid,
    landing: String,
    trip_duration: String,
    anglers: u32,
    catches: Vec<(&'a str, u32)>,
}

#[derive(Serialize)]
struct CurrentIdentity<'a> {
    boat: String,
    landing_slug: String,
    trip_duration: String,
    anglers: u32,
    catches: Vec<(&'a str, u32)>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityHasher {
    scheme: HashScheme,
}

impl IdentityHasher {
    pub fn new(scheme: HashScheme) -> Self {
        Self { scheme }
    }

    pub fn scheme(&self) -> HashScheme {
        self.scheme
    }

    /// Both variants, always. Used for lookups.
    pub fn compute(&self, boat: &BoatRef, trip: &ParsedTrip) -> IdentityHashes {
        IdentityHashes {
            current: current_hash(&boat.name, &trip.landing_name, &trip.trip_duration, trip.anglers, &trip.catches),
            legacy: Some(legacy_hash(boat.id, &trip.landing_name, &trip.trip_duration, trip.anglers, &trip.catches)),
        }
    }

    /// The variants this scheme persists on new rows.
    pub fn for_storage(&self, hashes: &IdentityHashes) -> IdentityHashes {
        match self.scheme {
            HashScheme::Dual => hashes.clone(),
            HashScheme::CurrentOnly => IdentityHashes {
                current: hashes.current.clone(),
                legacy: None,
            },
        }
    }
}

pub fn legacy_hash(
    boat_id: Uuid,
    landing: &str,
    trip_duration: &str,
    anglers: u32,
    catches: &CatchSet,
) -> String {
    digest(&LegacyIdentity {
        boat_id,
        landing: normalize_name(landing),
        trip_duration: normalize_name(trip_duration),
        anglers,
        catches: catches.pairs(),
    })
}

pub fn current_hash(
    boat_name: &str,
    landing: &str,
    trip_duration: &str,
    anglers: u32,
    catches: &CatchSet,
) -> String {
    digest(&CurrentIdentity {
        boat: normalize_name(boat_name),
        landing_slug: landing_slug(landing),
        trip_duration: normalize_name(trip_duration),
        anglers,
        catches: catches.pairs(),
    })
}

/// `"Fisherman's Landing"` -> `"fishermans-landing"`.
pub fn landing_slug(landing: &str) -> String {
    landing
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '\'' | '’'))
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

fn digest<T: Serialize>(payload: &T) -> String {
    // Serializing plain structs of strings and integers cannot fail.
    let bytes = serde_json::to_vec(payload).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hex::encode(hasher.finalize())
}
