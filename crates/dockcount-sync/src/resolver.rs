use dockcount_core::{CatchSet, StoredTrip};
use uuid::Uuid;

/// Outcome of comparing an incoming trip against the trips sharing its
/// composite key.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    New,
    Duplicate { existing_trip_id: Uuid },
    Collision { existing: StoredTrip },
}

impl Resolution {
    pub fn label(&self) -> &'static str {
        match self {
            Resolution::New => "new",
            Resolution::Duplicate { .. } => "duplicate",
            Resolution::Collision { .. } => "collision",
        }
    }
}

/// Catch sets are compared as species -> count maps; weight notes and order
/// are ignored. An exact match anywhere among the candidates wins over a
/// collision.
pub fn resolve(incoming: &CatchSet, same_key: &[StoredTrip]) -> Resolution {
    if let Some(existing) = same_key.iter().find(|t| t.catches.same_counts(incoming)) {
        return Resolution::Duplicate {
            existing_trip_id: existing.id,
        };
    }
    match same_key.first() {
        Some(existing) => Resolution::Collision {
            existing: existing.clone(),
        },
        None => Resolution::New,
    }
}
