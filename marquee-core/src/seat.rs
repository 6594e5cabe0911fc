use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Price class of a physical seat
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatType {
    Standard,
    Vip,
    Couple,
}

/// A physical seat in a room. Owned by the catalog, never mutated by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Seat {
    pub id: Uuid,
    pub room_id: Uuid,
    pub row_label: String,
    pub number: i32,
    pub seat_type: SeatType,
}

impl Seat {
    pub fn label(&self) -> String {
        format!("{}{}", self.row_label, self.number)
    }
}

/// Reservable state of one seat for one showtime.
///
/// `version` is bumped on every successful write; claims are conditional on it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeatHold {
    pub showtime_id: Uuid,
    pub seat_id: Uuid,
    pub available: bool,
    pub version: i64,
    pub order_id: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

impl SeatHold {
    pub fn open(showtime_id: Uuid, seat_id: Uuid, at: DateTime<Utc>) -> Self {
        Self {
            showtime_id,
            seat_id,
            available: true,
            version: 0,
            order_id: None,
            updated_at: at,
        }
    }

    /// Whether a claim with the given expectation would succeed against this row.
    pub fn accepts(&self, expected_version: Option<i64>) -> bool {
        self.available && expected_version.map_or(true, |v| v == self.version)
    }
}

/// One seat of a claim request. `None` means "whatever version is current".
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeatClaim {
    pub seat_id: Uuid,
    pub expected_version: Option<i64>,
}

impl SeatClaim {
    pub fn unconditioned(seat_id: Uuid) -> Self {
        Self { seat_id, expected_version: None }
    }

    pub fn at_version(seat_id: Uuid, version: i64) -> Self {
        Self { seat_id, expected_version: Some(version) }
    }
}

/// Outcome of an all-or-nothing claim over a seat set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimResult {
    Claimed(Vec<SeatHold>),
    Conflict { unavailable: Vec<Uuid> },
    NotFound { missing: Vec<Uuid> },
}

/// Point-in-time read of a showtime's seat map
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilitySnapshot {
    pub showtime_id: Uuid,
    pub read_at: DateTime<Utc>,
    pub seats: Vec<SeatHold>,
}

impl AvailabilitySnapshot {
    pub fn available_seat_ids(&self) -> Vec<Uuid> {
        self.seats
            .iter()
            .filter(|s| s.available)
            .map(|s| s.seat_id)
            .collect()
    }

    pub fn held_count(&self) -> usize {
        self.seats.iter().filter(|s| !s.available).count()
    }

    pub fn version_of(&self, seat_id: Uuid) -> Option<i64> {
        self.seats
            .iter()
            .find(|s| s.seat_id == seat_id)
            .map(|s| s.version)
    }

    /// Claims pinned to the versions observed by this snapshot
    pub fn claims_for(&self, seat_ids: &[Uuid]) -> Vec<SeatClaim> {
        seat_ids
            .iter()
            .map(|id| SeatClaim {
                seat_id: *id,
                expected_version: self.version_of(*id),
            })
            .collect()
    }
}
