use marquee_core::repository::SeatLedgerRepository;
use marquee_core::{
    AvailabilitySnapshot, BookingError, BookingResult, ClaimResult, Clock, SeatClaim,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Authoritative per-showtime seat state. All seat mutation goes through here.
#[derive(Clone)]
pub struct SeatLedger {
    seats: Arc<dyn SeatLedgerRepository>,
    clock: Arc<dyn Clock>,
}

impl SeatLedger {
    pub fn new(seats: Arc<dyn SeatLedgerRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { seats, clock }
    }

    /// Create one hold per seat for a newly scheduled showtime. Safe to repeat.
    pub async fn open_showtime(
        &self,
        showtime_id: Uuid,
        seat_ids: &[Uuid],
    ) -> BookingResult<usize> {
        let created = self
            .seats
            .open_seat_holds(showtime_id, seat_ids, self.clock.now())
            .await?;
        info!("Opened {} seat holds for showtime {}", created, showtime_id);
        Ok(created)
    }

    /// Claim every seat for `holder` or none of them.
    ///
    /// A seat listed in `expected_versions` only passes if its version is
    /// unchanged; seats without an entry are claimed at whatever version is
    /// current. Seats that do not exist for the showtime are an error, seats
    /// that are taken come back as `ClaimResult::Conflict`.
    pub async fn try_claim(
        &self,
        showtime_id: Uuid,
        seat_ids: &[Uuid],
        expected_versions: Option<&HashMap<Uuid, i64>>,
        holder: Uuid,
    ) -> BookingResult<ClaimResult> {
        let claims: Vec<SeatClaim> = seat_ids
            .iter()
            .map(|id| SeatClaim {
                seat_id: *id,
                expected_version: expected_versions.and_then(|v| v.get(id).copied()),
            })
            .collect();

        match self
            .seats
            .claim_seats(showtime_id, &claims, holder, self.clock.now())
            .await?
        {
            ClaimResult::NotFound { missing } => Err(BookingError::SeatNotFound(missing)),
            ClaimResult::Conflict { unavailable } => {
                debug!(
                    "Claim by {} on showtime {} lost {} seat(s)",
                    holder,
                    showtime_id,
                    unavailable.len()
                );
                Ok(ClaimResult::Conflict { unavailable })
            }
            claimed => Ok(claimed),
        }
    }

    /// Hand seats back. Returns only the seats that were actually held.
    pub async fn release(&self, showtime_id: Uuid, seat_ids: &[Uuid]) -> BookingResult<Vec<Uuid>> {
        let released = self
            .seats
            .release_seats(showtime_id, seat_ids, self.clock.now())
            .await?;
        if !released.is_empty() {
            info!("Released {} seat(s) on showtime {}", released.len(), showtime_id);
        }
        Ok(released)
    }

    pub async fn list_availability(
        &self,
        showtime_id: Uuid,
    ) -> BookingResult<AvailabilitySnapshot> {
        let read_at = self.clock.now();
        let seats = self.seats.seat_holds(showtime_id).await?;
        if seats.is_empty() {
            return Err(BookingError::ShowtimeNotFound(showtime_id));
        }

        Ok(AvailabilitySnapshot {
            showtime_id,
            read_at,
            seats,
        })
    }
}
