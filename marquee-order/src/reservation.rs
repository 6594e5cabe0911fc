use chrono::{DateTime, Duration, Utc};
use marquee_core::events::{publish_json, EventPublisher};
use marquee_core::repository::{OrderRepository, ShowtimeCatalog};
use marquee_core::{
    BookingError, BookingResult, BookingRules, ClaimResult, Clock, ComboLine, Customer, Order,
    RulesHolder, StoreError, Ticket,
};
use marquee_shared::models::events::{OrderReservedEvent, TOPIC_ORDER_RESERVED};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::ledger::SeatLedger;

const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;
/// A key claim older than this whose order never landed belongs to a dead request
const KEY_CLAIM_STALE_SECS: i64 = 30;
const KEY_WAIT_INITIAL: StdDuration = StdDuration::from_millis(10);
const KEY_WAIT_MAX_STEP: StdDuration = StdDuration::from_millis(200);
const KEY_WAIT_TOTAL: StdDuration = StdDuration::from_secs(3);

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub showtime_id: Uuid,
    pub seat_ids: Vec<Uuid>,
    /// Versions observed on the availability read, keyed by seat
    #[serde(default)]
    pub expected_versions: Option<HashMap<Uuid, i64>>,
    /// `readAt` of the availability snapshot the versions came from
    #[serde(default)]
    pub versions_read_at: Option<DateTime<Utc>>,
    pub customer: Customer,
    #[serde(default)]
    pub voucher_id: Option<Uuid>,
    #[serde(default)]
    pub combo_items: Vec<ComboLine>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub order: Order,
    pub hold_expires_at: DateTime<Utc>,
    pub tickets: Vec<Ticket>,
    /// True when an earlier submission with the same idempotency key was returned
    #[serde(skip)]
    pub replayed: bool,
}

/// Turns a checkout request into a Pending order holding its seats
pub struct ReservationCoordinator {
    ledger: SeatLedger,
    orders: Arc<dyn OrderRepository>,
    catalog: Arc<dyn ShowtimeCatalog>,
    publisher: Arc<dyn EventPublisher>,
    rules: RulesHolder,
    clock: Arc<dyn Clock>,
}

impl ReservationCoordinator {
    pub fn new(
        ledger: SeatLedger,
        orders: Arc<dyn OrderRepository>,
        catalog: Arc<dyn ShowtimeCatalog>,
        publisher: Arc<dyn EventPublisher>,
        rules: RulesHolder,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            orders,
            catalog,
            publisher,
            rules,
            clock,
        }
    }

    pub async fn reserve(&self, request: CheckoutRequest) -> BookingResult<Reservation> {
        let rules = self.rules.current();
        let now = self.clock.now();

        validate_request(&request, &rules)?;

        if let Some(key) = &request.idempotency_key {
            if let Some(existing) = self.orders.find_by_idempotency_key(key).await? {
                return self.replay(existing, &request, &rules).await;
            }
        }

        self.ensure_sellable(request.showtime_id, now, &rules).await?;

        if request.expected_versions.is_some() {
            if let Some(read_at) = request.versions_read_at {
                if now - read_at > rules.availability_freshness() {
                    warn!(
                        "Rejecting checkout on showtime {} with versions read at {}",
                        request.showtime_id, read_at
                    );
                    return Err(BookingError::SeatConflict {
                        unavailable: request.seat_ids.clone(),
                    });
                }
            }
        }

        let order_id = Uuid::new_v4();
        let key = request.idempotency_key.as_deref();
        if let Some(key) = key {
            if let Some(existing) = self.claim_key(key, order_id).await? {
                return self.replay(existing, &request, &rules).await;
            }
        }

        let claimed = match self
            .ledger
            .try_claim(
                request.showtime_id,
                &request.seat_ids,
                request.expected_versions.as_ref(),
                order_id,
            )
            .await
        {
            Ok(claimed) => claimed,
            Err(e) => {
                self.release_key(key, order_id).await;
                return Err(e);
            }
        };

        if let ClaimResult::Conflict { unavailable } = claimed {
            self.release_key(key, order_id).await;
            info!(
                "Seat conflict on showtime {}: {} seat(s) unavailable",
                request.showtime_id,
                unavailable.len()
            );
            return Err(BookingError::SeatConflict { unavailable });
        }

        let order = Order::pending(
            order_id,
            request.showtime_id,
            request.seat_ids.clone(),
            request.customer.clone(),
            request.voucher_id,
            request.combo_items.clone(),
            request.idempotency_key.clone(),
            now,
        );
        let tickets: Vec<Ticket> = request
            .seat_ids
            .iter()
            .map(|seat_id| Ticket::for_seat(order_id, request.showtime_id, *seat_id, now))
            .collect();

        if let Err(e) = self.orders.insert_order(&order, &tickets).await {
            self.compensate(&order).await;
            self.release_key(key, order_id).await;

            if let (StoreError::Duplicate(_), Some(key)) = (&e, &request.idempotency_key) {
                if let Some(existing) = self.orders.find_by_idempotency_key(key).await? {
                    return self.replay(existing, &request, &rules).await;
                }
            }
            error!("Failed to persist order {}: {}", order_id, e);
            return Err(BookingError::UpstreamUnavailable(e.to_string()));
        }

        let hold_expires_at = order.hold_expires_at(rules.hold_timeout());
        info!(
            "Order {} reserved {} seat(s) on showtime {} for {:?}",
            order.id,
            order.seat_ids.len(),
            order.showtime_id,
            order.customer
        );

        publish_json(
            self.publisher.as_ref(),
            TOPIC_ORDER_RESERVED,
            &order.id.to_string(),
            &OrderReservedEvent {
                order_id: order.id,
                showtime_id: order.showtime_id,
                seat_ids: order.seat_ids.clone(),
                hold_expires_at,
                timestamp: now.timestamp(),
            },
        )
        .await;

        Ok(Reservation {
            order,
            hold_expires_at,
            tickets,
            replayed: false,
        })
    }

    /// Showtime exists, has not started, is inside the advance-sale window and
    /// keeps the turnaround gap to its neighbours in the same room.
    async fn ensure_sellable(
        &self,
        showtime_id: Uuid,
        now: DateTime<Utc>,
        rules: &BookingRules,
    ) -> BookingResult<()> {
        let showtime = self
            .catalog
            .showtime(showtime_id)
            .await?
            .ok_or(BookingError::ShowtimeNotFound(showtime_id))?;

        if now >= showtime.starts_at {
            return Err(BookingError::ShowtimeNotSellable(
                "showtime has already started".to_string(),
            ));
        }
        if showtime.starts_at > now + rules.advance_sale_window() {
            return Err(BookingError::ShowtimeNotSellable(format!(
                "sales open {} day(s) before the showtime",
                rules.advance_sale_days
            )));
        }

        // Anything overlapping [start - gap, end + gap) breaks the turnaround
        let gap = rules.room_break();
        let neighbours = self
            .catalog
            .room_showtimes(showtime.room_id, showtime.starts_at - gap, showtime.ends_at + gap)
            .await?;

        if let Some(clash) = neighbours.iter().find(|s| s.id != showtime.id) {
            return Err(BookingError::ShowtimeNotSellable(format!(
                "room turnaround of {} minutes not respected (clashes with showtime {})",
                rules.room_break_time_minutes, clash.id
            )));
        }
        Ok(())
    }

    /// Claims `key` for `order_id`. While another request owns it, waits for
    /// that request's order to land and returns it for replay. `None` means
    /// the key is ours and the checkout goes ahead.
    async fn claim_key(&self, key: &str, order_id: Uuid) -> BookingResult<Option<Order>> {
        let mut step = KEY_WAIT_INITIAL;
        let mut waited = StdDuration::ZERO;

        loop {
            let now = self.clock.now();
            let stale_before = now - Duration::seconds(KEY_CLAIM_STALE_SECS);
            let Some(owner) = self
                .orders
                .claim_idempotency_key(key, order_id, now, stale_before)
                .await?
            else {
                return Ok(None);
            };

            if let Some(existing) = self.orders.get_order(owner).await? {
                return Ok(Some(existing));
            }

            if waited >= KEY_WAIT_TOTAL {
                warn!("Checkout {} still owns idempotency key after {:?}", owner, waited);
                return Err(BookingError::UpstreamUnavailable(format!(
                    "checkout with idempotency key {} is still in progress",
                    key
                )));
            }

            debug!("Idempotency key held by in-flight checkout {}; waiting {:?}", owner, step);
            tokio::time::sleep(step).await;
            waited += step;
            step = (step * 2).min(KEY_WAIT_MAX_STEP);
        }
    }

    async fn release_key(&self, key: Option<&str>, order_id: Uuid) {
        let Some(key) = key else {
            return;
        };
        // A leftover claim is taken over once stale
        if let Err(e) = self.orders.release_idempotency_key(key, order_id).await {
            warn!("Failed to release idempotency key for order {}: {}", order_id, e);
        }
    }

    async fn replay(
        &self,
        existing: Order,
        request: &CheckoutRequest,
        rules: &BookingRules,
    ) -> BookingResult<Reservation> {
        if existing.showtime_id != request.showtime_id
            || !existing.covers_same_seats(&request.seat_ids)
        {
            return Err(BookingError::Validation(
                "idempotency key was already used for a different seat selection".to_string(),
            ));
        }

        info!("Replaying order {} for duplicate checkout", existing.id);
        let tickets = self.orders.tickets_for(existing.id).await?;
        Ok(Reservation {
            hold_expires_at: existing.hold_expires_at(rules.hold_timeout()),
            order: existing,
            tickets,
            replayed: true,
        })
    }

    async fn compensate(&self, order: &Order) {
        match self.ledger.release(order.showtime_id, &order.seat_ids).await {
            Ok(released) => warn!(
                "Released {} seat(s) claimed for unpersisted order {}",
                released.len(),
                order.id
            ),
            // Left for the orphan-hold sweep
            Err(e) => error!("Compensation for order {} failed: {}", order.id, e),
        }
    }
}

fn validate_request(request: &CheckoutRequest, rules: &BookingRules) -> BookingResult<()> {
    if request.seat_ids.is_empty() {
        return Err(BookingError::Validation("at least one seat is required".to_string()));
    }
    if request.seat_ids.len() > rules.max_seats_per_order {
        return Err(BookingError::Validation(format!(
            "at most {} seats per order",
            rules.max_seats_per_order
        )));
    }

    let mut seen = HashSet::with_capacity(request.seat_ids.len());
    if let Some(dup) = request.seat_ids.iter().find(|id| !seen.insert(**id)) {
        return Err(BookingError::Validation(format!("seat {} requested twice", dup)));
    }

    if let Some(versions) = &request.expected_versions {
        if let Some(extra) = versions.keys().find(|id| !seen.contains(*id)) {
            return Err(BookingError::Validation(format!(
                "expected version given for unrequested seat {}",
                extra
            )));
        }
    }

    if request.combo_items.iter().any(|c| c.quantity == 0) {
        return Err(BookingError::Validation("combo quantity must be positive".to_string()));
    }

    if let Some(key) = &request.idempotency_key {
        if key.trim().is_empty() || key.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(BookingError::Validation(format!(
                "idempotency key must be 1-{} characters",
                MAX_IDEMPOTENCY_KEY_LEN
            )));
        }
    }

    if let Customer::Guest { email, .. } = &request.customer {
        if !email.expose().contains('@') {
            return Err(BookingError::Validation("guest email is invalid".to_string()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use marquee_shared::Masked;

    fn request(seats: Vec<Uuid>) -> CheckoutRequest {
        CheckoutRequest {
            showtime_id: Uuid::new_v4(),
            seat_ids: seats,
            expected_versions: None,
            versions_read_at: None,
            customer: Customer::Registered { user_id: "u-1".to_string() },
            voucher_id: None,
            combo_items: vec![],
            idempotency_key: None,
        }
    }

    #[test]
    fn test_rejects_empty_and_duplicate_seats() {
        let rules = BookingRules::default();
        assert!(matches!(
            validate_request(&request(vec![]), &rules),
            Err(BookingError::Validation(_))
        ));

        let seat = Uuid::new_v4();
        assert!(matches!(
            validate_request(&request(vec![seat, seat]), &rules),
            Err(BookingError::Validation(_))
        ));
    }

    #[test]
    fn test_rejects_too_many_seats() {
        let mut rules = BookingRules::default();
        rules.max_seats_per_order = 2;
        let seats = (0..3).map(|_| Uuid::new_v4()).collect();
        assert!(validate_request(&request(seats), &rules).is_err());
    }

    #[test]
    fn test_rejects_bad_guest_email() {
        let mut req = request(vec![Uuid::new_v4()]);
        req.customer = Customer::Guest {
            email: Masked::new("not-an-email".to_string()),
            phone: None,
        };
        assert!(validate_request(&req, &BookingRules::default()).is_err());
    }

    #[test]
    fn test_checkout_body_parses() {
        let seat = Uuid::new_v4();
        let body = serde_json::json!({
            "showtimeId": Uuid::new_v4(),
            "seatIds": [seat],
            "expectedVersions": { seat.to_string(): 3 },
            "customer": { "type": "GUEST", "email": "guest@example.com", "phone": null },
            "comboItems": [{ "combo_id": Uuid::new_v4(), "quantity": 2 }],
        });

        let parsed: CheckoutRequest = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.expected_versions.as_ref().unwrap().get(&seat), Some(&3));
        assert_eq!(parsed.combo_items[0].quantity, 2);
        assert!(validate_request(&parsed, &BookingRules::default()).is_ok());
    }
}
