use marquee_core::repository::{OrderRepository, SeatLedgerRepository};
use marquee_core::{BookingResult, Clock, RulesHolder};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::lifecycle::{OrderLifecycle, TransitionOutcome};

const DEFAULT_BATCH_SIZE: i64 = 500;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub examined: usize,
    pub reclaimed: usize,
    /// Already settled by a payment callback or an overlapping sweep
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeReport {
    pub orders_purged: u64,
    pub tickets_purged: u64,
    pub holds_released: u64,
}

/// Periodic cleanup of lapsed holds and old terminal orders.
/// Every run is safe to overlap with another one.
#[derive(Clone)]
pub struct ExpiryReclaimer {
    orders: Arc<dyn OrderRepository>,
    seats: Arc<dyn SeatLedgerRepository>,
    lifecycle: Arc<OrderLifecycle>,
    rules: RulesHolder,
    clock: Arc<dyn Clock>,
    batch_size: i64,
}

impl ExpiryReclaimer {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        seats: Arc<dyn SeatLedgerRepository>,
        lifecycle: Arc<OrderLifecycle>,
        rules: RulesHolder,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            orders,
            seats,
            lifecycle,
            rules,
            clock,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Expire one batch of Pending orders whose hold has lapsed. Anything left
    /// over is picked up by the next run.
    pub async fn reclaim_expired(&self) -> BookingResult<SweepReport> {
        let cutoff = self.clock.now() - self.rules.current().hold_timeout();
        let candidates = self
            .orders
            .pending_created_before(cutoff, self.batch_size)
            .await?;

        let mut report = SweepReport {
            examined: candidates.len(),
            ..Default::default()
        };

        for order in candidates {
            match self.lifecycle.expire(order.id).await {
                Ok(TransitionOutcome::Applied(_)) => report.reclaimed += 1,
                Ok(TransitionOutcome::AlreadySettled(_)) => report.skipped += 1,
                Err(e) => {
                    error!("Failed to expire order {}: {}", order.id, e);
                    report.failed += 1;
                }
            }
        }

        if report.examined > 0 {
            info!(
                "Expiry sweep: examined {}, reclaimed {}, skipped {}, failed {}",
                report.examined, report.reclaimed, report.skipped, report.failed
            );
        }
        Ok(report)
    }

    /// Drop terminal orders past retention, their dangling tickets, and seat
    /// holds whose holder is gone or already released.
    pub async fn purge_terminal(&self) -> BookingResult<PurgeReport> {
        let rules = self.rules.current();
        let now = self.clock.now();

        let orders_purged = self
            .orders
            .purge_terminal_orders(now - rules.terminal_retention())
            .await?;
        let tickets_purged = self.orders.purge_orphan_tickets().await?;
        let holds_released = self
            .seats
            .release_orphan_holds(now - rules.hold_timeout(), now)
            .await?;

        let report = PurgeReport {
            orders_purged,
            tickets_purged,
            holds_released,
        };
        info!(
            "Purge: {} orders, {} tickets, {} orphan holds",
            report.orders_purged, report.tickets_purged, report.holds_released
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use marquee_core::events::NoopPublisher;
    use marquee_core::{Customer, ManualClock, Order, OrderStatus, SeatClaim, Ticket};
    use marquee_store::MemoryStore;
    use uuid::Uuid;

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        reclaimer: ExpiryReclaimer,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let rules = RulesHolder::default();
        let lifecycle = Arc::new(OrderLifecycle::new(
            store.clone(),
            store.clone(),
            Arc::new(NoopPublisher),
            rules.clone(),
            clock.clone(),
        ));
        let reclaimer =
            ExpiryReclaimer::new(store.clone(), store.clone(), lifecycle, rules, clock.clone());
        Fixture { store, clock, reclaimer }
    }

    async fn hold(f: &Fixture) -> (Order, Uuid) {
        let showtime_id = Uuid::new_v4();
        let seat = Uuid::new_v4();
        let now = f.clock.now();
        let order = Order::pending(
            Uuid::new_v4(),
            showtime_id,
            vec![seat],
            Customer::Registered { user_id: "u-2".to_string() },
            None,
            vec![],
            None,
            now,
        );
        f.store.open_seat_holds(showtime_id, &[seat], now).await.unwrap();
        f.store
            .claim_seats(showtime_id, &[SeatClaim::unconditioned(seat)], order.id, now)
            .await
            .unwrap();
        f.store
            .insert_order(&order, &[Ticket::for_seat(order.id, showtime_id, seat, now)])
            .await
            .unwrap();
        (order, seat)
    }

    #[tokio::test]
    async fn test_sweep_boundary() {
        let f = fixture();
        let (order, _) = hold(&f).await;

        f.clock.advance(Duration::seconds(14 * 60 + 59));
        assert_eq!(f.reclaimer.reclaim_expired().await.unwrap().examined, 0);

        // Exactly at the deadline the order is still held
        f.clock.advance(Duration::seconds(1));
        assert_eq!(f.reclaimer.reclaim_expired().await.unwrap().reclaimed, 0);

        f.clock.advance(Duration::milliseconds(1));
        let report = f.reclaimer.reclaim_expired().await.unwrap();
        assert_eq!(report.reclaimed, 1);
        assert_eq!(
            f.store.get_order(order.id).await.unwrap().unwrap().status,
            OrderStatus::Expired
        );
    }

    #[tokio::test]
    async fn test_overlapping_sweeps_expire_once() {
        let f = fixture();
        hold(&f).await;
        hold(&f).await;
        f.clock.advance(Duration::minutes(16));

        let (a, b) = tokio::join!(f.reclaimer.reclaim_expired(), f.reclaimer.reclaim_expired());
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.reclaimed + b.reclaimed, 2);
        assert_eq!(a.failed + b.failed, 0);
    }

    #[tokio::test]
    async fn test_batch_size_caps_each_run() {
        let mut f = fixture();
        f.reclaimer = f.reclaimer.clone().with_batch_size(1);
        hold(&f).await;
        hold(&f).await;
        f.clock.advance(Duration::minutes(16));

        let first = f.reclaimer.reclaim_expired().await.unwrap();
        assert_eq!((first.examined, first.reclaimed), (1, 1));
        let second = f.reclaimer.reclaim_expired().await.unwrap();
        assert_eq!((second.examined, second.reclaimed), (1, 1));
        assert_eq!(f.reclaimer.reclaim_expired().await.unwrap().examined, 0);
    }

    #[tokio::test]
    async fn test_purge_respects_retention() {
        let f = fixture();
        let (order, seat) = hold(&f).await;
        f.clock.advance(Duration::minutes(16));
        f.reclaimer.reclaim_expired().await.unwrap();

        let report = f.reclaimer.purge_terminal().await.unwrap();
        assert_eq!(report.orders_purged, 0);
        // Deactivated ticket on an expired order is dead weight
        assert_eq!(report.tickets_purged, 1);

        f.clock.advance(Duration::days(31));
        let report = f.reclaimer.purge_terminal().await.unwrap();
        assert_eq!(report.orders_purged, 1);
        assert!(f.store.get_order(order.id).await.unwrap().is_none());

        let holds = f.store.seat_holds(order.showtime_id).await.unwrap();
        assert!(holds.iter().any(|h| h.seat_id == seat && h.available));
    }

    #[tokio::test]
    async fn test_purge_releases_holds_of_missing_orders() {
        let f = fixture();
        let (order, _) = hold(&f).await;
        f.store.remove_order(order.id).await;

        f.clock.advance(Duration::minutes(16));
        let report = f.reclaimer.purge_terminal().await.unwrap();
        assert_eq!(report.holds_released, 1);
        assert_eq!(report.tickets_purged, 1);
        assert!(f.store.seats_held_by(order.id).await.unwrap().is_empty());
    }
}
