pub mod ledger;
pub mod lifecycle;
pub mod reclaimer;
pub mod redemption;
pub mod reservation;

pub use ledger::SeatLedger;
pub use lifecycle::{OrderLifecycle, OrderView, TransitionOutcome};
pub use reclaimer::{ExpiryReclaimer, PurgeReport, SweepReport};
pub use redemption::{
    RedemptionReceipt, RedemptionToken, RedemptionTokenService, TokenKind, VerificationResult,
};
pub use reservation::{CheckoutRequest, Reservation, ReservationCoordinator};

use marquee_core::events::EventPublisher;
use marquee_core::repository::{
    OrderRepository, RedemptionRepository, SeatLedgerRepository, ShowtimeCatalog,
};
use marquee_core::{BookingResult, Clock, RulesHolder};
use std::sync::Arc;

/// Store handles the engine needs. Postgres deployments pass one repository per
/// table, tests pass the same `MemoryStore` four times via `Stores::shared`.
#[derive(Clone)]
pub struct Stores {
    pub seats: Arc<dyn SeatLedgerRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub redemptions: Arc<dyn RedemptionRepository>,
    pub catalog: Arc<dyn ShowtimeCatalog>,
}

impl Stores {
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: SeatLedgerRepository
            + OrderRepository
            + RedemptionRepository
            + ShowtimeCatalog
            + 'static,
    {
        Self {
            seats: store.clone(),
            orders: store.clone(),
            redemptions: store.clone(),
            catalog: store,
        }
    }
}

/// The five booking services wired against one set of stores, rules and clock
#[derive(Clone)]
pub struct BookingEngine {
    pub ledger: SeatLedger,
    pub reservations: Arc<ReservationCoordinator>,
    pub lifecycle: Arc<OrderLifecycle>,
    pub reclaimer: Arc<ExpiryReclaimer>,
    pub redemption: Arc<RedemptionTokenService>,
}

impl BookingEngine {
    pub fn new(
        stores: Stores,
        publisher: Arc<dyn EventPublisher>,
        rules: RulesHolder,
        clock: Arc<dyn Clock>,
        signing_secret: &[u8],
    ) -> BookingResult<Self> {
        let ledger = SeatLedger::new(stores.seats.clone(), clock.clone());

        let lifecycle = Arc::new(OrderLifecycle::new(
            stores.orders.clone(),
            stores.redemptions.clone(),
            publisher.clone(),
            rules.clone(),
            clock.clone(),
        ));

        let reservations = Arc::new(ReservationCoordinator::new(
            ledger.clone(),
            stores.orders.clone(),
            stores.catalog.clone(),
            publisher.clone(),
            rules.clone(),
            clock.clone(),
        ));

        let reclaimer = Arc::new(ExpiryReclaimer::new(
            stores.orders.clone(),
            stores.seats.clone(),
            lifecycle.clone(),
            rules.clone(),
            clock.clone(),
        ));

        let redemption = Arc::new(RedemptionTokenService::new(
            stores.orders,
            stores.redemptions,
            stores.catalog,
            publisher,
            rules,
            clock,
            signing_secret,
        )?);

        Ok(Self {
            ledger,
            reservations,
            lifecycle,
            reclaimer,
            redemption,
        })
    }

    /// Caps how many lapsed orders one expiry sweep expires
    pub fn with_reclaim_batch_size(mut self, batch_size: i64) -> Self {
        let reclaimer = self.reclaimer.as_ref().clone().with_batch_size(batch_size);
        self.reclaimer = Arc::new(reclaimer);
        self
    }
}
