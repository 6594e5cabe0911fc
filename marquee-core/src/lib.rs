pub mod clock;
pub mod events;
pub mod order;
pub mod payment;
pub mod repository;
pub mod rules;
pub mod seat;
pub mod showtime;

use uuid::Uuid;

pub use clock::{Clock, ManualClock, SystemClock};
pub use order::{ComboLine, Customer, Order, OrderStatus, PaymentRecord, Ticket};
pub use repository::{StoreError, StoreResult};
pub use rules::{BookingRules, RulesHolder};
pub use seat::{AvailabilitySnapshot, ClaimResult, Seat, SeatClaim, SeatHold, SeatType};
pub use showtime::Showtime;

/// Everything the booking engine can report to a caller.
///
/// Seat conflicts and token failures are business outcomes the storefront and
/// door scanners render to users; `UpstreamUnavailable` is the only variant a
/// caller should retry blindly.
#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("Seats no longer available: {unavailable:?}")]
    SeatConflict { unavailable: Vec<Uuid> },

    #[error("Seats not found for showtime: {0:?}")]
    SeatNotFound(Vec<Uuid>),

    #[error("Showtime not found: {0}")]
    ShowtimeNotFound(Uuid),

    #[error("Showtime is not on sale: {0}")]
    ShowtimeNotSellable(String),

    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Redemption token invalid: {0}")]
    TokenInvalid(String),

    #[error("Redemption token expired")]
    TokenExpired,

    #[error("Ticket already checked in")]
    TokenAlreadyUsed,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl From<StoreError> for BookingError {
    fn from(err: StoreError) -> Self {
        BookingError::UpstreamUnavailable(err.to_string())
    }
}

pub type BookingResult<T> = Result<T, BookingError>;
