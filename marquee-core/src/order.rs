use chrono::{DateTime, Duration, Utc};
use marquee_shared::Masked;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Order status in the lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Paid,
    Expired,
    Failed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::Expired => "EXPIRED",
            OrderStatus::Failed => "FAILED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }

    /// Transition table. Paid is terminal for payment and expiry but can still
    /// be cancelled by the customer or staff.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (
                OrderStatus::Pending,
                OrderStatus::Paid
                    | OrderStatus::Expired
                    | OrderStatus::Failed
                    | OrderStatus::Cancelled
            ) | (OrderStatus::Paid, OrderStatus::Cancelled)
        )
    }

    /// Statuses whose seats go back to the ledger
    pub fn releases_seats(&self) -> bool {
        matches!(
            self,
            OrderStatus::Expired | OrderStatus::Failed | OrderStatus::Cancelled
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "PAID" => Ok(OrderStatus::Paid),
            "EXPIRED" => Ok(OrderStatus::Expired),
            "FAILED" => Ok(OrderStatus::Failed),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status: {}", other)),
        }
    }
}

/// Who the order belongs to. Guest contact details never reach the logs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Customer {
    Registered {
        user_id: String,
    },
    Guest {
        email: Masked<String>,
        phone: Option<Masked<String>>,
    },
}

impl Customer {
    /// Stable reference stored alongside the order
    pub fn reference(&self) -> String {
        match self {
            Customer::Registered { user_id } => format!("user:{}", user_id),
            Customer::Guest { email, .. } => format!("guest:{}", email.expose()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComboLine {
    pub combo_id: Uuid,
    pub quantity: u32,
}

/// What the payment callback told us when the order was settled
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentRecord {
    pub transaction_id: String,
    pub amount: i64,
    pub paid_at: DateTime<Utc>,
}

/// Aggregate root for one purchase attempt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub showtime_id: Uuid,
    pub seat_ids: Vec<Uuid>,
    pub customer: Customer,
    pub status: OrderStatus,
    pub voucher_id: Option<Uuid>,
    pub combos: Vec<ComboLine>,
    pub idempotency_key: Option<String>,
    pub payment: Option<PaymentRecord>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn pending(
        id: Uuid,
        showtime_id: Uuid,
        seat_ids: Vec<Uuid>,
        customer: Customer,
        voucher_id: Option<Uuid>,
        combos: Vec<ComboLine>,
        idempotency_key: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            showtime_id,
            seat_ids,
            customer,
            status: OrderStatus::Pending,
            voucher_id,
            combos,
            idempotency_key,
            payment: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn hold_expires_at(&self, hold_timeout: Duration) -> DateTime<Utc> {
        self.created_at + hold_timeout
    }

    /// Strictly past the deadline. An order is never reclaimable at exactly `created_at + timeout`.
    pub fn hold_lapsed(&self, now: DateTime<Utc>, hold_timeout: Duration) -> bool {
        now - self.created_at > hold_timeout
    }

    pub fn has_combos(&self) -> bool {
        self.combos.iter().any(|c| c.quantity > 0)
    }

    /// Same seats regardless of request order
    pub fn covers_same_seats(&self, seat_ids: &[Uuid]) -> bool {
        let mut mine = self.seat_ids.clone();
        let mut theirs = seat_ids.to_vec();
        mine.sort();
        theirs.sort();
        mine == theirs
    }
}

/// Links an order to exactly one seat hold. Inactive until the order is paid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ticket {
    pub id: Uuid,
    pub order_id: Uuid,
    pub showtime_id: Uuid,
    pub seat_id: Uuid,
    pub code: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Ticket {
    pub fn for_seat(order_id: Uuid, showtime_id: Uuid, seat_id: Uuid, now: DateTime<Utc>) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            order_id,
            showtime_id,
            seat_id,
            code: format!("MRQ-{}", id.simple()).to_uppercase(),
            active: false,
            created_at: now,
        }
    }
}

/// Side effect applied in the same unit of work as a status compare-and-set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionEffect {
    ActivateTickets,
    ReleaseSeats { discard_tickets: bool },
}

/// A conditional status write: applies only if the stored order still has
/// `from` as status and `expected_version` as version.
#[derive(Debug, Clone)]
pub struct StatusTransition {
    pub order_id: Uuid,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub expected_version: i64,
    pub effect: TransitionEffect,
    pub payment: Option<PaymentRecord>,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use OrderStatus::*;

        for next in [Paid, Expired, Failed, Cancelled] {
            assert!(Pending.can_transition_to(next));
        }
        assert!(Paid.can_transition_to(Cancelled));
        assert!(!Paid.can_transition_to(Expired));
        assert!(!Paid.can_transition_to(Failed));
        for terminal in [Expired, Failed, Cancelled] {
            for next in [Pending, Paid, Expired, Failed, Cancelled] {
                assert!(!terminal.can_transition_to(next));
            }
        }
        assert!(!Pending.can_transition_to(Pending));
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Paid,
            OrderStatus::Expired,
            OrderStatus::Failed,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("REFUNDED".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_hold_boundary_is_strict() {
        let created = Utc::now();
        let order = Order::pending(
            Uuid::new_v4(),
            Uuid::new_v4(),
            vec![Uuid::new_v4()],
            Customer::Registered { user_id: "u-1".to_string() },
            None,
            vec![],
            None,
            created,
        );
        let timeout = Duration::minutes(15);

        assert!(!order.hold_lapsed(created + Duration::seconds(14 * 60 + 59), timeout));
        assert!(!order.hold_lapsed(created + timeout, timeout));
        assert!(order.hold_lapsed(created + timeout + Duration::milliseconds(1), timeout));
        assert_eq!(order.hold_expires_at(timeout), created + timeout);
    }

    #[test]
    fn test_guest_reference_is_masked_in_debug() {
        let customer = Customer::Guest {
            email: Masked::new("guest@example.com".to_string()),
            phone: None,
        };
        assert!(!format!("{:?}", customer).contains("guest@example.com"));
        assert_eq!(customer.reference(), "guest:guest@example.com");
    }

    #[test]
    fn test_ticket_codes_are_unique() {
        let order_id = Uuid::new_v4();
        let showtime_id = Uuid::new_v4();
        let a = Ticket::for_seat(order_id, showtime_id, Uuid::new_v4(), Utc::now());
        let b = Ticket::for_seat(order_id, showtime_id, Uuid::new_v4(), Utc::now());
        assert!(a.code.starts_with("MRQ-"));
        assert_ne!(a.code, b.code);
        assert!(!a.active);
    }
}
