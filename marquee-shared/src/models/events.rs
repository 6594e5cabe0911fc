use chrono::{DateTime, Utc};
use uuid::Uuid;

pub const TOPIC_ORDER_RESERVED: &str = "orders.reserved";
pub const TOPIC_ORDER_PAID: &str = "orders.paid";
pub const TOPIC_ORDER_RELEASED: &str = "orders.released";
pub const TOPIC_ORDER_REDEEMED: &str = "orders.redeemed";

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct OrderReservedEvent {
    pub order_id: Uuid,
    pub showtime_id: Uuid,
    pub seat_ids: Vec<Uuid>,
    pub hold_expires_at: DateTime<Utc>,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct OrderPaidEvent {
    pub order_id: Uuid,
    pub showtime_id: Uuid,
    pub transaction_id: String,
    pub amount: i64,
    pub timestamp: i64,
}

/// Emitted whenever a transition hands seats back to the ledger.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct OrderReleasedEvent {
    pub order_id: Uuid,
    pub showtime_id: Uuid,
    pub seat_ids: Vec<Uuid>,
    /// EXPIRED, FAILED or CANCELLED
    pub reason: String,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct OrderRedeemedEvent {
    pub order_id: Uuid,
    pub kind: String,
    pub timestamp: i64,
}
