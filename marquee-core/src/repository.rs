use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::order::{Order, StatusTransition, Ticket};
use crate::seat::{ClaimResult, SeatClaim, SeatHold};
use crate::showtime::Showtime;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Duplicate key: {0}")]
    Duplicate(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Seat hold rows. The only writers of `available`/`version`.
#[async_trait]
pub trait SeatLedgerRepository: Send + Sync {
    /// Create holds for a newly scheduled showtime; existing rows are left untouched.
    async fn open_seat_holds(
        &self,
        showtime_id: Uuid,
        seat_ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> StoreResult<usize>;

    async fn seat_holds(&self, showtime_id: Uuid) -> StoreResult<Vec<SeatHold>>;

    /// All-or-nothing conditional claim. Nothing is written unless every seat passes.
    async fn claim_seats(
        &self,
        showtime_id: Uuid,
        claims: &[SeatClaim],
        holder: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<ClaimResult>;

    /// Mark seats available. Returns the seats that actually changed.
    async fn release_seats(
        &self,
        showtime_id: Uuid,
        seat_ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> StoreResult<Vec<Uuid>>;

    async fn seats_held_by(&self, order_id: Uuid) -> StoreResult<Vec<SeatHold>>;

    /// Release holds last written before `stale_before` whose holder order is
    /// gone or already in a releasing state. The cutoff keeps a reservation
    /// that has claimed seats but not yet inserted its order out of reach.
    async fn release_orphan_holds(
        &self,
        stale_before: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> StoreResult<u64>;
}

/// Orders and tickets. Status writes only go through `transition_order`.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Insert a pending order with its tickets. `Duplicate` when the idempotency key is taken.
    async fn insert_order(&self, order: &Order, tickets: &[Ticket]) -> StoreResult<()>;

    /// Take `key` for the reservation that will create `order_id`. Returns the
    /// current owner when another reservation already holds it. A claim older
    /// than `stale_before` whose order never appeared is taken over.
    async fn claim_idempotency_key(
        &self,
        key: &str,
        order_id: Uuid,
        at: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<Option<Uuid>>;

    /// Give the key back after a failed reservation. Only the owner's claim is removed.
    async fn release_idempotency_key(&self, key: &str, order_id: Uuid) -> StoreResult<()>;

    async fn get_order(&self, id: Uuid) -> StoreResult<Option<Order>>;

    async fn find_by_idempotency_key(&self, key: &str) -> StoreResult<Option<Order>>;

    async fn tickets_for(&self, order_id: Uuid) -> StoreResult<Vec<Ticket>>;

    /// Compare-and-set on (status, version) plus the transition's side effect, atomically.
    /// Returns the updated order when this caller won, `None` when the row had moved.
    /// A Paid order whose redemption is marked used never leaves Paid.
    async fn transition_order(&self, transition: &StatusTransition) -> StoreResult<Option<Order>>;

    async fn pending_created_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Order>>;

    /// Delete Expired/Failed/Cancelled orders last touched before the cutoff,
    /// with their redemption rows and idempotency keys
    async fn purge_terminal_orders(&self, updated_before: DateTime<Utc>) -> StoreResult<u64>;

    /// Delete tickets whose order is gone, or never activated on a terminal order
    async fn purge_orphan_tickets(&self) -> StoreResult<u64>;
}

/// Single-use bookkeeping for redemption tokens
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RedemptionRecord {
    pub order_id: Uuid,
    pub nonce: String,
    pub issued_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait RedemptionRepository: Send + Sync {
    /// Store the latest issued nonce. Fails with `Duplicate` once the order was redeemed.
    async fn record_issue(&self, order_id: Uuid, nonce: &str, at: DateTime<Utc>) -> StoreResult<()>;

    async fn redemption(&self, order_id: Uuid) -> StoreResult<Option<RedemptionRecord>>;

    /// Compare-and-set unused -> used on an issued token, only while the order
    /// is Paid. Exactly one caller observes `true`.
    async fn mark_used(&self, order_id: Uuid, at: DateTime<Utc>) -> StoreResult<bool>;
}

/// Read side of the showtime catalog (owned by the catalog service)
#[async_trait]
pub trait ShowtimeCatalog: Send + Sync {
    async fn showtime(&self, id: Uuid) -> StoreResult<Option<Showtime>>;

    /// Showtimes in a room overlapping the window, in start order
    async fn room_showtimes(
        &self,
        room_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Showtime>>;
}

/// Runtime overrides for booking rules (`rule_key`, `{"value": ...}`)
#[async_trait]
pub trait RulesSource: Send + Sync {
    async fn rule_overrides(&self) -> StoreResult<Vec<(String, serde_json::Value)>>;
}
