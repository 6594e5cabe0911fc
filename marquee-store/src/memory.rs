//! In-process implementation of every store trait.
//!
//! One lock guards all tables, so each trait method behaves like a single
//! database transaction: claims are all-or-nothing and status transitions
//! commit together with their side effects. Used by the test suites and by
//! the API integration tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marquee_core::events::{EventPublisher, PublishError};
use marquee_core::order::{StatusTransition, TransitionEffect};
use marquee_core::repository::{
    OrderRepository, RedemptionRecord, RedemptionRepository, RulesSource, SeatLedgerRepository,
    ShowtimeCatalog,
};
use marquee_core::{
    ClaimResult, Order, OrderStatus, SeatClaim, SeatHold, Showtime, StoreError, StoreResult, Ticket,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::RwLock;
use uuid::Uuid;

struct KeyClaim {
    order_id: Uuid,
    claimed_at: DateTime<Utc>,
}

#[derive(Default)]
struct MemoryState {
    holds: BTreeMap<(Uuid, Uuid), SeatHold>,
    orders: HashMap<Uuid, Order>,
    tickets: BTreeMap<Uuid, Ticket>,
    redemptions: HashMap<Uuid, RedemptionRecord>,
    idempotency_keys: HashMap<String, KeyClaim>,
    showtimes: HashMap<Uuid, Showtime>,
    rule_overrides: Vec<(String, serde_json::Value)>,
}

impl MemoryState {
    fn release_held_by(&mut self, order_id: Uuid, at: DateTime<Utc>) -> u64 {
        let mut released = 0;
        for hold in self.holds.values_mut() {
            if !hold.available && hold.order_id == Some(order_id) {
                release(hold, at);
                released += 1;
            }
        }
        released
    }

    fn redeemed(&self, order_id: Uuid) -> bool {
        self.redemptions
            .get(&order_id)
            .map_or(false, |r| r.used_at.is_some())
    }

    fn holds_for(&self, showtime_id: Uuid) -> impl Iterator<Item = &SeatHold> {
        self.holds
            .range((showtime_id, Uuid::nil())..=(showtime_id, Uuid::max()))
            .map(|(_, hold)| hold)
    }
}

fn release(hold: &mut SeatHold, at: DateTime<Utc>) {
    hold.available = true;
    hold.order_id = None;
    hold.version += 1;
    hold.updated_at = at;
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    offline: AtomicBool,
    reject_order_inserts: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the database going away; every call fails with `Unavailable` until reset
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make `insert_order` fail while seat claims keep working
    pub fn set_reject_order_inserts(&self, reject: bool) {
        self.reject_order_inserts.store(reject, Ordering::SeqCst);
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }

    /// Register a showtime as the catalog would
    pub async fn insert_showtime(&self, showtime: Showtime) {
        self.state.write().await.showtimes.insert(showtime.id, showtime);
    }

    pub async fn set_rule_override(&self, key: &str, value: serde_json::Value) {
        let mut state = self.state.write().await;
        state.rule_overrides.retain(|(k, _)| k != key);
        state.rule_overrides.push((key.to_string(), value));
    }

    /// Drop an order row without touching its tickets or holds, as a crash
    /// between writes or an external cleanup would.
    pub async fn remove_order(&self, order_id: Uuid) -> Option<Order> {
        self.state.write().await.orders.remove(&order_id)
    }

    pub async fn ticket_count(&self) -> usize {
        self.state.read().await.tickets.len()
    }

    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }
}

#[async_trait]
impl SeatLedgerRepository for MemoryStore {
    async fn open_seat_holds(
        &self,
        showtime_id: Uuid,
        seat_ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> StoreResult<usize> {
        self.check_online()?;
        let mut state = self.state.write().await;
        let mut created = 0;
        for seat_id in seat_ids {
            state
                .holds
                .entry((showtime_id, *seat_id))
                .or_insert_with(|| {
                    created += 1;
                    SeatHold::open(showtime_id, *seat_id, at)
                });
        }
        Ok(created)
    }

    async fn seat_holds(&self, showtime_id: Uuid) -> StoreResult<Vec<SeatHold>> {
        self.check_online()?;
        let state = self.state.read().await;
        Ok(state.holds_for(showtime_id).cloned().collect())
    }

    async fn claim_seats(
        &self,
        showtime_id: Uuid,
        claims: &[SeatClaim],
        holder: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<ClaimResult> {
        self.check_online()?;
        let mut state = self.state.write().await;

        let mut missing = Vec::new();
        let mut unavailable = Vec::new();
        for claim in claims {
            match state.holds.get(&(showtime_id, claim.seat_id)) {
                None => missing.push(claim.seat_id),
                Some(hold) if !hold.accepts(claim.expected_version) => {
                    unavailable.push(claim.seat_id)
                }
                Some(_) => {}
            }
        }

        if !missing.is_empty() {
            return Ok(ClaimResult::NotFound { missing });
        }
        if !unavailable.is_empty() {
            return Ok(ClaimResult::Conflict { unavailable });
        }

        let mut claimed = Vec::with_capacity(claims.len());
        for claim in claims {
            if let Some(hold) = state.holds.get_mut(&(showtime_id, claim.seat_id)) {
                hold.available = false;
                hold.order_id = Some(holder);
                hold.version += 1;
                hold.updated_at = at;
                claimed.push(hold.clone());
            }
        }
        Ok(ClaimResult::Claimed(claimed))
    }

    async fn release_seats(
        &self,
        showtime_id: Uuid,
        seat_ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> StoreResult<Vec<Uuid>> {
        self.check_online()?;
        let mut state = self.state.write().await;
        let mut released = Vec::new();
        for seat_id in seat_ids {
            if let Some(hold) = state.holds.get_mut(&(showtime_id, *seat_id)) {
                if !hold.available {
                    release(hold, at);
                    released.push(*seat_id);
                }
            }
        }
        Ok(released)
    }

    async fn seats_held_by(&self, order_id: Uuid) -> StoreResult<Vec<SeatHold>> {
        self.check_online()?;
        let state = self.state.read().await;
        Ok(state
            .holds
            .values()
            .filter(|h| !h.available && h.order_id == Some(order_id))
            .cloned()
            .collect())
    }

    async fn release_orphan_holds(
        &self,
        stale_before: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> StoreResult<u64> {
        self.check_online()?;
        let mut state = self.state.write().await;
        let MemoryState { holds, orders, .. } = &mut *state;

        let mut released = 0;
        for hold in holds.values_mut() {
            if hold.available || hold.updated_at >= stale_before {
                continue;
            }
            let holder_live = hold
                .order_id
                .and_then(|id| orders.get(&id))
                .map_or(false, |o| matches!(o.status, OrderStatus::Pending | OrderStatus::Paid));
            if !holder_live {
                release(hold, at);
                released += 1;
            }
        }
        Ok(released)
    }
}

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn insert_order(&self, order: &Order, tickets: &[Ticket]) -> StoreResult<()> {
        self.check_online()?;
        if self.reject_order_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("order insert rejected".to_string()));
        }
        let mut state = self.state.write().await;

        if state.orders.contains_key(&order.id) {
            return Err(StoreError::Duplicate(format!("order {}", order.id)));
        }
        if let Some(key) = &order.idempotency_key {
            if state
                .orders
                .values()
                .any(|o| o.idempotency_key.as_deref() == Some(key.as_str()))
            {
                return Err(StoreError::Duplicate(format!("idempotency key {}", key)));
            }
        }

        state.orders.insert(order.id, order.clone());
        for ticket in tickets {
            state.tickets.insert(ticket.id, ticket.clone());
        }
        Ok(())
    }

    async fn claim_idempotency_key(
        &self,
        key: &str,
        order_id: Uuid,
        at: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<Option<Uuid>> {
        self.check_online()?;
        let mut state = self.state.write().await;
        let MemoryState { idempotency_keys, orders, .. } = &mut *state;

        match idempotency_keys.get_mut(key) {
            Some(claim) if claim.order_id == order_id => Ok(None),
            Some(claim)
                if claim.claimed_at < stale_before && !orders.contains_key(&claim.order_id) =>
            {
                claim.order_id = order_id;
                claim.claimed_at = at;
                Ok(None)
            }
            Some(claim) => Ok(Some(claim.order_id)),
            None => {
                idempotency_keys.insert(
                    key.to_string(),
                    KeyClaim {
                        order_id,
                        claimed_at: at,
                    },
                );
                Ok(None)
            }
        }
    }

    async fn release_idempotency_key(&self, key: &str, order_id: Uuid) -> StoreResult<()> {
        self.check_online()?;
        let mut state = self.state.write().await;
        if state
            .idempotency_keys
            .get(key)
            .map_or(false, |claim| claim.order_id == order_id)
        {
            state.idempotency_keys.remove(key);
        }
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> StoreResult<Option<Order>> {
        self.check_online()?;
        Ok(self.state.read().await.orders.get(&id).cloned())
    }

    async fn find_by_idempotency_key(&self, key: &str) -> StoreResult<Option<Order>> {
        self.check_online()?;
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .find(|o| o.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn tickets_for(&self, order_id: Uuid) -> StoreResult<Vec<Ticket>> {
        self.check_online()?;
        let state = self.state.read().await;
        Ok(state
            .tickets
            .values()
            .filter(|t| t.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn transition_order(&self, transition: &StatusTransition) -> StoreResult<Option<Order>> {
        self.check_online()?;
        let mut state = self.state.write().await;

        if transition.from == OrderStatus::Paid && state.redeemed(transition.order_id) {
            return Ok(None);
        }

        let updated = match state.orders.get_mut(&transition.order_id) {
            Some(order)
                if order.status == transition.from
                    && order.version == transition.expected_version =>
            {
                order.status = transition.to;
                order.version += 1;
                order.updated_at = transition.at;
                if let Some(payment) = &transition.payment {
                    order.payment = Some(payment.clone());
                }
                order.clone()
            }
            _ => return Ok(None),
        };

        match transition.effect {
            TransitionEffect::ActivateTickets => {
                for ticket in state.tickets.values_mut() {
                    if ticket.order_id == transition.order_id {
                        ticket.active = true;
                    }
                }
            }
            TransitionEffect::ReleaseSeats { discard_tickets } => {
                state.release_held_by(transition.order_id, transition.at);
                if discard_tickets {
                    state.tickets.retain(|_, t| t.order_id != transition.order_id);
                } else {
                    for ticket in state.tickets.values_mut() {
                        if ticket.order_id == transition.order_id {
                            ticket.active = false;
                        }
                    }
                }
            }
        }

        Ok(Some(updated))
    }

    async fn pending_created_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Order>> {
        self.check_online()?;
        let state = self.state.read().await;
        let mut pending: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Pending && o.created_at < cutoff)
            .cloned()
            .collect();
        pending.sort_by_key(|o| o.created_at);
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn purge_terminal_orders(&self, updated_before: DateTime<Utc>) -> StoreResult<u64> {
        self.check_online()?;
        let mut state = self.state.write().await;

        let purged: Vec<Uuid> = state
            .orders
            .values()
            .filter(|o| o.status.releases_seats() && o.updated_at < updated_before)
            .map(|o| o.id)
            .collect();

        for id in &purged {
            state.orders.remove(id);
            state.redemptions.remove(id);
        }
        state
            .idempotency_keys
            .retain(|_, claim| !purged.contains(&claim.order_id));
        Ok(purged.len() as u64)
    }

    async fn purge_orphan_tickets(&self) -> StoreResult<u64> {
        self.check_online()?;
        let mut state = self.state.write().await;
        let MemoryState { orders, tickets, .. } = &mut *state;

        let before = tickets.len();
        tickets.retain(|_, ticket| match orders.get(&ticket.order_id) {
            None => false,
            Some(order) => ticket.active || !order.status.releases_seats(),
        });
        Ok((before - tickets.len()) as u64)
    }
}

#[async_trait]
impl RedemptionRepository for MemoryStore {
    async fn record_issue(
        &self,
        order_id: Uuid,
        nonce: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.check_online()?;
        let mut state = self.state.write().await;
        match state.redemptions.get_mut(&order_id) {
            Some(record) if record.used_at.is_some() => Err(StoreError::Duplicate(format!(
                "order {} already redeemed",
                order_id
            ))),
            Some(record) => {
                record.nonce = nonce.to_string();
                record.issued_at = at;
                Ok(())
            }
            None => {
                state.redemptions.insert(
                    order_id,
                    RedemptionRecord {
                        order_id,
                        nonce: nonce.to_string(),
                        issued_at: at,
                        used_at: None,
                    },
                );
                Ok(())
            }
        }
    }

    async fn redemption(&self, order_id: Uuid) -> StoreResult<Option<RedemptionRecord>> {
        self.check_online()?;
        Ok(self.state.read().await.redemptions.get(&order_id).cloned())
    }

    async fn mark_used(&self, order_id: Uuid, at: DateTime<Utc>) -> StoreResult<bool> {
        self.check_online()?;
        let mut state = self.state.write().await;
        let MemoryState { orders, redemptions, .. } = &mut *state;

        let paid = orders
            .get(&order_id)
            .map_or(false, |o| o.status == OrderStatus::Paid);
        match redemptions.get_mut(&order_id) {
            Some(record) if paid && record.used_at.is_none() => {
                record.used_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl ShowtimeCatalog for MemoryStore {
    async fn showtime(&self, id: Uuid) -> StoreResult<Option<Showtime>> {
        self.check_online()?;
        Ok(self.state.read().await.showtimes.get(&id).cloned())
    }

    async fn room_showtimes(
        &self,
        room_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Showtime>> {
        self.check_online()?;
        let state = self.state.read().await;
        let mut showtimes: Vec<Showtime> = state
            .showtimes
            .values()
            .filter(|s| s.room_id == room_id && s.ends_at > from && s.starts_at < to)
            .cloned()
            .collect();
        showtimes.sort_by_key(|s| s.starts_at);
        Ok(showtimes)
    }
}

#[async_trait]
impl RulesSource for MemoryStore {
    async fn rule_overrides(&self) -> StoreResult<Vec<(String, serde_json::Value)>> {
        self.check_online()?;
        Ok(self.state.read().await.rule_overrides.clone())
    }
}

/// One captured publish call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedEvent {
    pub topic: String,
    pub key: String,
    pub payload: String,
}

/// Publisher that keeps everything in memory for assertions
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<PublishedEvent>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PublishedEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn topics(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.topic).collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), PublishError> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(PublishedEvent {
                topic: topic.to_string(),
                key: key.to_string(),
                payload: payload.to_string(),
            });
        Ok(())
    }
}
