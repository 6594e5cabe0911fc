use chrono::{DateTime, Utc};
use marquee_core::events::{publish_json, EventPublisher};
use marquee_core::order::{StatusTransition, TransitionEffect};
use marquee_core::payment::PaymentCallback;
use marquee_core::repository::{OrderRepository, RedemptionRepository};
use marquee_core::{
    BookingError, BookingResult, Clock, Order, OrderStatus, PaymentRecord, RulesHolder, Ticket,
};
use marquee_shared::models::events::{
    OrderPaidEvent, OrderReleasedEvent, TOPIC_ORDER_PAID, TOPIC_ORDER_RELEASED,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Result of asking for a status change
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// This caller moved the order; carries the updated row
    Applied(Order),
    /// Another actor settled the order first. Not an error.
    AlreadySettled(OrderStatus),
}

impl TransitionOutcome {
    pub fn status(&self) -> OrderStatus {
        match self {
            TransitionOutcome::Applied(order) => order.status,
            TransitionOutcome::AlreadySettled(status) => *status,
        }
    }

    pub fn applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }
}

/// What a client polling its order sees
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    pub order: Order,
    pub tickets: Vec<Ticket>,
    pub hold_expires_at: DateTime<Utc>,
    pub status_reason: Option<String>,
}

/// The only writer of order status
pub struct OrderLifecycle {
    orders: Arc<dyn OrderRepository>,
    redemptions: Arc<dyn RedemptionRepository>,
    publisher: Arc<dyn EventPublisher>,
    rules: RulesHolder,
    clock: Arc<dyn Clock>,
}

impl OrderLifecycle {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        redemptions: Arc<dyn RedemptionRepository>,
        publisher: Arc<dyn EventPublisher>,
        rules: RulesHolder,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            orders,
            redemptions,
            publisher,
            rules,
            clock,
        }
    }

    /// Pending -> Paid. Tickets become active, seats stay sold.
    pub async fn confirm_payment(
        &self,
        order_id: Uuid,
        payment: PaymentRecord,
    ) -> BookingResult<TransitionOutcome> {
        self.settle_pending(order_id, OrderStatus::Paid, Some(payment)).await
    }

    /// Pending -> Failed. Seats go back, tickets are discarded.
    pub async fn fail_payment(&self, order_id: Uuid) -> BookingResult<TransitionOutcome> {
        self.settle_pending(order_id, OrderStatus::Failed, None).await
    }

    /// Pending -> Expired, only once the hold window has strictly passed
    pub async fn expire(&self, order_id: Uuid) -> BookingResult<TransitionOutcome> {
        let order = self.load(order_id).await?;
        if order.status == OrderStatus::Pending {
            let timeout = self.rules.current().hold_timeout();
            if !order.hold_lapsed(self.clock.now(), timeout) {
                return Err(BookingError::Validation(format!(
                    "hold on order {} runs until {}",
                    order_id,
                    order.hold_expires_at(timeout)
                )));
            }
        }
        self.settle_pending(order_id, OrderStatus::Expired, None).await
    }

    /// Customer or staff cancellation of a Pending or Paid order
    pub async fn cancel(&self, order_id: Uuid) -> BookingResult<TransitionOutcome> {
        let order = self.load(order_id).await?;
        match order.status {
            OrderStatus::Cancelled => return Ok(TransitionOutcome::AlreadySettled(order.status)),
            OrderStatus::Pending => {}
            OrderStatus::Paid => {
                if self.redeemed(order_id).await? {
                    return Err(already_checked_in());
                }
            }
            from => {
                return Err(BookingError::InvalidTransition {
                    from,
                    to: OrderStatus::Cancelled,
                })
            }
        }

        let outcome = self.drive(order, OrderStatus::Cancelled, None).await?;
        // The store refuses to move a checked-in order out of Paid
        if outcome == TransitionOutcome::AlreadySettled(OrderStatus::Paid)
            && self.redeemed(order_id).await?
        {
            return Err(already_checked_in());
        }
        Ok(outcome)
    }

    async fn redeemed(&self, order_id: Uuid) -> BookingResult<bool> {
        Ok(self
            .redemptions
            .redemption(order_id)
            .await?
            .map_or(false, |r| r.used_at.is_some()))
    }

    /// Gateway callback. Safe to deliver any number of times.
    pub async fn handle_payment_callback(
        &self,
        callback: &PaymentCallback,
    ) -> BookingResult<TransitionOutcome> {
        if callback.is_success() {
            self.confirm_payment(callback.order_id, callback.record()).await
        } else {
            info!(
                "Payment for order {} declined with code {}",
                callback.order_id, callback.result_code
            );
            self.fail_payment(callback.order_id).await
        }
    }

    pub async fn status(&self, order_id: Uuid) -> BookingResult<OrderView> {
        let order = self.load(order_id).await?;
        let tickets = self.orders.tickets_for(order_id).await?;
        let rules = self.rules.current();
        let timeout = rules.hold_timeout();

        let status_reason = match order.status {
            OrderStatus::Pending if order.hold_lapsed(self.clock.now(), timeout) => Some(
                "Your reservation has expired; the seats are being released".to_string(),
            ),
            OrderStatus::Expired => Some(format!(
                "Your reservation has expired after {} minutes without payment",
                rules.hold_timeout_minutes
            )),
            OrderStatus::Failed => Some("Payment was not completed".to_string()),
            OrderStatus::Cancelled => Some("Order was cancelled".to_string()),
            _ => None,
        };

        Ok(OrderView {
            hold_expires_at: order.hold_expires_at(timeout),
            order,
            tickets,
            status_reason,
        })
    }

    async fn load(&self, order_id: Uuid) -> BookingResult<Order> {
        self.orders
            .get_order(order_id)
            .await?
            .ok_or(BookingError::OrderNotFound(order_id))
    }

    async fn settle_pending(
        &self,
        order_id: Uuid,
        target: OrderStatus,
        payment: Option<PaymentRecord>,
    ) -> BookingResult<TransitionOutcome> {
        let order = self.load(order_id).await?;
        if order.status != OrderStatus::Pending {
            if order.status != target {
                warn!(
                    "Order {} is already {}, ignoring request to move it to {}",
                    order_id, order.status, target
                );
            }
            return Ok(TransitionOutcome::AlreadySettled(order.status));
        }
        self.drive(order, target, payment).await
    }

    /// Compare-and-set from the observed state. A lost race where the status
    /// did not move (only the version did) is retried once against the fresh row.
    async fn drive(
        &self,
        mut order: Order,
        target: OrderStatus,
        payment: Option<PaymentRecord>,
    ) -> BookingResult<TransitionOutcome> {
        for attempt in 0..2 {
            if !order.status.can_transition_to(target) {
                return Ok(TransitionOutcome::AlreadySettled(order.status));
            }

            let transition = StatusTransition {
                order_id: order.id,
                from: order.status,
                to: target,
                expected_version: order.version,
                effect: effect_of(target),
                payment: payment.clone(),
                at: self.clock.now(),
            };

            if let Some(updated) = self.orders.transition_order(&transition).await? {
                info!(
                    "Order {} moved {} -> {} (version {})",
                    updated.id, transition.from, updated.status, updated.version
                );
                self.announce(&updated).await;
                return Ok(TransitionOutcome::Applied(updated));
            }

            let current = self.load(order.id).await?;
            if current.status != transition.from || attempt == 1 {
                warn!(
                    "Order {} settled as {} by another actor before {}",
                    current.id, current.status, target
                );
                return Ok(TransitionOutcome::AlreadySettled(current.status));
            }
            order = current;
        }

        Ok(TransitionOutcome::AlreadySettled(order.status))
    }

    async fn announce(&self, order: &Order) {
        let key = order.id.to_string();
        let timestamp = self.clock.now().timestamp();

        match order.status {
            OrderStatus::Paid => {
                let (transaction_id, amount) = order
                    .payment
                    .as_ref()
                    .map(|p| (p.transaction_id.clone(), p.amount))
                    .unwrap_or_default();
                publish_json(
                    self.publisher.as_ref(),
                    TOPIC_ORDER_PAID,
                    &key,
                    &OrderPaidEvent {
                        order_id: order.id,
                        showtime_id: order.showtime_id,
                        transaction_id,
                        amount,
                        timestamp,
                    },
                )
                .await;
            }
            status if status.releases_seats() => {
                publish_json(
                    self.publisher.as_ref(),
                    TOPIC_ORDER_RELEASED,
                    &key,
                    &OrderReleasedEvent {
                        order_id: order.id,
                        showtime_id: order.showtime_id,
                        seat_ids: order.seat_ids.clone(),
                        reason: status.to_string(),
                        timestamp,
                    },
                )
                .await;
            }
            _ => {}
        }
    }
}

fn already_checked_in() -> BookingError {
    BookingError::Validation("tickets were already checked in".to_string())
}

fn effect_of(target: OrderStatus) -> TransitionEffect {
    match target {
        OrderStatus::Paid => TransitionEffect::ActivateTickets,
        OrderStatus::Failed => TransitionEffect::ReleaseSeats { discard_tickets: true },
        _ => TransitionEffect::ReleaseSeats { discard_tickets: false },
    }
}
