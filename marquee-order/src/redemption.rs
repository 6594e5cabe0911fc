use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use marquee_core::events::{publish_json, EventPublisher};
use marquee_core::repository::{OrderRepository, RedemptionRepository, ShowtimeCatalog};
use marquee_core::{
    BookingError, BookingResult, Clock, Order, OrderStatus, RulesHolder, StoreError, Ticket,
};
use marquee_shared::models::events::{OrderRedeemedEvent, TOPIC_ORDER_REDEEMED};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const NONCE_BYTES: usize = 16;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenKind {
    TicketsOnly,
    TicketsAndCombo,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::TicketsOnly => "TICKETS_ONLY",
            TokenKind::TicketsAndCombo => "TICKETS_AND_COMBO",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signed proof of entry for a paid order, rendered as a QR code
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionToken {
    pub order_id: Uuid,
    pub kind: TokenKind,
    pub expires_at: DateTime<Utc>,
    pub nonce: String,
    pub signature: String,
}

impl RedemptionToken {
    fn canonical(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.order_id,
            self.kind,
            self.expires_at.timestamp_millis(),
            self.nonce
        )
    }
}

/// Door-scanner answer. Never an error for a bad token.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub is_valid: bool,
    pub is_expired: bool,
    pub is_used: bool,
    pub error_message: Option<String>,
    pub order_id: Option<Uuid>,
    pub kind: Option<TokenKind>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionReceipt {
    pub order_id: Uuid,
    pub kind: TokenKind,
    pub tickets: Vec<Ticket>,
    pub redeemed_at: DateTime<Utc>,
}

pub struct RedemptionTokenService {
    orders: Arc<dyn OrderRepository>,
    redemptions: Arc<dyn RedemptionRepository>,
    catalog: Arc<dyn ShowtimeCatalog>,
    publisher: Arc<dyn EventPublisher>,
    rules: RulesHolder,
    clock: Arc<dyn Clock>,
    mac: HmacSha256,
}

impl RedemptionTokenService {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        redemptions: Arc<dyn RedemptionRepository>,
        catalog: Arc<dyn ShowtimeCatalog>,
        publisher: Arc<dyn EventPublisher>,
        rules: RulesHolder,
        clock: Arc<dyn Clock>,
        signing_secret: &[u8],
    ) -> BookingResult<Self> {
        if signing_secret.is_empty() {
            return Err(BookingError::Validation(
                "redemption signing secret must not be empty".to_string(),
            ));
        }
        let mac = HmacSha256::new_from_slice(signing_secret)
            .map_err(|e| BookingError::Validation(format!("redemption signing secret: {}", e)))?;

        Ok(Self {
            orders,
            redemptions,
            catalog,
            publisher,
            rules,
            clock,
            mac,
        })
    }

    /// Issue a fresh token for a paid order. Any earlier token stops verifying.
    pub async fn issue(&self, order_id: Uuid) -> BookingResult<RedemptionToken> {
        let order = self.load(order_id).await?;
        if order.status != OrderStatus::Paid {
            return Err(BookingError::Validation(format!(
                "order {} is {}, only paid orders get a redemption token",
                order_id, order.status
            )));
        }

        let showtime = self
            .catalog
            .showtime(order.showtime_id)
            .await?
            .ok_or(BookingError::ShowtimeNotFound(order.showtime_id))?;

        let mut nonce = [0u8; NONCE_BYTES];
        rand::thread_rng().fill_bytes(&mut nonce);

        let mut token = RedemptionToken {
            order_id,
            kind: kind_for(&order),
            expires_at: showtime.starts_at + self.rules.current().redemption_grace(),
            nonce: hex::encode(nonce),
            signature: String::new(),
        };
        token.signature = self.sign(&token);

        match self
            .redemptions
            .record_issue(order_id, &token.nonce, self.clock.now())
            .await
        {
            Ok(()) => {}
            Err(StoreError::Duplicate(_)) => return Err(BookingError::TokenAlreadyUsed),
            Err(e) => return Err(e.into()),
        }

        info!("Issued {} redemption token for order {}", token.kind, order_id);
        Ok(token)
    }

    pub fn encode(&self, token: &RedemptionToken) -> BookingResult<String> {
        serde_json::to_string(token)
            .map_err(|e| BookingError::Validation(format!("token encoding failed: {}", e)))
    }

    pub fn decode(&self, payload: &str) -> BookingResult<RedemptionToken> {
        serde_json::from_str(payload)
            .map_err(|_| BookingError::TokenInvalid("malformed payload".to_string()))
    }

    /// Check a scanned payload without consuming it
    pub async fn verify(&self, payload: &str) -> BookingResult<VerificationResult> {
        let token = self.decode(payload).ok();
        let mut result = VerificationResult {
            order_id: token.as_ref().map(|t| t.order_id),
            kind: token.as_ref().map(|t| t.kind),
            ..Default::default()
        };

        match self.check(payload).await {
            Ok(_) => result.is_valid = true,
            Err(BookingError::TokenExpired) => {
                result.is_expired = true;
                result.error_message = Some(BookingError::TokenExpired.to_string());
            }
            Err(BookingError::TokenAlreadyUsed) => {
                result.is_used = true;
                result.error_message = Some(BookingError::TokenAlreadyUsed.to_string());
            }
            Err(BookingError::TokenInvalid(reason)) => result.error_message = Some(reason),
            Err(e) => return Err(e),
        }
        Ok(result)
    }

    /// Compare-and-set unused -> used while the order is Paid. Exactly one
    /// caller gets `true`.
    pub async fn mark_used(&self, order_id: Uuid) -> BookingResult<bool> {
        Ok(self.redemptions.mark_used(order_id, self.clock.now()).await?)
    }

    /// Verify and consume in one step, for the door scanner
    pub async fn redeem(&self, payload: &str) -> BookingResult<RedemptionReceipt> {
        let (token, order) = self.check(payload).await?;

        let redeemed_at = self.clock.now();
        if !self.mark_used(order.id).await? {
            // Lost either to another scan or to a cancellation that got in first
            let current = self
                .orders
                .get_order(order.id)
                .await?
                .ok_or(BookingError::OrderNotFound(order.id))?;
            if current.status != OrderStatus::Paid {
                warn!("Check-in for order {} refused: now {}", order.id, current.status);
                return Err(BookingError::TokenInvalid(format!("order is {}", current.status)));
            }
            warn!("Second check-in attempt for order {}", order.id);
            return Err(BookingError::TokenAlreadyUsed);
        }

        let tickets = self.orders.tickets_for(order.id).await?;
        info!("Order {} checked in ({})", order.id, token.kind);

        publish_json(
            self.publisher.as_ref(),
            TOPIC_ORDER_REDEEMED,
            &order.id.to_string(),
            &OrderRedeemedEvent {
                order_id: order.id,
                kind: token.kind.to_string(),
                timestamp: redeemed_at.timestamp(),
            },
        )
        .await;

        Ok(RedemptionReceipt {
            order_id: order.id,
            kind: token.kind,
            tickets: tickets.into_iter().filter(|t| t.active).collect(),
            redeemed_at,
        })
    }

    async fn check(&self, payload: &str) -> BookingResult<(RedemptionToken, Order)> {
        let token = self.decode(payload)?;

        let signature = hex::decode(&token.signature)
            .map_err(|_| BookingError::TokenInvalid("signature is not hex".to_string()))?;
        let mut mac = self.mac.clone();
        mac.update(token.canonical().as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| BookingError::TokenInvalid("signature mismatch".to_string()))?;

        let record = self
            .redemptions
            .redemption(token.order_id)
            .await?
            .ok_or_else(|| BookingError::TokenInvalid("token was never issued".to_string()))?;

        let order = self
            .orders
            .get_order(token.order_id)
            .await?
            .ok_or_else(|| BookingError::TokenInvalid("order no longer exists".to_string()))?;
        if order.status != OrderStatus::Paid {
            return Err(BookingError::TokenInvalid(format!("order is {}", order.status)));
        }

        if record.used_at.is_some() {
            return Err(BookingError::TokenAlreadyUsed);
        }
        if record.nonce != token.nonce {
            return Err(BookingError::TokenInvalid(
                "token was superseded by a newer one".to_string(),
            ));
        }
        if self.clock.now() > token.expires_at {
            return Err(BookingError::TokenExpired);
        }

        Ok((token, order))
    }

    async fn load(&self, order_id: Uuid) -> BookingResult<Order> {
        self.orders
            .get_order(order_id)
            .await?
            .ok_or(BookingError::OrderNotFound(order_id))
    }

    fn sign(&self, token: &RedemptionToken) -> String {
        let mut mac = self.mac.clone();
        mac.update(token.canonical().as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

fn kind_for(order: &Order) -> TokenKind {
    if order.has_combos() {
        TokenKind::TicketsAndCombo
    } else {
        TokenKind::TicketsOnly
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use marquee_core::events::NoopPublisher;
    use marquee_core::{ComboLine, Customer, ManualClock, PaymentRecord, Showtime};
    use marquee_store::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        service: RedemptionTokenService,
        showtime: Showtime,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let clock = Arc::new(ManualClock::new(now));
        let showtime = Showtime {
            id: Uuid::new_v4(),
            movie_id: Uuid::new_v4(),
            room_id: Uuid::new_v4(),
            starts_at: now + Duration::hours(2),
            ends_at: now + Duration::hours(4),
        };
        store.insert_showtime(showtime.clone()).await;

        let service = RedemptionTokenService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(NoopPublisher),
            RulesHolder::default(),
            clock.clone(),
            b"door-secret",
        )
        .unwrap();

        Fixture { store, clock, service, showtime }
    }

    async fn order(f: &Fixture, status: OrderStatus, combos: Vec<ComboLine>) -> Order {
        let mut order = Order::pending(
            Uuid::new_v4(),
            f.showtime.id,
            vec![Uuid::new_v4()],
            Customer::Registered { user_id: "u-3".to_string() },
            None,
            combos,
            None,
            f.clock.now(),
        );
        order.status = status;
        order.payment = Some(PaymentRecord {
            transaction_id: "TXN-9".to_string(),
            amount: 120_000,
            paid_at: f.clock.now(),
        });
        f.store.insert_order(&order, &[]).await.unwrap();
        order
    }

    #[tokio::test]
    async fn test_issue_requires_paid_order() {
        let f = fixture().await;
        let pending = order(&f, OrderStatus::Pending, vec![]).await;
        assert!(matches!(
            f.service.issue(pending.id).await,
            Err(BookingError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_kind_and_expiry() {
        let f = fixture().await;
        let combo = ComboLine { combo_id: Uuid::new_v4(), quantity: 1 };
        let paid = order(&f, OrderStatus::Paid, vec![combo]).await;

        let token = f.service.issue(paid.id).await.unwrap();
        assert_eq!(token.kind, TokenKind::TicketsAndCombo);
        assert_eq!(token.expires_at, f.showtime.starts_at + Duration::minutes(30));
        assert_eq!(token.nonce.len(), NONCE_BYTES * 2);
    }

    #[tokio::test]
    async fn test_verify_then_redeem_once() {
        let f = fixture().await;
        let paid = order(&f, OrderStatus::Paid, vec![]).await;
        let payload = f.service.encode(&f.service.issue(paid.id).await.unwrap()).unwrap();

        let result = f.service.verify(&payload).await.unwrap();
        assert!(result.is_valid);
        assert_eq!(result.kind, Some(TokenKind::TicketsOnly));

        f.service.redeem(&payload).await.unwrap();
        assert!(matches!(
            f.service.redeem(&payload).await,
            Err(BookingError::TokenAlreadyUsed)
        ));

        let result = f.service.verify(&payload).await.unwrap();
        assert!(!result.is_valid);
        assert!(result.is_used);
        assert_eq!(result.error_message.as_deref(), Some("Ticket already checked in"));
    }

    #[tokio::test]
    async fn test_tampered_token_rejected() {
        let f = fixture().await;
        let paid = order(&f, OrderStatus::Paid, vec![]).await;
        let mut token = f.service.issue(paid.id).await.unwrap();
        token.kind = TokenKind::TicketsAndCombo;

        let result = f.service.verify(&f.service.encode(&token).unwrap()).await.unwrap();
        assert!(!result.is_valid);
        assert_eq!(result.error_message.as_deref(), Some("signature mismatch"));

        let result = f.service.verify("{not json").await.unwrap();
        assert!(!result.is_valid);
        assert_eq!(result.order_id, None);
    }

    #[tokio::test]
    async fn test_forged_with_other_secret_rejected() {
        let f = fixture().await;
        let paid = order(&f, OrderStatus::Paid, vec![]).await;
        let genuine = f.service.issue(paid.id).await.unwrap();

        let forger = RedemptionTokenService::new(
            f.store.clone(),
            f.store.clone(),
            f.store.clone(),
            Arc::new(NoopPublisher),
            RulesHolder::default(),
            f.clock.clone(),
            b"guessed-secret",
        )
        .unwrap();
        let mut forged = genuine.clone();
        forged.signature = forger.sign(&forged);

        let result = f.service.verify(&f.service.encode(&forged).unwrap()).await.unwrap();
        assert!(!result.is_valid);
    }

    #[tokio::test]
    async fn test_reissue_supersedes_previous_token() {
        let f = fixture().await;
        let paid = order(&f, OrderStatus::Paid, vec![]).await;
        let first = f.service.encode(&f.service.issue(paid.id).await.unwrap()).unwrap();
        let second = f.service.encode(&f.service.issue(paid.id).await.unwrap()).unwrap();

        assert!(!f.service.verify(&first).await.unwrap().is_valid);
        assert!(f.service.verify(&second).await.unwrap().is_valid);
    }

    #[tokio::test]
    async fn test_expired_token() {
        let f = fixture().await;
        let paid = order(&f, OrderStatus::Paid, vec![]).await;
        let payload = f.service.encode(&f.service.issue(paid.id).await.unwrap()).unwrap();

        f.clock.advance(Duration::hours(2) + Duration::minutes(31));
        let result = f.service.verify(&payload).await.unwrap();
        assert!(result.is_expired);
        assert!(matches!(
            f.service.redeem(&payload).await,
            Err(BookingError::TokenExpired)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_mark_used_single_winner() {
        let f = fixture().await;
        let paid = order(&f, OrderStatus::Paid, vec![]).await;
        f.service.issue(paid.id).await.unwrap();

        let service = Arc::new(f.service);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move { service.mark_used(paid.id).await.unwrap() })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_empty_secret_refused() {
        let f = fixture().await;
        let result = RedemptionTokenService::new(
            f.store.clone(),
            f.store.clone(),
            f.store.clone(),
            Arc::new(NoopPublisher),
            RulesHolder::default(),
            f.clock.clone(),
            b"",
        );
        assert!(result.is_err());
    }
}
