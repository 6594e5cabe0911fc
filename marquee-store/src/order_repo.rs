use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marquee_core::order::{StatusTransition, TransitionEffect};
use marquee_core::repository::OrderRepository;
use marquee_core::{
    ComboLine, Customer, Order, OrderStatus, PaymentRecord, StoreError, StoreResult, Ticket,
};
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::database::db_err;
use crate::seat_repo::release_held_by;

pub struct StoreOrderRepository {
    pool: PgPool,
}

impl StoreOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const ORDER_COLUMNS: &str = "id, showtime_id, seat_ids, customer, status, voucher_id, combos, idempotency_key, \
     payment_transaction_id, payment_amount, paid_at, version, created_at, updated_at";

// Internal structs for type-safe querying
#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    showtime_id: Uuid,
    seat_ids: Vec<Uuid>,
    customer: Json<Customer>,
    status: String,
    voucher_id: Option<Uuid>,
    combos: Json<Vec<ComboLine>>,
    idempotency_key: Option<String>,
    payment_transaction_id: Option<String>,
    payment_amount: Option<i64>,
    paid_at: Option<DateTime<Utc>>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let status = row.status.parse().map_err(StoreError::Corrupt)?;
        let payment = match (row.payment_transaction_id, row.payment_amount, row.paid_at) {
            (Some(transaction_id), Some(amount), Some(paid_at)) => Some(PaymentRecord {
                transaction_id,
                amount,
                paid_at,
            }),
            _ => None,
        };

        Ok(Order {
            id: row.id,
            showtime_id: row.showtime_id,
            seat_ids: row.seat_ids,
            customer: row.customer.0,
            status,
            voucher_id: row.voucher_id,
            combos: row.combos.0,
            idempotency_key: row.idempotency_key,
            payment,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TicketRow {
    id: Uuid,
    order_id: Uuid,
    showtime_id: Uuid,
    seat_id: Uuid,
    code: String,
    active: bool,
    created_at: DateTime<Utc>,
}

impl From<TicketRow> for Ticket {
    fn from(row: TicketRow) -> Self {
        Ticket {
            id: row.id,
            order_id: row.order_id,
            showtime_id: row.showtime_id,
            seat_id: row.seat_id,
            code: row.code,
            active: row.active,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl OrderRepository for StoreOrderRepository {
    async fn insert_order(&self, order: &Order, tickets: &[Ticket]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, showtime_id, seat_ids, customer, customer_ref, status, voucher_id, combos, idempotency_key, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(order.id)
        .bind(order.showtime_id)
        .bind(&order.seat_ids)
        .bind(Json(&order.customer))
        .bind(order.customer.reference())
        .bind(order.status.as_str())
        .bind(order.voucher_id)
        .bind(Json(&order.combos))
        .bind(order.idempotency_key.as_deref())
        .bind(order.version)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        for ticket in tickets {
            sqlx::query(
                r#"
                INSERT INTO tickets (id, order_id, showtime_id, seat_id, code, active, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(ticket.id)
            .bind(ticket.order_id)
            .bind(ticket.showtime_id)
            .bind(ticket.seat_id)
            .bind(&ticket.code)
            .bind(ticket.active)
            .bind(ticket.created_at)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn claim_idempotency_key(
        &self,
        key: &str,
        order_id: Uuid,
        at: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<Option<Uuid>> {
        // A takeover can race a release; the second pass sees the settled row
        for _ in 0..2 {
            let claimed: Option<Uuid> = sqlx::query_scalar(
                r#"
                INSERT INTO idempotency_keys (key, order_id, claimed_at)
                VALUES ($1, $2, $3)
                ON CONFLICT (key) DO UPDATE
                SET order_id = EXCLUDED.order_id, claimed_at = EXCLUDED.claimed_at
                WHERE idempotency_keys.claimed_at < $4
                  AND NOT EXISTS (SELECT 1 FROM orders o WHERE o.id = idempotency_keys.order_id)
                RETURNING order_id
                "#,
            )
            .bind(key)
            .bind(order_id)
            .bind(at)
            .bind(stale_before)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

            if claimed.is_some() {
                return Ok(None);
            }

            let owner: Option<Uuid> =
                sqlx::query_scalar("SELECT order_id FROM idempotency_keys WHERE key = $1")
                    .bind(key)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(db_err)?;

            match owner {
                Some(owner) if owner == order_id => return Ok(None),
                Some(owner) => return Ok(Some(owner)),
                None => {}
            }
        }

        Err(StoreError::Unavailable(format!(
            "idempotency key {} keeps changing hands",
            key
        )))
    }

    async fn release_idempotency_key(&self, key: &str, order_id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM idempotency_keys WHERE key = $1 AND order_id = $2")
            .bind(key)
            .bind(order_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> StoreResult<Option<Order>> {
        let sql = format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS);
        let row: Option<OrderRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(Order::try_from).transpose()
    }

    async fn find_by_idempotency_key(&self, key: &str) -> StoreResult<Option<Order>> {
        let sql = format!("SELECT {} FROM orders WHERE idempotency_key = $1", ORDER_COLUMNS);
        let row: Option<OrderRow> = sqlx::query_as(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(Order::try_from).transpose()
    }

    async fn tickets_for(&self, order_id: Uuid) -> StoreResult<Vec<Ticket>> {
        let rows: Vec<TicketRow> = sqlx::query_as(
            "SELECT id, order_id, showtime_id, seat_id, code, active, created_at FROM tickets WHERE order_id = $1 ORDER BY created_at, id",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(Ticket::from).collect())
    }

    async fn transition_order(&self, transition: &StatusTransition) -> StoreResult<Option<Order>> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Row lock first so a concurrent mark_used (FOR SHARE) is ordered against us
        let locked: Option<i32> =
            sqlx::query_scalar("SELECT 1 FROM orders WHERE id = $1 FOR UPDATE")
                .bind(transition.order_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?;

        if locked.is_some() && transition.from == OrderStatus::Paid {
            let redeemed: bool = sqlx::query_scalar(
                r#"
                SELECT EXISTS (
                    SELECT 1 FROM redemptions WHERE order_id = $1 AND used_at IS NOT NULL
                )
                "#,
            )
            .bind(transition.order_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;

            if redeemed {
                tx.rollback().await.map_err(db_err)?;
                debug!("Order {} already checked in; staying Paid", transition.order_id);
                return Ok(None);
            }
        }

        let payment = transition.payment.as_ref();
        let sql = format!(
            r#"
            UPDATE orders
            SET status = $1, version = version + 1, updated_at = $2,
                payment_transaction_id = COALESCE($3, payment_transaction_id),
                payment_amount = COALESCE($4, payment_amount),
                paid_at = COALESCE($5, paid_at)
            WHERE id = $6 AND status = $7 AND version = $8
            RETURNING {}
            "#,
            ORDER_COLUMNS
        );

        let row: Option<OrderRow> = sqlx::query_as(&sql)
            .bind(transition.to.as_str())
            .bind(transition.at)
            .bind(payment.map(|p| p.transaction_id.clone()))
            .bind(payment.map(|p| p.amount))
            .bind(payment.map(|p| p.paid_at))
            .bind(transition.order_id)
            .bind(transition.from.as_str())
            .bind(transition.expected_version)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;

        let Some(row) = row else {
            tx.rollback().await.map_err(db_err)?;
            debug!(
                "Compare-and-set lost for order {} ({} -> {})",
                transition.order_id, transition.from, transition.to
            );
            return Ok(None);
        };

        match transition.effect {
            TransitionEffect::ActivateTickets => {
                sqlx::query("UPDATE tickets SET active = TRUE WHERE order_id = $1")
                    .bind(transition.order_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;
            }
            TransitionEffect::ReleaseSeats { discard_tickets } => {
                release_held_by(&mut *tx, transition.order_id, transition.at)
                    .await
                    .map_err(db_err)?;

                let sql = if discard_tickets {
                    "DELETE FROM tickets WHERE order_id = $1"
                } else {
                    "UPDATE tickets SET active = FALSE WHERE order_id = $1"
                };
                sqlx::query(sql)
                    .bind(transition.order_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;
            }
        }

        tx.commit().await.map_err(db_err)?;
        Order::try_from(row).map(Some)
    }

    async fn pending_created_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Order>> {
        let sql = format!(
            "SELECT {} FROM orders WHERE status = 'PENDING' AND created_at < $1 ORDER BY created_at LIMIT $2",
            ORDER_COLUMNS
        );
        let rows: Vec<OrderRow> = sqlx::query_as(&sql)
            .bind(cutoff)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.into_iter().map(Order::try_from).collect()
    }

    async fn purge_terminal_orders(&self, updated_before: DateTime<Utc>) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let purged: Vec<Uuid> = sqlx::query_scalar(
            r#"
            DELETE FROM orders
            WHERE status IN ('EXPIRED', 'FAILED', 'CANCELLED') AND updated_at < $1
            RETURNING id
            "#,
        )
        .bind(updated_before)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query("DELETE FROM redemptions WHERE order_id = ANY($1)")
            .bind(&purged)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        sqlx::query("DELETE FROM idempotency_keys WHERE order_id = ANY($1)")
            .bind(&purged)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(purged.len() as u64)
    }

    async fn purge_orphan_tickets(&self) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM tickets t
            WHERE NOT EXISTS (SELECT 1 FROM orders o WHERE o.id = t.order_id)
               OR (t.active = FALSE AND EXISTS (
                   SELECT 1 FROM orders o
                   WHERE o.id = t.order_id AND o.status IN ('EXPIRED', 'FAILED', 'CANCELLED')
               ))
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected())
    }
}
