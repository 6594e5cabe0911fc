use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marquee_core::repository::{RedemptionRecord, RedemptionRepository};
use marquee_core::{StoreError, StoreResult};
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::db_err;

pub struct StoreRedemptionRepository {
    pool: PgPool,
}

impl StoreRedemptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct RedemptionRow {
    order_id: Uuid,
    nonce: String,
    issued_at: DateTime<Utc>,
    used_at: Option<DateTime<Utc>>,
}

#[async_trait]
impl RedemptionRepository for StoreRedemptionRepository {
    async fn record_issue(
        &self,
        order_id: Uuid,
        nonce: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO redemptions (order_id, nonce, issued_at, used_at)
            VALUES ($1, $2, $3, NULL)
            ON CONFLICT (order_id) DO UPDATE
            SET nonce = EXCLUDED.nonce, issued_at = EXCLUDED.issued_at
            WHERE redemptions.used_at IS NULL
            "#,
        )
        .bind(order_id)
        .bind(nonce)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Duplicate(format!("order {} already redeemed", order_id)));
        }
        Ok(())
    }

    async fn redemption(&self, order_id: Uuid) -> StoreResult<Option<RedemptionRecord>> {
        let row: Option<RedemptionRow> = sqlx::query_as(
            "SELECT order_id, nonce, issued_at, used_at FROM redemptions WHERE order_id = $1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(|r| RedemptionRecord {
            order_id: r.order_id,
            nonce: r.nonce,
            issued_at: r.issued_at,
            used_at: r.used_at,
        }))
    }

    async fn mark_used(&self, order_id: Uuid, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Blocks a concurrent cancel/refund (FOR UPDATE) until we commit
        let paid: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM orders WHERE id = $1 AND status = 'PAID' FOR SHARE",
        )
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        if paid.is_none() {
            tx.rollback().await.map_err(db_err)?;
            return Ok(false);
        }

        let result = sqlx::query(
            r#"
            UPDATE redemptions SET used_at = $2
            WHERE order_id = $1 AND used_at IS NULL
            "#,
        )
        .bind(order_id)
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }
}
