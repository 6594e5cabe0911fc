use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marquee_core::repository::SeatLedgerRepository;
use marquee_core::{ClaimResult, SeatClaim, SeatHold, StoreResult};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::database::db_err;

pub struct StoreSeatLedgerRepository {
    pool: PgPool,
}

impl StoreSeatLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct SeatHoldRow {
    showtime_id: Uuid,
    seat_id: Uuid,
    available: bool,
    version: i64,
    order_id: Option<Uuid>,
    updated_at: DateTime<Utc>,
}

impl From<SeatHoldRow> for SeatHold {
    fn from(row: SeatHoldRow) -> Self {
        SeatHold {
            showtime_id: row.showtime_id,
            seat_id: row.seat_id,
            available: row.available,
            version: row.version,
            order_id: row.order_id,
            updated_at: row.updated_at,
        }
    }
}

/// Release every seat held by an order. Runs inside the caller's transaction so
/// status changes and seat release commit together.
pub(crate) async fn release_held_by(
    conn: &mut PgConnection,
    order_id: Uuid,
    at: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE seat_holds
        SET available = TRUE, order_id = NULL, version = version + 1, updated_at = $2
        WHERE order_id = $1 AND available = FALSE
        "#,
    )
    .bind(order_id)
    .bind(at)
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

#[async_trait]
impl SeatLedgerRepository for StoreSeatLedgerRepository {
    async fn open_seat_holds(
        &self,
        showtime_id: Uuid,
        seat_ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let result = sqlx::query(
            r#"
            INSERT INTO seat_holds (showtime_id, seat_id, available, version, order_id, updated_at)
            SELECT $1, seat_id, TRUE, 0, NULL, $3 FROM UNNEST($2::uuid[]) AS seat_id
            ON CONFLICT (showtime_id, seat_id) DO NOTHING
            "#,
        )
        .bind(showtime_id)
        .bind(seat_ids.to_vec())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() as usize)
    }

    async fn seat_holds(&self, showtime_id: Uuid) -> StoreResult<Vec<SeatHold>> {
        let rows: Vec<SeatHoldRow> = sqlx::query_as(
            "SELECT showtime_id, seat_id, available, version, order_id, updated_at FROM seat_holds WHERE showtime_id = $1 ORDER BY seat_id",
        )
        .bind(showtime_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(SeatHold::from).collect())
    }

    async fn claim_seats(
        &self,
        showtime_id: Uuid,
        claims: &[SeatClaim],
        holder: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<ClaimResult> {
        // Fixed row order so two overlapping claims cannot deadlock each other
        let mut ordered = claims.to_vec();
        ordered.sort_by_key(|c| c.seat_id);

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut claimed = Vec::with_capacity(ordered.len());
        let mut failed = Vec::new();

        for claim in &ordered {
            let row: Option<SeatHoldRow> = sqlx::query_as(
                r#"
                UPDATE seat_holds
                SET available = FALSE, order_id = $3, version = version + 1, updated_at = $4
                WHERE showtime_id = $1 AND seat_id = $2 AND available = TRUE
                  AND ($5::BIGINT IS NULL OR version = $5)
                RETURNING showtime_id, seat_id, available, version, order_id, updated_at
                "#,
            )
            .bind(showtime_id)
            .bind(claim.seat_id)
            .bind(holder)
            .bind(at)
            .bind(claim.expected_version)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;

            match row {
                Some(row) => claimed.push(SeatHold::from(row)),
                None => failed.push(claim.seat_id),
            }
        }

        if failed.is_empty() {
            tx.commit().await.map_err(db_err)?;
            return Ok(ClaimResult::Claimed(claimed));
        }

        let existing: Vec<Uuid> = sqlx::query_scalar(
            "SELECT seat_id FROM seat_holds WHERE showtime_id = $1 AND seat_id = ANY($2)",
        )
        .bind(showtime_id)
        .bind(failed.clone())
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.rollback().await.map_err(db_err)?;

        let missing: Vec<Uuid> = failed
            .iter()
            .filter(|id| !existing.contains(id))
            .copied()
            .collect();

        if missing.is_empty() {
            Ok(ClaimResult::Conflict { unavailable: failed })
        } else {
            Ok(ClaimResult::NotFound { missing })
        }
    }

    async fn release_seats(
        &self,
        showtime_id: Uuid,
        seat_ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> StoreResult<Vec<Uuid>> {
        let released: Vec<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE seat_holds
            SET available = TRUE, order_id = NULL, version = version + 1, updated_at = $3
            WHERE showtime_id = $1 AND seat_id = ANY($2) AND available = FALSE
            RETURNING seat_id
            "#,
        )
        .bind(showtime_id)
        .bind(seat_ids.to_vec())
        .bind(at)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(released)
    }

    async fn seats_held_by(&self, order_id: Uuid) -> StoreResult<Vec<SeatHold>> {
        let rows: Vec<SeatHoldRow> = sqlx::query_as(
            "SELECT showtime_id, seat_id, available, version, order_id, updated_at FROM seat_holds WHERE order_id = $1 ORDER BY seat_id",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(SeatHold::from).collect())
    }

    async fn release_orphan_holds(
        &self,
        stale_before: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE seat_holds h
            SET available = TRUE, order_id = NULL, version = h.version + 1, updated_at = $2
            WHERE h.available = FALSE
              AND h.updated_at < $1
              AND NOT EXISTS (
                  SELECT 1 FROM orders o
                  WHERE o.id = h.order_id AND o.status IN ('PENDING', 'PAID')
              )
            "#,
        )
        .bind(stale_before)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected())
    }
}
