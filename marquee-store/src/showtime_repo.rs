use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marquee_core::repository::ShowtimeCatalog;
use marquee_core::{Showtime, StoreResult};
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::db_err;

/// Read-only access to the catalog's `showtimes` table
pub struct StoreShowtimeCatalog {
    pool: PgPool,
}

impl StoreShowtimeCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ShowtimeRow {
    id: Uuid,
    movie_id: Uuid,
    room_id: Uuid,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
}

impl From<ShowtimeRow> for Showtime {
    fn from(row: ShowtimeRow) -> Self {
        Showtime {
            id: row.id,
            movie_id: row.movie_id,
            room_id: row.room_id,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
        }
    }
}

#[async_trait]
impl ShowtimeCatalog for StoreShowtimeCatalog {
    async fn showtime(&self, id: Uuid) -> StoreResult<Option<Showtime>> {
        let row: Option<ShowtimeRow> = sqlx::query_as(
            "SELECT id, movie_id, room_id, starts_at, ends_at FROM showtimes WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(Showtime::from))
    }

    async fn room_showtimes(
        &self,
        room_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Showtime>> {
        let rows: Vec<ShowtimeRow> = sqlx::query_as(
            r#"
            SELECT id, movie_id, room_id, starts_at, ends_at FROM showtimes
            WHERE room_id = $1 AND ends_at > $2 AND starts_at < $3
            ORDER BY starts_at
            "#,
        )
        .bind(room_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(Showtime::from).collect())
    }
}
