use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use marquee_core::{OrderStatus, Ticket};
use marquee_order::CheckoutRequest;
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/checkout", post(checkout))
        .route("/v1/showtimes/{id}/seats", get(seat_map))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketResponse {
    pub id: Uuid,
    pub seat_id: Uuid,
    pub code: String,
    pub active: bool,
}

impl From<Ticket> for TicketResponse {
    fn from(ticket: Ticket) -> Self {
        Self {
            id: ticket.id,
            seat_id: ticket.seat_id,
            code: ticket.code,
            active: ticket.active,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub hold_expires_at: DateTime<Utc>,
    pub tickets: Vec<TicketResponse>,
}

/// POST /v1/checkout
/// Hold seats for a new Pending order. A retried request with the same
/// idempotency key answers 200 with the original order.
async fn checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutResponse>), AppError> {
    let header_key = match headers.get(IDEMPOTENCY_KEY_HEADER) {
        Some(value) => Some(
            value
                .to_str()
                .map_err(|_| {
                    AppError::ValidationError("Idempotency-Key must be ASCII".to_string())
                })?
                .to_string(),
        ),
        None => None,
    };

    match (&request.idempotency_key, header_key) {
        (Some(body_key), Some(header_key)) if body_key != &header_key => {
            return Err(AppError::ValidationError(
                "Idempotency-Key header and body disagree".to_string(),
            ));
        }
        (None, Some(header_key)) => request.idempotency_key = Some(header_key),
        _ => {}
    }

    let reservation = state.engine.reservations.reserve(request).await?;
    let status = if reservation.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };

    Ok((
        status,
        Json(CheckoutResponse {
            order_id: reservation.order.id,
            status: reservation.order.status,
            hold_expires_at: reservation.hold_expires_at,
            tickets: reservation.tickets.into_iter().map(TicketResponse::from).collect(),
        }),
    ))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatStateResponse {
    pub seat_id: Uuid,
    pub available: bool,
    pub version: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatMapResponse {
    pub showtime_id: Uuid,
    pub read_at: DateTime<Utc>,
    pub available_count: usize,
    pub seats: Vec<SeatStateResponse>,
}

/// GET /v1/showtimes/{id}/seats
async fn seat_map(
    State(state): State<AppState>,
    Path(showtime_id): Path<Uuid>,
) -> Result<Json<SeatMapResponse>, AppError> {
    let snapshot = state.engine.ledger.list_availability(showtime_id).await?;

    Ok(Json(SeatMapResponse {
        showtime_id: snapshot.showtime_id,
        read_at: snapshot.read_at,
        available_count: snapshot.seats.len() - snapshot.held_count(),
        seats: snapshot
            .seats
            .into_iter()
            .map(|s| SeatStateResponse {
                seat_id: s.seat_id,
                available: s.available,
                version: s.version,
            })
            .collect(),
    }))
}
