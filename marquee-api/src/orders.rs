use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use marquee_core::{OrderStatus, PaymentRecord};
use marquee_order::{RedemptionToken, TransitionOutcome};
use serde::Serialize;
use uuid::Uuid;

use crate::checkout::TicketResponse;
use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/orders/{id}", get(get_order))
        .route("/v1/orders/{id}/cancel", post(cancel_order))
        .route("/v1/orders/{id}/redemption-token", post(issue_redemption_token))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub id: Uuid,
    pub showtime_id: Uuid,
    pub status: OrderStatus,
    pub seat_ids: Vec<Uuid>,
    pub hold_expires_at: DateTime<Utc>,
    pub status_reason: Option<String>,
    pub payment: Option<PaymentRecord>,
    pub tickets: Vec<TicketResponse>,
    pub created_at: DateTime<Utc>,
}

/// Status after a transition request, whether or not this call made the change
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionResponse {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub applied: bool,
}

impl TransitionResponse {
    pub fn new(order_id: Uuid, outcome: &TransitionOutcome) -> Self {
        Self {
            order_id,
            status: outcome.status(),
            applied: outcome.applied(),
        }
    }
}

/// GET /v1/orders/{id}
async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderResponse>, AppError> {
    let view = state.engine.lifecycle.status(order_id).await?;

    Ok(Json(OrderResponse {
        id: view.order.id,
        showtime_id: view.order.showtime_id,
        status: view.order.status,
        seat_ids: view.order.seat_ids,
        hold_expires_at: view.hold_expires_at,
        status_reason: view.status_reason,
        payment: view.order.payment,
        tickets: view.tickets.into_iter().map(TicketResponse::from).collect(),
        created_at: view.order.created_at,
    }))
}

/// POST /v1/orders/{id}/cancel
async fn cancel_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<TransitionResponse>, AppError> {
    let outcome = state.engine.lifecycle.cancel(order_id).await?;
    Ok(Json(TransitionResponse::new(order_id, &outcome)))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionTokenResponse {
    pub token: RedemptionToken,
    /// What goes into the QR code
    pub payload: String,
}

/// POST /v1/orders/{id}/redemption-token
async fn issue_redemption_token(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<RedemptionTokenResponse>, AppError> {
    let token = state.engine.redemption.issue(order_id).await?;
    let payload = state.engine.redemption.encode(&token)?;
    Ok(Json(RedemptionTokenResponse { token, payload }))
}
