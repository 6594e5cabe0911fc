use axum::{extract::State, middleware, routing::post, Extension, Json, Router};
use marquee_order::{RedemptionReceipt, VerificationResult};
use serde::Deserialize;

use crate::error::AppError;
use crate::middleware::{staff_auth_middleware, StaffClaims};
use crate::state::AppState;

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/v1/redemptions/verify", post(verify))
        .route("/v1/redemptions/redeem", post(redeem))
        .route_layer(middleware::from_fn_with_state(state, staff_auth_middleware))
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    /// Raw QR payload
    pub payload: String,
}

/// POST /v1/redemptions/verify
async fn verify(
    State(state): State<AppState>,
    Json(scan): Json<ScanRequest>,
) -> Result<Json<VerificationResult>, AppError> {
    Ok(Json(state.engine.redemption.verify(&scan.payload).await?))
}

/// POST /v1/redemptions/redeem
async fn redeem(
    State(state): State<AppState>,
    Extension(claims): Extension<StaffClaims>,
    Json(scan): Json<ScanRequest>,
) -> Result<Json<RedemptionReceipt>, AppError> {
    let receipt = state.engine.redemption.redeem(&scan.payload).await?;
    tracing::info!("Order {} checked in by {}", receipt.order_id, claims.sub);
    Ok(Json(receipt))
}
