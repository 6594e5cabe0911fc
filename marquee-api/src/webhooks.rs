use axum::{body::Bytes, extract::State, http::HeaderMap, routing::post, Json, Router};
use hmac::{Hmac, Mac};
use marquee_core::payment::PaymentCallback;
use sha2::Sha256;

use crate::error::AppError;
use crate::orders::TransitionResponse;
use crate::state::AppState;

/// Hex HMAC-SHA256 of the raw request body under the shared webhook secret
pub const SIGNATURE_HEADER: &str = "x-payment-signature";

type HmacSha256 = Hmac<Sha256>;

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/webhooks/payments", post(handle_payment_webhook))
}

/// Signature the gateway is expected to send for `body`
pub fn sign_payload(secret: &str, body: &[u8]) -> Result<String, AppError> {
    let mut mac = webhook_mac(secret)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn webhook_mac(secret: &str) -> Result<HmacSha256, AppError> {
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Anyhow(anyhow::anyhow!("webhook secret: {}", e)))
}

fn verify_signature(secret: &str, headers: &HeaderMap, body: &[u8]) -> Result<(), AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::AuthenticationError("Missing payment signature".to_string()))?;
    let signature = hex::decode(signature.trim())
        .map_err(|_| AppError::AuthenticationError("Malformed payment signature".to_string()))?;

    let mut mac = webhook_mac(secret)?;
    mac.update(body);
    mac.verify_slice(&signature)
        .map_err(|_| AppError::AuthenticationError("Payment signature mismatch".to_string()))
}

/// POST /v1/webhooks/payments
/// Payment gateway callback. Always 200 for a known order so gateway retries stop.
async fn handle_payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<TransitionResponse>, AppError> {
    if let Err(e) = verify_signature(&state.auth.payment_webhook_secret, &headers, &body) {
        tracing::warn!("Rejected payment callback: {}", e);
        return Err(e);
    }

    let callback: PaymentCallback = serde_json::from_slice(&body)
        .map_err(|e| AppError::ValidationError(format!("Invalid payment callback: {}", e)))?;

    tracing::info!(
        "Received payment callback for order {} (code {}, transaction {})",
        callback.order_id,
        callback.result_code,
        callback.transaction_id
    );

    let outcome = state.engine.lifecycle.handle_payment_callback(&callback).await?;
    Ok(Json(TransitionResponse::new(callback.order_id, &outcome)))
}
