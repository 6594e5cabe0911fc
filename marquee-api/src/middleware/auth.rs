use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::state::AppState;

pub const ROLE_STAFF: &str = "STAFF";
pub const ROLE_ADMIN: &str = "ADMIN";

/// Claims of tokens issued by the identity provider to box-office and door staff
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StaffClaims {
    pub sub: String,
    pub role: String,
    pub cinema_id: Option<String>,
    pub exp: usize,
}

fn decode_claims(
    state: &AppState,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
) -> Result<StaffClaims, AppError> {
    let TypedHeader(Authorization(bearer)) = bearer
        .ok_or_else(|| AppError::AuthenticationError("Missing bearer token".to_string()))?;

    let token_data = decode::<StaffClaims>(
        bearer.token(),
        &DecodingKey::from_secret(state.auth.secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| {
        tracing::debug!("Rejected staff token: {}", e);
        AppError::AuthenticationError("Invalid or expired token".to_string())
    })?;

    Ok(token_data.claims)
}

/// Door scanners and box office: STAFF or ADMIN
pub async fn staff_auth_middleware(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let claims = decode_claims(&state, bearer)?;

    if claims.role != ROLE_STAFF && claims.role != ROLE_ADMIN {
        return Err(AppError::AuthorizationError(format!(
            "Role {} may not use staff endpoints",
            claims.role
        )));
    }

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Job triggers for the external scheduler: ADMIN only
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let claims = decode_claims(&state, bearer)?;

    if claims.role != ROLE_ADMIN {
        return Err(AppError::AuthorizationError(format!(
            "Role {} may not trigger jobs",
            claims.role
        )));
    }

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
