use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use marquee_core::BookingError;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    AuthenticationError(String),
    #[error("{0}")]
    AuthorizationError(String),
    #[error("{0}")]
    ValidationError(String),
    #[error("{0}")]
    NotFoundError(String),
    #[error("{0}")]
    ConflictError(String),
    #[error("Seats no longer available")]
    SeatConflict(Vec<Uuid>),
    #[error("{0}")]
    GoneError(String),
    #[error("{0}")]
    UnprocessableError(String),
    #[error("{0}")]
    ServiceUnavailable(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::SeatConflict { unavailable } => AppError::SeatConflict(unavailable),
            BookingError::SeatNotFound(_)
            | BookingError::ShowtimeNotFound(_)
            | BookingError::OrderNotFound(_) => AppError::NotFoundError(err.to_string()),
            BookingError::ShowtimeNotSellable(_) | BookingError::Validation(_) => {
                AppError::ValidationError(err.to_string())
            }
            BookingError::InvalidTransition { .. } | BookingError::TokenAlreadyUsed => {
                AppError::ConflictError(err.to_string())
            }
            BookingError::TokenExpired => AppError::GoneError(err.to_string()),
            BookingError::TokenInvalid(_) => AppError::UnprocessableError(err.to_string()),
            BookingError::UpstreamUnavailable(msg) => AppError::ServiceUnavailable(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::AuthenticationError(msg) => {
                (StatusCode::UNAUTHORIZED, json!({ "error": msg }))
            }
            AppError::AuthorizationError(msg) => (StatusCode::FORBIDDEN, json!({ "error": msg })),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            AppError::ConflictError(msg) => (StatusCode::CONFLICT, json!({ "error": msg })),
            AppError::SeatConflict(unavailable) => (
                StatusCode::CONFLICT,
                json!({
                    "error": "SeatConflict",
                    "unavailableSeatIds": unavailable,
                }),
            ),
            AppError::GoneError(msg) => (StatusCode::GONE, json!({ "error": msg })),
            AppError::UnprocessableError(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, json!({ "error": msg }))
            }
            AppError::ServiceUnavailable(msg) => {
                tracing::error!("Upstream unavailable: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    json!({ "error": "Service temporarily unavailable" }),
                )
            }
            AppError::Anyhow(err) => {
                tracing::error!("Internal Server Error: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "Internal Server Error" }))
            }
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marquee_core::OrderStatus;

    fn status_of(err: BookingError) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn test_booking_error_status_mapping() {
        assert_eq!(
            status_of(BookingError::SeatConflict { unavailable: vec![] }),
            StatusCode::CONFLICT
        );
        assert_eq!(status_of(BookingError::OrderNotFound(Uuid::nil())), StatusCode::NOT_FOUND);
        assert_eq!(status_of(BookingError::Validation("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(BookingError::ShowtimeNotSellable("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(BookingError::TokenExpired), StatusCode::GONE);
        assert_eq!(
            status_of(BookingError::TokenInvalid("x".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(status_of(BookingError::TokenAlreadyUsed), StatusCode::CONFLICT);
        assert_eq!(
            status_of(BookingError::InvalidTransition {
                from: OrderStatus::Expired,
                to: OrderStatus::Cancelled
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(BookingError::UpstreamUnavailable("db down".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_auth_errors_map_to_401_and_403() {
        let unauthenticated = AppError::AuthenticationError("no token".into()).into_response();
        assert_eq!(unauthenticated.status(), StatusCode::UNAUTHORIZED);
        let forbidden = AppError::AuthorizationError("wrong role".into()).into_response();
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);
    }
}
