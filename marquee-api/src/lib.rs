use axum::{http::Method, middleware::from_fn_with_state, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod admin;
pub mod checkout;
pub mod error;
pub mod middleware;
pub mod orders;
pub mod redemptions;
pub mod retry;
pub mod state;
pub mod webhooks;
pub mod worker;

pub use state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
            axum::http::HeaderName::from_static(checkout::IDEMPOTENCY_KEY_HEADER),
            axum::http::HeaderName::from_static(webhooks::SIGNATURE_HEADER),
        ]);

    let mut router = Router::new()
        .merge(checkout::routes())
        .merge(orders::routes())
        .merge(webhooks::routes())
        .merge(redemptions::routes(state.clone()))
        .merge(admin::routes(state.clone()))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    if let Some(redis) = state.redis.clone() {
        router = router.layer(from_fn_with_state(redis, middleware::rate_limit_middleware));
    }

    router.with_state(state)
}
