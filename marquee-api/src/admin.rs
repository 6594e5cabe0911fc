use axum::{extract::State, middleware, routing::post, Json, Router};
use marquee_core::BookingRules;
use marquee_order::{PurgeReport, SweepReport};
use serde::Serialize;

use crate::error::AppError;
use crate::middleware::admin_auth_middleware;
use crate::state::AppState;
use crate::worker::refresh_rules;

/// Manual triggers for the background jobs, for an external scheduler or an operator
pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/v1/admin/jobs/reclaim-expired", post(reclaim_expired))
        .route("/v1/admin/jobs/purge-terminal", post(purge_terminal))
        .route("/v1/admin/jobs/refresh-rules", post(reload_rules))
        .route_layer(middleware::from_fn_with_state(state, admin_auth_middleware))
}

async fn reclaim_expired(State(state): State<AppState>) -> Result<Json<SweepReport>, AppError> {
    Ok(Json(state.engine.reclaimer.reclaim_expired().await?))
}

async fn purge_terminal(State(state): State<AppState>) -> Result<Json<PurgeReport>, AppError> {
    Ok(Json(state.engine.reclaimer.purge_terminal().await?))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesResponse {
    pub changed: bool,
    pub rules: BookingRules,
}

async fn reload_rules(State(state): State<AppState>) -> Result<Json<RulesResponse>, AppError> {
    let changed =
        refresh_rules(state.rules_source.as_ref(), &state.base_rules, &state.rules).await?;
    Ok(Json(RulesResponse {
        changed,
        rules: state.rules.current(),
    }))
}
