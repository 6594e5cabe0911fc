use marquee_core::repository::RulesSource;
use marquee_core::{BookingRules, RulesHolder};
use marquee_order::BookingEngine;
use marquee_store::RedisClient;
use std::sync::Arc;

#[derive(Clone)]
pub struct AuthConfig {
    /// Verifies staff bearer tokens
    pub secret: String,
    /// Verifies payment gateway callback signatures
    pub payment_webhook_secret: String,
}

#[derive(Clone)]
pub struct AppState {
    pub engine: BookingEngine,
    /// Rules currently in force, shared with every engine service
    pub rules: RulesHolder,
    /// Rules from configuration; store overrides are layered on top of these
    pub base_rules: BookingRules,
    pub rules_source: Arc<dyn RulesSource>,
    /// Rate limiting is skipped when no Redis is configured
    pub redis: Option<Arc<RedisClient>>,
    pub auth: AuthConfig,
}
