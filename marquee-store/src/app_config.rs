use marquee_core::BookingRules;
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub kafka: Option<KafkaConfig>,
    pub auth: AuthConfig,
    pub redemption: RedemptionConfig,
    pub payments: PaymentsConfig,
    #[serde(default)]
    pub booking_rules: BookingRules,
    #[serde(default)]
    pub worker: WorkerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// Shared HS256 secret of the identity provider that issues staff tokens
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedemptionConfig {
    pub signing_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaymentsConfig {
    /// HMAC-SHA256 key the gateway signs callback bodies with
    pub webhook_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_reclaim_interval")]
    pub reclaim_interval_seconds: u64,
    #[serde(default = "default_purge_interval")]
    pub purge_interval_seconds: u64,
    #[serde(default = "default_rules_refresh")]
    pub rules_refresh_seconds: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
}

fn default_enabled() -> bool {
    true
}

fn default_reclaim_interval() -> u64 {
    60
}

fn default_purge_interval() -> u64 {
    86_400
}

fn default_rules_refresh() -> u64 {
    30
}

fn default_batch_size() -> i64 {
    500
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            reclaim_interval_seconds: default_reclaim_interval(),
            purge_interval_seconds: default_purge_interval(),
            rules_refresh_seconds: default_rules_refresh(),
            batch_size: default_batch_size(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides are optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Never checked in
            .add_source(config::File::with_name("config/local").required(false))
            // Environment wins over files, nested keys split on `__`
            .add_source(config::Environment::with_prefix("MARQUEE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
