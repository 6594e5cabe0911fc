use anyhow::Context;
use marquee_api::{
    app,
    state::{AppState, AuthConfig},
    worker::spawn_workers,
};
use marquee_core::events::{EventPublisher, NoopPublisher};
use marquee_core::{RulesHolder, SystemClock};
use marquee_order::{BookingEngine, Stores};
use marquee_store::{
    app_config::Config, DbClient, KafkaEventPublisher, RedisClient, StoreOrderRepository,
    StoreRedemptionRepository, StoreSeatLedgerRepository, StoreShowtimeCatalog,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "marquee_api=debug,marquee_order=debug,tower_http=debug,axum::rejection=trace".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Marquee booking API on port {}", config.server.port);

    let db = DbClient::new(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;

    // Redis only backs the rate limiter
    let redis = match RedisClient::new(&config.redis.url).await {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            tracing::warn!("Redis unavailable, rate limiting disabled: {}", e);
            None
        }
    };

    let publisher: Arc<dyn EventPublisher> = match &config.kafka {
        Some(kafka) => Arc::new(
            KafkaEventPublisher::new(&kafka.brokers).context("Failed to create Kafka producer")?,
        ),
        None => {
            tracing::info!("No Kafka configured, domain events are dropped");
            Arc::new(NoopPublisher)
        }
    };

    let pool = db.pool.clone();
    let stores = Stores {
        seats: Arc::new(StoreSeatLedgerRepository::new(pool.clone())),
        orders: Arc::new(StoreOrderRepository::new(pool.clone())),
        redemptions: Arc::new(StoreRedemptionRepository::new(pool.clone())),
        catalog: Arc::new(StoreShowtimeCatalog::new(pool)),
    };

    let rules = RulesHolder::new(config.booking_rules.clone());
    let engine = BookingEngine::new(
        stores,
        publisher,
        rules.clone(),
        Arc::new(SystemClock),
        config.redemption.signing_secret.as_bytes(),
    )
    .context("Failed to build booking engine")?
    .with_reclaim_batch_size(config.worker.batch_size);

    let state = AppState {
        engine,
        rules,
        base_rules: config.booking_rules.clone(),
        rules_source: Arc::new(db),
        redis,
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
            payment_webhook_secret: config.payments.webhook_secret.clone(),
        },
    };

    // Pick up store overrides before serving the first request
    if let Err(e) = marquee_api::worker::refresh_rules(
        state.rules_source.as_ref(),
        &state.base_rules,
        &state.rules,
    )
    .await
    {
        tracing::warn!("Starting with configured rules, overrides not loaded: {}", e);
    }

    if config.worker.enabled {
        spawn_workers(state.clone(), &config.worker);
    }

    let app = app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .context("Server error")?;

    Ok(())
}
