pub mod app_config;
pub mod database;
pub mod events;
pub mod memory;
pub mod order_repo;
pub mod redemption_repo;
pub mod redis_repo;
pub mod seat_repo;
pub mod showtime_repo;

pub use database::DbClient;
pub use events::KafkaEventPublisher;
pub use memory::{MemoryStore, PublishedEvent, RecordingPublisher};
pub use order_repo::StoreOrderRepository;
pub use redemption_repo::StoreRedemptionRepository;
pub use redis_repo::RedisClient;
pub use seat_repo::StoreSeatLedgerRepository;
pub use showtime_repo::StoreShowtimeCatalog;
