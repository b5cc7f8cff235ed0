pub mod app_config;
pub mod calendar;
pub mod database;
#[cfg(feature = "kafka")]
pub mod events;
pub mod memory;
pub mod postgres;
pub mod redis_repo;

pub use app_config::Config;
pub use calendar::{CachedCalendar, HttpCalendar};
pub use database::DbClient;
#[cfg(feature = "kafka")]
pub use events::{EventProducer, KafkaNotifier};
pub use memory::InMemoryStore;
pub use postgres::PgStore;
pub use redis_repo::RedisClient;
