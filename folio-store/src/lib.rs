pub mod app_config;
pub mod database;
pub mod order_repo;
pub mod catalog_repo;
pub mod redis_repo;
pub mod events;
pub mod gateway;

pub use database::DbClient;
pub use order_repo::PgOrderRepository;
pub use catalog_repo::PgTemplateCatalog;
pub use redis_repo::RedisClient;
pub use events::{EventProducer, KafkaNotifier};
pub use gateway::RazorpayGateway;
