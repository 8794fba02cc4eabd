pub mod app_config;
pub mod database;
pub mod directory;
pub mod pg_repo;
pub mod redis_repo;

pub use app_config::Config;
pub use database::DbClient;
pub use directory::StaticDirectory;
pub use pg_repo::{PgDirectory, PgLockTable, PgOrderStore};
pub use redis_repo::RedisLockTable;
