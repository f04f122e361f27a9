pub mod loader;
pub mod schema;

pub use loader::{load_config, load_config_from_str, load_effective_config, validate_config};
pub use schema::{Config, DatabaseConfig, FetchConfig, QueueConfig, WorkerConfig};
