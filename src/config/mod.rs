mod app_config;

pub use app_config::{
    AppConfig, DatabaseConfig, EngineConfig, HttpConfig, LogFormat, LoggingConfig, StorageConfig,
};
