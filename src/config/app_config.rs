use std::time::Duration;

use serde::Deserialize;

use crate::infrastructure::database::PostgresConfig;
use crate::infrastructure::reasoning::EngineSettings;

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub engine: EngineConfig,
    pub storage: StorageConfig,
    pub http: HttpConfig,
    /// Record store connection; without it database sources and store
    /// outputs have no backing store
    pub database: Option<DatabaseConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub parallel: bool,
    /// Unset uses min(32, CPUs + 4)
    pub max_workers: Option<usize>,
    pub chain_timeout_secs: Option<f64>,
    pub persist_executions: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding uploaded file blobs
    pub root: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallel: false,
            max_workers: None,
            chain_timeout_secs: None,
            persist_executions: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: "uploads".to_string(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl EngineConfig {
    pub fn settings(&self) -> EngineSettings {
        EngineSettings {
            parallel: self.parallel,
            max_workers: self.max_workers.filter(|w| *w > 0),
            chain_timeout: self
                .chain_timeout_secs
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .filter(|d| !d.is_zero()),
            persist_executions: self.persist_executions,
        }
    }
}

impl DatabaseConfig {
    pub fn postgres(&self) -> PostgresConfig {
        PostgresConfig::new(self.url.clone()).with_max_connections(self.max_connections)
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("LABFLOW")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
