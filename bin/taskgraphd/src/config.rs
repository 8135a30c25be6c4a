//! Daemon configuration.
//!
//! Loaded via the `config` crate from environment variables, with `__`
//! separating nested sections (`EXECUTOR__HTTP_TIMEOUT_SECONDS=60`).
//!
//! See [`ExecutorConfig`] and [`SchedulerConfig`] for the library settings.

use serde::Deserialize;
use taskgraph_executor::ExecutorConfig;
use taskgraph_scheduler::SchedulerConfig;

/// Daemon configuration composed from library configs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DaemonConfig {
    /// PostgreSQL connection URL. Only the store-backed commands need it.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Node execution limits.
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Run queue settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl DaemonConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
