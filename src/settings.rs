use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;
use crate::persist::{DEFAULT_BUSY_TIMEOUT_MS, PersistenceMode};

/// Runtime configuration of the `neostore` binary.
///
/// Sources, later ones overriding earlier ones:
/// 1. built-in defaults
/// 2. `neostore.{toml,json,yaml,...}` in the working directory, or the file
///    given explicitly
/// 3. `NEOSTORE_*` environment variables, e.g. `NEOSTORE_DATABASE=neo.db`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// A file path, or `:memory:` for a transient database.
    pub database: String,
    /// A `tracing` filter directive such as `info` or `neostore=debug`.
    pub log: String,
    pub busy_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: "neostore.db".to_string(),
            log: "info".to_string(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl Settings {
    pub fn load(file: Option<&str>) -> Result<Settings> {
        let defaults = Settings::default();
        let builder = config::Config::builder()
            .set_default("database", defaults.database)?
            .set_default("log", defaults.log)?
            .set_default("busy_timeout_ms", defaults.busy_timeout_ms as i64)?
            .add_source(config::File::with_name(file.unwrap_or("neostore")).required(file.is_some()))
            .add_source(
                config::Environment::with_prefix("NEOSTORE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );
        Ok(builder.build()?.try_deserialize()?)
    }

    pub fn persistence_mode(&self) -> PersistenceMode {
        PersistenceMode::from_path(&self.database)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}
