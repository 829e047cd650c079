use crate::constants::defaults;
use crate::error::{BrokerError, BrokerResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Which queue store a broker runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Postgres,
}

impl std::str::FromStr for StoreBackend {
    type Err = BrokerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "memory" | "in_memory" => Ok(StoreBackend::Memory),
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            other => Err(BrokerError::configuration(
                "backend",
                format!("unknown store backend '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub backend: StoreBackend,
    pub database_url: String,
    pub max_connections: u32,
    pub default_receive_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            database_url: defaults::DATABASE_URL.to_string(),
            max_connections: defaults::MAX_CONNECTIONS,
            default_receive_timeout_ms: defaults::RECEIVE_TIMEOUT_MS,
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
        }
    }
}

impl BrokerConfig {
    /// Defaults overridden by `DATABASE_URL` and `BROKER_*` variables
    pub fn from_env() -> BrokerResult<Self> {
        let mut config = Self::default();

        if let Ok(backend) = std::env::var("BROKER_BACKEND") {
            config.backend = backend.parse()?;
        }

        if let Ok(db_url) = std::env::var("DATABASE_URL") {
            config.database_url = db_url;
        }

        if let Ok(max_connections) = std::env::var("BROKER_MAX_CONNECTIONS") {
            config.max_connections = max_connections.parse().map_err(|e| {
                BrokerError::configuration("max_connections", format!("Invalid value: {e}"))
            })?;
        }

        if let Ok(timeout) = std::env::var("BROKER_RECEIVE_TIMEOUT_MS") {
            config.default_receive_timeout_ms = timeout.parse().map_err(|e| {
                BrokerError::configuration("default_receive_timeout_ms", format!("Invalid value: {e}"))
            })?;
        }

        if let Ok(interval) = std::env::var("BROKER_POLL_INTERVAL_MS") {
            config.poll_interval_ms = interval.parse().map_err(|e| {
                BrokerError::configuration("poll_interval_ms", format!("Invalid value: {e}"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load a TOML, YAML or JSON file, with `BROKER_*` variables taking precedence
    pub fn load(path: impl AsRef<Path>) -> BrokerResult<Self> {
        let config: Self = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix("BROKER").try_parsing(true))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> BrokerResult<()> {
        if self.backend == StoreBackend::Postgres && self.database_url.trim().is_empty() {
            return Err(BrokerError::configuration(
                "database_url",
                "required for the postgres backend",
            ));
        }
        if self.max_connections == 0 {
            return Err(BrokerError::configuration(
                "max_connections",
                "must be at least 1",
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(BrokerError::configuration(
                "poll_interval_ms",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.default_receive_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = BrokerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.backend, StoreBackend::Memory);
        assert_eq!(config.receive_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_backend_parsing() {
        assert_eq!("Postgres".parse::<StoreBackend>().unwrap(), StoreBackend::Postgres);
        assert_eq!("memory".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert!("redis".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        let config = BrokerConfig {
            max_connections: 0,
            ..BrokerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(BrokerError::Configuration { component, .. }) if component == "max_connections"
        ));
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "backend = \"postgres\"\ndatabase_url = \"postgresql://localhost/broker_test\"\npoll_interval_ms = 25"
        )
        .unwrap();

        let config = BrokerConfig::load(file.path()).unwrap();
        assert_eq!(config.backend, StoreBackend::Postgres);
        assert_eq!(config.database_url, "postgresql://localhost/broker_test");
        assert_eq!(config.poll_interval(), Duration::from_millis(25));
        assert_eq!(config.max_connections, defaults::MAX_CONNECTIONS);
    }
}
