//! Server configuration from environment variables.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::storage::StorageConfig;
use crate::sync::{CoordinatorConfig, LogConfig};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Everything the server needs to start
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub storage: StorageConfig,
    pub log: LogConfig,
    pub coordinator: CoordinatorConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 80,
            storage: StorageConfig::default(),
            log: LogConfig::default(),
            coordinator: CoordinatorConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup("ETHER_CONTENT_DIR") {
            config.storage.content_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup("ETHER_DB_PATH") {
            config.storage.db_path = PathBuf::from(path);
        }
        if let Some(brokers) = lookup("ETHER_KAFKA_SERVER") {
            config.log.brokers = brokers;
        }
        if let Some(topic) = lookup("ETHER_KAFKA_TOPIC") {
            config.log.topic = topic;
        }
        if let Some(group) = lookup("ETHER_KAFKA_GROUP") {
            config.log.group_id = group;
        }

        if let Some(port) = parse(&lookup, "PORT")? {
            config.port = port;
        }

        if let Some(shards) = parse::<usize, _>(&lookup, "ETHER_WRITER_SHARDS")? {
            if shards == 0 {
                return Err(ConfigError::Invalid {
                    name: "ETHER_WRITER_SHARDS",
                    value: shards.to_string(),
                });
            }
            config.coordinator.shards = shards;
        }

        // 0 disables the content cache
        if let Some(secs) = parse::<u64, _>(&lookup, "ETHER_CACHE_TTL_SECS")? {
            config.storage.cache_ttl = (secs > 0).then(|| Duration::from_secs(secs));
        }

        Ok(config)
    }
}

fn parse<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(None),
    }
}
