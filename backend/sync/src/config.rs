use std::{env, fmt::Display, fs::read_to_string, path::PathBuf, str::FromStr};

use thiserror::Error;
use tracing::{info, warn};

pub const SECRETS_DIR: &str = "/run/secrets";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid {key} value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    pub redis_retries: usize,
    pub redis_connect_timeout_ms: u64,
    pub key_prefix: String,
    pub storage_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            redis_retries: 1,
            redis_connect_timeout_ms: 100,
            key_prefix: "pantry".to_string(),
            storage_dir: PathBuf::from(".pantry"),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let redis_url = match read_secret("PANTRY_REDIS_URL") {
            Some(url) => url,
            None => try_load("PANTRY_REDIS_URL", "redis://127.0.0.1:6379")?,
        };

        Ok(Self {
            redis_url,
            redis_retries: try_load("PANTRY_REDIS_RETRIES", "1")?,
            redis_connect_timeout_ms: try_load("PANTRY_REDIS_CONNECT_TIMEOUT_MS", "100")?,
            key_prefix: try_load("PANTRY_KEY_PREFIX", "pantry")?,
            storage_dir: try_load("PANTRY_STORAGE_DIR", ".pantry")?,
        })
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn try_load<T: FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    let value = var(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    value.parse().map_err(|e: T::Err| {
        warn!("Invalid {key} value: {e}");

        ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }
    })
}

/// Secrets win over the environment, the Redis URL may carry a password.
fn read_secret(secret_name: &str) -> Option<String> {
    let path = format!("{SECRETS_DIR}/{secret_name}");

    read_to_string(&path)
        .map(|s| s.trim().to_string())
        .map_err(|e| {
            info!("No {secret_name} secret at {path}: {e}");
        })
        .ok()
        .filter(|s| !s.is_empty())
}
