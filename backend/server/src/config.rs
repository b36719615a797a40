use std::{env, fmt::Display, fs::read_to_string, str::FromStr};

use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Redis,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "redis" => Ok(StoreBackend::Redis),
            other => Err(format!("unknown backend {other:?}, expected memory or redis")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub backend: StoreBackend,
    pub redis_url: String,
    pub session_secret: String,
    pub session_max_age_secs: u64,
    pub channel_capacity: usize,
    pub keep_alive_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3333,
            backend: StoreBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            session_secret: ephemeral_secret(),
            session_max_age_secs: 60 * 60 * 24 * 30,
            channel_capacity: 256,
            keep_alive_secs: 15,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let backend: StoreBackend = try_load("STORE_BACKEND", "memory")?;

        let session_secret = match read_secret("SESSION_SECRET") {
            Some(secret) => secret,
            None if backend == StoreBackend::Redis => {
                return Err(ConfigError::MissingSecret("SESSION_SECRET"));
            }
            None => {
                warn!("SESSION_SECRET not set, sessions will not survive a restart");
                ephemeral_secret()
            }
        };

        Ok(Self {
            port: try_load("RUST_PORT", "3333")?,
            backend,
            redis_url: try_load("REDIS_URL", "redis://127.0.0.1:6379")?,
            session_secret,
            session_max_age_secs: try_load("SESSION_MAX_AGE_SECS", "2592000")?,
            channel_capacity: try_load("CHANNEL_CAPACITY", "256")?,
            keep_alive_secs: try_load("KEEP_ALIVE_SECS", "15")?,
        })
    }
}

fn ephemeral_secret() -> String {
    Uuid::new_v4().simple().to_string()
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn try_load<T: FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e: T::Err| {
            warn!("Invalid {key} value: {e}");
            ConfigError::Invalid {
                key,
                reason: e.to_string(),
            }
        })
}

/// Docker secret file first, then the plain environment variable.
fn read_secret(secret_name: &str) -> Option<String> {
    let path = format!("/run/secrets/{secret_name}");

    match read_to_string(&path) {
        Ok(secret) => Some(secret.trim().to_string()),
        Err(e) => {
            info!("Failed to read {secret_name} from file: {e}, trying environment");
            var(secret_name)
        }
    }
}
