use std::{env::var, str::FromStr, time::Duration};

use dotenvy::dotenv;
use thiserror::Error;

use crate::{
    application::services::circuit_breaker::CircuitBreakerConfig,
    infrastructure::messaging::webhook::WebhookConfig,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required env param {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for env param {name}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Postgres,
    /// Process-local store and cache, nothing survives a restart.
    Memory,
}

impl FromStr for StorageKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub scheme: String,
    pub host: String,
    pub storage: StorageKind,
    pub database_url: Option<String>,
    pub redis_url: String,
    pub webhook_url: String,
    pub webhook_auth_key: String,
    pub webhook_timeout: Duration,
    pub scheduler_interval: Duration,
    pub scheduler_batch_size: u32,
    pub scheduler_autostart: bool,
    pub breaker_max_requests: u32,
    pub breaker_interval: Duration,
    pub breaker_timeout: Duration,
    pub breaker_failure_ratio: f64,
    pub breaker_consecutive_fails: u32,
}

impl Config {
    /// Reads the process environment, after loading `.env` if there is one.
    pub fn try_parse() -> Result<Config, ConfigError> {
        let _ = dotenv();
        Self::from_lookup(|name| var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let storage = env.parsed("STORAGE", StorageKind::Postgres)?;
        let database_url = env.get("DATABASE_URL");
        if storage == StorageKind::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let breaker_failure_ratio = env.parsed("CB_FAILURE_RATIO", 0.6_f64)?;
        if !(breaker_failure_ratio > 0.0 && breaker_failure_ratio <= 1.0) {
            return Err(ConfigError::Invalid {
                name: "CB_FAILURE_RATIO",
                value: breaker_failure_ratio.to_string(),
            });
        }

        Ok(Config {
            port: env.parsed("PORT", 8080)?,
            scheme: env.get("SCHEME").unwrap_or_else(|| "http".to_string()),
            host: env.get("HOST").unwrap_or_else(|| "localhost".to_string()),
            storage,
            database_url,
            redis_url: env
                .get("REDIS_URL")
                .unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
            webhook_url: env.get("WEBHOOK_URL").ok_or(ConfigError::Missing("WEBHOOK_URL"))?,
            webhook_auth_key: env.get("WEBHOOK_AUTH_KEY").unwrap_or_default(),
            webhook_timeout: env.seconds("WEBHOOK_TIMEOUT_SECS", 30)?,
            scheduler_interval: env.seconds("SCHEDULER_INTERVAL_SECS", 120)?,
            scheduler_batch_size: env.positive("SCHEDULER_BATCH_SIZE", 2)?,
            scheduler_autostart: env.flag("SCHEDULER_AUTOSTART", true)?,
            breaker_max_requests: env.positive("CB_MAX_REQUESTS", 3)?,
            breaker_interval: Duration::from_secs(env.parsed("CB_INTERVAL_SECS", 60)?),
            breaker_timeout: env.seconds("CB_TIMEOUT_SECS", 60)?,
            breaker_failure_ratio,
            breaker_consecutive_fails: env.positive("CB_CONSECUTIVE_FAILS", 5)?,
        })
    }

    pub fn server_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            max_requests: self.breaker_max_requests,
            interval: self.breaker_interval,
            timeout: self.breaker_timeout,
            failure_ratio: self.breaker_failure_ratio,
            min_requests: self.breaker_consecutive_fails,
            ..Default::default()
        }
    }

    pub fn webhook_config(&self) -> WebhookConfig {
        WebhookConfig {
            url: self.webhook_url.clone(),
            auth_key: self.webhook_auth_key.clone(),
            timeout: self.webhook_timeout,
        }
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Blank values count as unset.
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn parsed<T: FromStr>(&self, name: &'static str, default: T) -> Result<T, ConfigError> {
        match self.get(name) {
            None => Ok(default),
            Some(value) => value
                .parse::<T>()
                .map_err(|_| ConfigError::Invalid { name, value }),
        }
    }

    fn positive(&self, name: &'static str, default: u32) -> Result<u32, ConfigError> {
        match self.parsed(name, default)? {
            0 => Err(ConfigError::Invalid {
                name,
                value: "0".to_string(),
            }),
            value => Ok(value),
        }
    }

    fn seconds(&self, name: &'static str, default: u32) -> Result<Duration, ConfigError> {
        self.positive(name, default)
            .map(|secs| Duration::from_secs(u64::from(secs)))
    }

    fn flag(&self, name: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.get(name).map(|value| value.to_ascii_lowercase()) {
            None => Ok(default),
            Some(value) => match value.as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::Invalid {
                    name,
                    value: value.clone(),
                }),
            },
        }
    }
}
