use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::time::Duration;

use crate::error::{BotError, Result};
use crate::exchange::ExchangeSettings;
use crate::retry::RetryPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "signalbot.toml";
const ENV_PREFIX: &str = "SIGNALBOT";

/// Process-wide settings, loaded once in the binary and passed down
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AppConfig {
    pub database_url: String,
    /// Risk state falls back to process memory when unset
    pub redis_url: Option<String>,
    pub tick_interval_secs: u64,
    pub cycle_deadline_secs: u64,
    pub max_concurrent_bots: usize,
    pub candle_limit: usize,
    pub log_filter: String,
    pub exchange: ExchangeConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ExchangeConfig {
    pub http_timeout_secs: u64,
    pub recv_window_ms: u64,
    pub requests_per_second: u32,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
}

impl ExchangeConfig {
    pub fn settings(&self) -> ExchangeSettings {
        ExchangeSettings {
            http_timeout: Duration::from_secs(self.http_timeout_secs),
            recv_window_ms: self.recv_window_ms,
            requests_per_second: self.requests_per_second,
            retry: RetryPolicy::new(
                self.retry_max_attempts,
                Duration::from_millis(self.retry_base_delay_ms),
            ),
        }
    }
}

impl AppConfig {
    /// Defaults, then `signalbot.toml` if present, then `SIGNALBOT__*` env vars
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    pub fn load_from(path: &str) -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/signalbot".to_string());
        Self::load_with(path, database_url, std::env::var("REDIS_URL").ok())
    }

    /// Plain `DATABASE_URL` and `REDIS_URL` only fill in what neither the
    /// file nor `SIGNALBOT__*` set
    fn load_with(path: &str, database_url: String, redis_url: Option<String>) -> Result<Self> {
        let mut builder = Config::builder()
            .set_default("database_url", database_url)?
            .set_default("tick_interval_secs", 60)?
            .set_default("cycle_deadline_secs", 45)?
            .set_default("max_concurrent_bots", 8)?
            .set_default("candle_limit", 200)?
            .set_default("log_filter", "signalbot=info")?
            .set_default("exchange.http_timeout_secs", 10)?
            .set_default("exchange.recv_window_ms", 5000)?
            .set_default("exchange.requests_per_second", 10)?
            .set_default("exchange.retry_max_attempts", 3)?
            .set_default("exchange.retry_base_delay_ms", 1000)?;
        if let Some(redis_url) = redis_url {
            builder = builder.set_default("redis_url", redis_url)?;
        }

        let config: AppConfig = builder
            .add_source(File::new(path, FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.tick_interval_secs == 0 {
            return Err(BotError::Config("tick_interval_secs must be > 0".to_string()));
        }
        if self.cycle_deadline_secs == 0 || self.cycle_deadline_secs > self.tick_interval_secs {
            return Err(BotError::Config(format!(
                "cycle_deadline_secs must be in 1..={}, got {}",
                self.tick_interval_secs, self.cycle_deadline_secs
            )));
        }
        if self.max_concurrent_bots == 0 {
            return Err(BotError::Config("max_concurrent_bots must be > 0".to_string()));
        }
        if self.candle_limit == 0 {
            return Err(BotError::Config("candle_limit must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn cycle_deadline(&self) -> Duration {
        Duration::from_secs(self.cycle_deadline_secs)
    }
}

/// `url` without its username and password, safe to log
pub fn redact_url(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            if !parsed.username().is_empty() {
                let _ = parsed.set_username("");
            }
            parsed.to_string()
        }
        Err(_) => "<invalid url>".to_string(),
    }
}
