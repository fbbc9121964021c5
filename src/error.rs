use thiserror::Error;

/// Errors raised by the decision-and-execution pipeline.
///
/// A risk-gate rejection is not an error: it surfaces as `Signal::Skip`
/// with a reason attached.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("insufficient data: need {needed} values, got {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("unsupported exchange: {0}")]
    UnsupportedExchange(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("exchange API error {code}: {message}")]
    ApiError { code: String, message: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("cycle deadline exceeded")]
    DeadlineExceeded,
}

impl BotError {
    pub fn invalid_response(message: impl Into<String>) -> Self {
        BotError::InvalidResponse(message.into())
    }
}

impl From<serde_json::Error> for BotError {
    fn from(err: serde_json::Error) -> Self {
        BotError::InvalidResponse(err.to_string())
    }
}

impl From<config::ConfigError> for BotError {
    fn from(err: config::ConfigError) -> Self {
        BotError::Config(err.to_string())
    }
}

impl From<sqlx::Error> for BotError {
    fn from(err: sqlx::Error) -> Self {
        BotError::Storage(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for BotError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        BotError::Storage(err.to_string())
    }
}

impl From<redis::RedisError> for BotError {
    fn from(err: redis::RedisError) -> Self {
        BotError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BotError>;
