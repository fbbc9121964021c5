// Core modules
pub mod config;
pub mod db;
pub mod decision_log;
pub mod error;
pub mod exchange;
pub mod execution;
pub mod indicators;
pub mod models;
pub mod notify;
pub mod persistence;
pub mod retry;
pub mod risk;
pub mod store;
pub mod strategy;

// Re-export commonly used types
pub use error::{BotError, Result};
pub use models::*;
pub use strategy::Strategy;
