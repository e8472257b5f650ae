use thiserror::Error;

use crate::config::ConfigError;
use crate::exchange::ExchangeError;
use crate::store::StoreError;

/// Monitor-level errors
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("only {available} exchange(s) reachable, at least {required} required")]
    FatalStartup { available: usize, required: usize },

    #[error("monitor is already running")]
    AlreadyRunning,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("cycle panicked: {0}")]
    CyclePanicked(String),
}

pub type Result<T> = std::result::Result<T, MonitorError>;
