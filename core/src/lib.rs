pub mod aggregator;
pub mod arbitrage;
pub mod config;
pub mod error;
pub mod exchange;
pub mod monitor;
pub mod stats;
pub mod store;
pub mod types;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use aggregator::{collect_cycle, CycleQuotes};
pub use arbitrage::detect;
pub use config::Config;
pub use error::MonitorError;
pub use exchange::{ExchangeClientPool, ExchangeRegistry};
pub use monitor::{Monitor, MonitorState, MonitorStatus};
pub use store::{MemoryStore, Store};
pub use types::*;
