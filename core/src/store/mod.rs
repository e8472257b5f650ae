use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{ArbitrageOpportunity, ExchangeHandle, MonitoringStats, Quote};

pub mod memory;

pub use memory::MemoryStore;

/// Storage errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("write failed: {0}")]
    Write(String),
}

/// Persistence capability consumed by the monitor.
///
/// Work is done through a [`StoreSession`] acquired once per cycle; dropping
/// the session releases whatever the store holds for it.
#[async_trait]
pub trait Store: Send + Sync {
    async fn session<'a>(&'a self) -> Result<Box<dyn StoreSession + 'a>, StoreError>;
}

#[async_trait]
pub trait StoreSession: Send {
    /// Append price history records
    async fn append_quotes(&mut self, quotes: &[Quote]) -> Result<(), StoreError>;

    async fn append_opportunities(
        &mut self,
        opportunities: &[ArbitrageOpportunity],
    ) -> Result<(), StoreError>;

    /// Insert or update an exchange's status row, keyed by its identifier
    async fn upsert_exchange(&mut self, handle: &ExchangeHandle) -> Result<(), StoreError>;

    async fn load_stats(&mut self) -> Result<Option<MonitoringStats>, StoreError>;

    async fn save_stats(&mut self, stats: &MonitoringStats) -> Result<(), StoreError>;

    /// Delete quotes observed strictly before `cutoff`, returning how many went
    async fn delete_quotes_before(&mut self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Delete opportunities detected strictly before `cutoff`
    async fn delete_opportunities_before(
        &mut self,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, StoreError>;
}
