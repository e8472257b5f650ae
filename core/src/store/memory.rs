use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, VecDeque};
use tokio::sync::{Mutex, MutexGuard};

use crate::store::{Store, StoreError, StoreSession};
use crate::types::*;

/// In-process store backing the daemon and the tests.
///
/// Tables grow until the retention sweep prunes them; nothing is evicted
/// on write.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

#[derive(Default)]
struct Tables {
    quotes: VecDeque<Quote>,
    opportunities: VecDeque<ArbitrageOpportunity>,
    exchanges: BTreeMap<ExchangeId, ExchangeHandle>,
    stats: Option<MonitoringStats>,
}

/// Session holding the table lock until dropped
pub struct MemorySession<'a> {
    tables: MutexGuard<'a, Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn quotes(&self) -> Vec<Quote> {
        self.tables.lock().await.quotes.iter().cloned().collect()
    }

    /// Stored opportunities, newest first
    pub async fn opportunities(&self) -> Vec<ArbitrageOpportunity> {
        self.tables.lock().await.opportunities.iter().rev().cloned().collect()
    }

    pub async fn exchanges(&self) -> Vec<ExchangeHandle> {
        self.tables.lock().await.exchanges.values().cloned().collect()
    }

    pub async fn stats(&self) -> Option<MonitoringStats> {
        self.tables.lock().await.stats.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn session<'a>(&'a self) -> Result<Box<dyn StoreSession + 'a>, StoreError> {
        Ok(Box::new(MemorySession {
            tables: self.tables.lock().await,
        }))
    }
}

#[async_trait]
impl<'a> StoreSession for MemorySession<'a> {
    async fn append_quotes(&mut self, quotes: &[Quote]) -> Result<(), StoreError> {
        self.tables.quotes.extend(quotes.iter().cloned());
        Ok(())
    }

    async fn append_opportunities(
        &mut self,
        opportunities: &[ArbitrageOpportunity],
    ) -> Result<(), StoreError> {
        self.tables.opportunities.extend(opportunities.iter().cloned());
        Ok(())
    }

    async fn upsert_exchange(&mut self, handle: &ExchangeHandle) -> Result<(), StoreError> {
        self.tables.exchanges.insert(handle.id.clone(), handle.clone());
        Ok(())
    }

    async fn load_stats(&mut self) -> Result<Option<MonitoringStats>, StoreError> {
        Ok(self.tables.stats.clone())
    }

    async fn save_stats(&mut self, stats: &MonitoringStats) -> Result<(), StoreError> {
        self.tables.stats = Some(stats.clone());
        Ok(())
    }

    async fn delete_quotes_before(&mut self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let before = self.tables.quotes.len();
        self.tables.quotes.retain(|q| q.timestamp >= cutoff);
        Ok(before - self.tables.quotes.len())
    }

    async fn delete_opportunities_before(
        &mut self,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let before = self.tables.opportunities.len();
        self.tables.opportunities.retain(|o| o.detected_at >= cutoff);
        Ok(before - self.tables.opportunities.len())
    }
}
