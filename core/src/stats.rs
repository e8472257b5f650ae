use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::RetentionConfig;
use crate::store::{StoreError, StoreSession};
use crate::types::*;

/// Rows removed by one retention sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub quotes_deleted: usize,
    pub opportunities_deleted: usize,
}

/// Load the stats row, creating it (started now) when the store has none
pub async fn load_or_init_stats(
    session: &mut dyn StoreSession,
    now: DateTime<Utc>,
) -> Result<MonitoringStats, StoreError> {
    match session.load_stats().await? {
        Some(stats) => Ok(stats),
        None => {
            let stats = MonitoringStats::new(now);
            session.save_stats(&stats).await?;
            Ok(stats)
        }
    }
}

/// Persist one cycle's opportunities and fold them into the stats row.
///
/// An empty batch writes nothing and returns `None`.
pub async fn record_opportunities(
    session: &mut dyn StoreSession,
    opportunities: &[ArbitrageOpportunity],
    now: DateTime<Utc>,
) -> Result<Option<MonitoringStats>, StoreError> {
    if opportunities.is_empty() {
        return Ok(None);
    }

    session.append_opportunities(opportunities).await?;

    let mut stats = load_or_init_stats(session, now).await?;
    stats.record_batch(opportunities, now);
    session.save_stats(&stats).await?;

    info!(
        "💰 Found {} opportunities, best: {}%",
        opportunities.len(),
        opportunities
            .iter()
            .map(|o| o.profit_pct)
            .max()
            .unwrap_or_default()
            .round_dp(3)
    );
    Ok(Some(stats))
}

/// Delete price history and opportunities that fell out of their windows.
///
/// Only rows strictly older than each cutoff go, so running it twice, or
/// alongside fresh writes, is harmless.
pub async fn sweep_retention(
    session: &mut dyn StoreSession,
    now: DateTime<Utc>,
    retention: &RetentionConfig,
) -> Result<SweepReport, StoreError> {
    let report = SweepReport {
        quotes_deleted: session
            .delete_quotes_before(now - retention.price_window())
            .await?,
        opportunities_deleted: session
            .delete_opportunities_before(now - retention.opportunity_window())
            .await?,
    };

    info!(
        "🧹 Retention sweep removed {} quotes and {} opportunities",
        report.quotes_deleted, report.opportunities_deleted
    );
    Ok(report)
}
