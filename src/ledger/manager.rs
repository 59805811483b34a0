use std::collections::HashMap;

use tokio::sync::broadcast;
use tokio::sync::RwLock;
use tracing::warn;

use crate::campaign::{CampaignId, MessageStats};
use crate::database::Database;
use crate::dispatch::DispatchJobId;
use crate::error::Error;

use super::{DeliveryRecord, DeliveryResult};

/// Recompute a campaign's aggregates from the store. `total` comes from the
/// job collection; `sent` and `failed` come from folding the ledger, keeping
/// only the latest record per job so retries do not double count.
#[tracing::instrument(skip(db))]
pub async fn stats_for(
    db: &dyn Database,
    campaign_id: CampaignId,
) -> Result<MessageStats, Error> {
    let total = db.jobs().count_by_campaign(campaign_id).await?;
    let records = db.deliveries().fetch_records_by_campaign(campaign_id).await?;

    Ok(fold_stats(total, &records))
}

#[tracing::instrument(skip(db))]
pub async fn outstanding(db: &dyn Database, campaign_id: CampaignId) -> Result<u64, Error> {
    db.jobs().count_outstanding(campaign_id).await
}

fn fold_stats(total: u64, records: &[DeliveryRecord]) -> MessageStats {
    let mut latest: HashMap<DispatchJobId, DeliveryResult> = HashMap::new();
    // Records arrive in recording order, later entries win.
    for record in records {
        latest.insert(record.job_id, record.result);
    }

    let mut stats = MessageStats {
        total,
        ..MessageStats::default()
    };
    for result in latest.values() {
        match result {
            DeliveryResult::Sent => stats.sent += 1,
            DeliveryResult::Failed => stats.failed += 1,
            DeliveryResult::RateLimited | DeliveryResult::SkippedIneligible => {}
        }
    }

    stats
}

/// Read-through cache over `stats_for`, invalidated by campaign events rather
/// than a TTL. A missed invalidation only costs one recompute on the next
/// event; the fold itself is the source of truth.
#[derive(Debug, Default)]
pub struct StatsCache {
    inner: RwLock<HashMap<CampaignId, MessageStats>>,
}

impl StatsCache {
    pub fn new() -> StatsCache {
        StatsCache::default()
    }

    pub async fn stats_for(
        &self,
        db: &dyn Database,
        campaign_id: CampaignId,
    ) -> Result<MessageStats, Error> {
        if let Some(stats) = self.inner.read().await.get(&campaign_id) {
            return Ok(*stats);
        }

        let stats = stats_for(db, campaign_id).await?;
        self.inner.write().await.insert(campaign_id, stats);

        Ok(stats)
    }

    pub async fn invalidate(&self, campaign_id: CampaignId) {
        self.inner.write().await.remove(&campaign_id);
    }

    /// Evict entries as campaign events arrive. If the receiver lags the
    /// whole cache is cleared, so a dropped event can never pin a stale
    /// aggregate.
    pub fn spawn_invalidator(
        self: &std::sync::Arc<Self>,
        mut rx: broadcast::Receiver<crate::events::CampaignEvent>,
    ) {
        let cache = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => cache.invalidate(event.campaign_id).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "stats cache invalidator lagged, clearing");
                        cache.inner.write().await.clear();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use crate::lead::LeadId;

    use super::*;

    fn record(job_id: DispatchJobId, attempt: u32, result: DeliveryResult) -> DeliveryRecord {
        DeliveryRecord::new(CampaignId::new(), job_id, LeadId::new(), attempt, result, None)
    }

    #[test]
    fn retried_job_counts_once_with_its_final_outcome() {
        let job = DispatchJobId::new();
        let records = vec![
            record(job, 1, DeliveryResult::RateLimited),
            record(job, 2, DeliveryResult::Failed),
            record(job, 3, DeliveryResult::Sent),
        ];

        let stats = fold_stats(1, &records);

        assert_eq!(
            stats,
            MessageStats {
                total: 1,
                sent: 1,
                failed: 0,
            }
        );
    }

    #[test]
    fn skipped_jobs_count_toward_total_only() {
        let records = vec![
            record(DispatchJobId::new(), 1, DeliveryResult::Sent),
            record(DispatchJobId::new(), 3, DeliveryResult::Failed),
            record(DispatchJobId::new(), 0, DeliveryResult::SkippedIneligible),
        ];

        let stats = fold_stats(3, &records);

        assert_eq!(
            stats,
            MessageStats {
                total: 3,
                sent: 1,
                failed: 1,
            }
        );
    }
}
