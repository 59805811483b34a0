use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::audit;
use crate::campaign::manager::{self, CampaignLocks};
use crate::database::Database;
use crate::error::Error;
use crate::events::{CampaignEventKind, EventBus};

use super::db::CampaignFilter;
use super::{Campaign, CampaignStatus};

/// Poll for SCHEDULED campaigns whose start time has passed and start them,
/// then reconcile RUNNING campaigns that an interrupted start or a crashed
/// worker left behind. Each tick is independent; a campaign that fails to
/// start is retried on the next tick until an operator intervenes or it
/// starts.
pub fn spawn(
    db: Arc<dyn Database>,
    locks: Arc<CampaignLocks>,
    events: EventBus,
    interval: Duration,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(err) = run_due_campaigns(&*db, &locks, &events).await {
                warn!(%err, "scheduler tick failed");
            }
            if let Err(err) = reconcile_running_campaigns(&*db, &locks, &events).await {
                warn!(%err, "reconciliation tick failed");
            }
        }
    });
}

async fn run_due_campaigns(
    db: &dyn Database,
    locks: &CampaignLocks,
    events: &EventBus,
) -> Result<(), Error> {
    let due = db.campaigns().fetch_due_campaigns(Utc::now()).await?;

    for campaign in due {
        match manager::start_campaign(db, locks, events, campaign.id, "scheduler").await {
            Ok((campaign, enqueued)) => {
                info!(campaign_id = %campaign.id, enqueued, "started scheduled campaign");
            }
            // Another instance may have started it between fetch and lock.
            Err(Error::AlreadyRunning { .. }) => {}
            Err(err) => {
                warn!(campaign_id = %campaign.id, %err, "failed to start scheduled campaign");
            }
        }
    }

    Ok(())
}

/// Heal the two states a crash mid-`start` can leave behind: RUNNING with no
/// jobs at all (the enqueue never happened; revert to DRAFT), and RUNNING
/// with a drained backlog (the completing worker died before the final CAS;
/// mark COMPLETED). Campaigns touched within the last minute are left alone
/// so a start in progress in another process is not reverted under it.
async fn reconcile_running_campaigns(
    db: &dyn Database,
    locks: &CampaignLocks,
    events: &EventBus,
) -> Result<(), Error> {
    let running = db
        .campaigns()
        .fetch_campaigns(CampaignFilter {
            status: Some(CampaignStatus::Running),
            campaign_type: None,
        })
        .await?;
    let now = Utc::now();

    for campaign in running {
        let campaign_id = campaign.id;
        let _guard = locks.acquire(campaign_id).await;

        // Re-read under the lock; the listing may be stale by now.
        let campaign = match db.campaigns().fetch_campaign_by_id(campaign_id).await? {
            Some(campaign) if campaign.status == CampaignStatus::Running => campaign,
            _ => continue,
        };
        if within_start_grace(&campaign, now) {
            continue;
        }

        if db.jobs().count_by_campaign(campaign_id).await? == 0 {
            match db
                .campaigns()
                .revert_start(campaign, CampaignStatus::Draft, None)
                .await
            {
                Ok(_) => {
                    warn!(%campaign_id, "reverted running campaign with no jobs to draft");
                    events.publish(campaign_id, CampaignEventKind::StatusChanged);
                }
                Err(Error::ConcurrentModificationDetected) => {}
                Err(err) => return Err(err),
            }
            continue;
        }

        if db.jobs().count_outstanding(campaign_id).await? == 0 {
            match db
                .campaigns()
                .mark_terminal(campaign, CampaignStatus::Completed)
                .await
            {
                Ok(_) => {
                    audit::record(
                        db,
                        "COMPLETE_CAMPAIGN",
                        "campaign",
                        campaign_id.to_string(),
                        "system",
                        None,
                    )
                    .await;
                    events.publish(campaign_id, CampaignEventKind::StatusChanged);
                }
                Err(Error::ConcurrentModificationDetected) => {}
                Err(err) => return Err(err),
            }
        }
    }

    Ok(())
}

fn within_start_grace(campaign: &Campaign, now: DateTime<Utc>) -> bool {
    now - campaign.modified_at < chrono::Duration::seconds(60)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Duration as ChronoDuration;

    use crate::campaign::{CampaignType, TargetAudience};
    use crate::database::test::MockDatabase;

    use super::*;

    fn stale_running_campaign() -> Campaign {
        let started = Utc::now() - ChronoDuration::minutes(10);
        Campaign {
            id: "CPN-16E7753989D6431C90F42EB1A2F65C43".parse().unwrap(),
            name: "Spring promo".to_string(),
            description: None,
            campaign_type: CampaignType::MessengerBroadcast,
            status: CampaignStatus::Running,
            template_id: None,
            message_content: Some("Hi".to_string()),
            audience: TargetAudience::default(),
            scheduled_at: None,
            started_at: Some(started),
            completed_at: None,
            created_at: started,
            modified_at: started,
        }
    }

    #[tokio::test]
    async fn running_campaign_with_no_jobs_is_reverted_to_draft() {
        // A crash between the status flip and the enqueue leaves this state;
        // without the revert the campaign would stay RUNNING forever.
        let campaign = stale_running_campaign();
        let reverted = Arc::new(AtomicUsize::new(0));

        let mut db = MockDatabase::new();
        db.campaigns.on_fetch_campaigns = {
            let campaign = campaign.clone();
            Box::new(move |_| Ok(vec![campaign.clone()]))
        };
        db.campaigns.on_fetch_campaign_by_id = Box::new(move |_| Ok(Some(campaign.clone())));
        db.jobs.on_count_by_campaign = Box::new(|_| Ok(0));
        db.campaigns.on_revert_start = {
            let reverted = Arc::clone(&reverted);
            Box::new(move |(mut campaign, status, scheduled_at)| {
                assert_eq!(status, CampaignStatus::Draft);
                assert_eq!(scheduled_at, None);
                reverted.fetch_add(1, Ordering::SeqCst);
                campaign.status = status;
                Ok(campaign)
            })
        };

        let locks = CampaignLocks::new();
        let events = EventBus::default();
        reconcile_running_campaigns(&db, &locks, &events).await.unwrap();

        assert_eq!(reverted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn drained_running_campaign_is_completed() {
        let campaign = stale_running_campaign();
        let completed = Arc::new(AtomicUsize::new(0));

        let mut db = MockDatabase::new();
        db.campaigns.on_fetch_campaigns = {
            let campaign = campaign.clone();
            Box::new(move |_| Ok(vec![campaign.clone()]))
        };
        db.campaigns.on_fetch_campaign_by_id = Box::new(move |_| Ok(Some(campaign.clone())));
        db.jobs.on_count_by_campaign = Box::new(|_| Ok(5));
        db.jobs.on_count_outstanding = Box::new(|_| Ok(0));
        db.campaigns.on_mark_terminal = {
            let completed = Arc::clone(&completed);
            Box::new(move |(mut campaign, status)| {
                assert_eq!(status, CampaignStatus::Completed);
                completed.fetch_add(1, Ordering::SeqCst);
                campaign.status = status;
                Ok(campaign)
            })
        };

        let locks = CampaignLocks::new();
        let events = EventBus::default();
        reconcile_running_campaigns(&db, &locks, &events).await.unwrap();

        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn freshly_started_campaign_is_left_alone() {
        let mut campaign = stale_running_campaign();
        campaign.modified_at = Utc::now();

        let mut db = MockDatabase::new();
        db.campaigns.on_fetch_campaigns = {
            let campaign = campaign.clone();
            Box::new(move |_| Ok(vec![campaign.clone()]))
        };
        db.campaigns.on_fetch_campaign_by_id = Box::new(move |_| Ok(Some(campaign.clone())));

        // the job counters keep their panicking defaults; touching them means
        // a start in progress could be reverted underneath its caller
        let locks = CampaignLocks::new();
        let events = EventBus::default();
        reconcile_running_campaigns(&db, &locks, &events).await.unwrap();
    }
}
