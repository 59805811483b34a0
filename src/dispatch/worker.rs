use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tracing::warn;

use crate::audit;
use crate::campaign::{Campaign, CampaignStatus};
use crate::channel::{ChannelAdapter, ChannelKind, SendOutcome};
use crate::database::Database;
use crate::error::Error;
use crate::events::{CampaignEventKind, EventBus};
use crate::ledger::{DeliveryRecord, DeliveryResult};

use super::rate_limit::TokenBucket;
use super::{DispatchJob, JobState};

#[derive(Clone, Debug)]
pub struct DispatchConfig {
    pub workers_per_channel: usize,
    pub max_send_attempts: u32,
    pub retry_base_delay: Duration,
    pub poll_interval: Duration,
}

/// Per-channel worker pools draining the dispatch queue. Workers claim jobs
/// atomically from the store, so any number of workers (in any number of
/// processes) can run against the same queue.
pub struct Dispatcher {
    db: Arc<dyn Database>,
    events: EventBus,
    config: DispatchConfig,
    channels: HashMap<ChannelKind, (Arc<dyn ChannelAdapter>, Arc<TokenBucket>)>,
}

impl Dispatcher {
    pub fn new(db: Arc<dyn Database>, events: EventBus, config: DispatchConfig) -> Dispatcher {
        Dispatcher {
            db,
            events,
            config,
            channels: HashMap::new(),
        }
    }

    pub fn register_channel(&mut self, adapter: Arc<dyn ChannelAdapter>, rate_per_sec: f64) {
        let bucket = Arc::new(TokenBucket::new(rate_per_sec, rate_per_sec.max(1.0)));
        self.channels.insert(adapter.channel(), (adapter, bucket));
    }

    pub fn spawn(self) {
        for (channel, (adapter, bucket)) in self.channels {
            for worker in 0..self.config.workers_per_channel {
                let db = Arc::clone(&self.db);
                let adapter = Arc::clone(&adapter);
                let bucket = Arc::clone(&bucket);
                let events = self.events.clone();
                let config = self.config.clone();

                tokio::spawn(async move {
                    worker_loop(db, adapter, bucket, events, config, channel, worker).await;
                });
            }
        }
    }
}

async fn worker_loop(
    db: Arc<dyn Database>,
    adapter: Arc<dyn ChannelAdapter>,
    bucket: Arc<TokenBucket>,
    events: EventBus,
    config: DispatchConfig,
    channel: ChannelKind,
    worker: usize,
) {
    loop {
        match db.jobs().claim_queued_job(channel, Utc::now()).await {
            Ok(Some(job)) => {
                let job_id = job.id;
                if let Err(err) =
                    process_claimed_job(&*db, &*adapter, &bucket, &events, &config, job).await
                {
                    warn!(%job_id, queue = channel.queue_name(), worker, %err, "job processing failed");
                }
            }
            Ok(None) => tokio::time::sleep(config.poll_interval).await,
            Err(err) => {
                warn!(queue = channel.queue_name(), worker, %err, "failed to claim job");
                tokio::time::sleep(config.poll_interval).await;
            }
        }
    }
}

/// Drive one claimed job to its next state. The job is IN_FLIGHT and owned by
/// this worker; every exit path moves it somewhere (terminal or back to
/// QUEUED), so a processing bug cannot strand it.
pub async fn process_claimed_job(
    db: &dyn Database,
    adapter: &dyn ChannelAdapter,
    bucket: &TokenBucket,
    events: &EventBus,
    config: &DispatchConfig,
    job: DispatchJob,
) -> Result<(), Error> {
    let campaign = db.campaigns().fetch_campaign_by_id(job.campaign_id).await?;

    let campaign = match campaign {
        None => {
            let attempts = job.attempts;
            let job = db
                .jobs()
                .update_job_state(
                    job,
                    JobState::Skipped,
                    attempts,
                    Some("campaign_missing".to_string()),
                )
                .await?;
            record_outcome(db, events, &job, DeliveryResult::SkippedIneligible).await?;
            return Ok(());
        }
        Some(campaign) if campaign.status.is_terminal() => {
            let attempts = job.attempts;
            let job = db
                .jobs()
                .update_job_state(
                    job,
                    JobState::Skipped,
                    attempts,
                    Some("campaign_inactive".to_string()),
                )
                .await?;
            record_outcome(db, events, &job, DeliveryResult::SkippedIneligible).await?;
            return Ok(());
        }
        Some(campaign) if campaign.status != CampaignStatus::Running => {
            // Paused, or a start that was rolled back underneath us. Back to
            // the queue untouched; resume, rollback cleanup, or a retried
            // start decides what happens to it.
            let attempts = job.attempts;
            let next = Utc::now() + chrono_interval(config.poll_interval);
            db.jobs().requeue_job(job, attempts, next).await?;
            return Ok(());
        }
        Some(campaign) => campaign,
    };

    if !bucket.try_acquire() {
        let attempts = job.attempts;
        let next = Utc::now() + chrono::Duration::milliseconds(250);
        db.jobs().requeue_job(job, attempts, next).await?;
        return Ok(());
    }

    let attempt = job.attempts + 1;
    let outcome = adapter.send(&job.recipient, &job.content).await;

    match outcome {
        SendOutcome::Sent { .. } => {
            let job = db
                .jobs()
                .update_job_state(job, JobState::Sent, attempt, None)
                .await?;
            record_outcome(db, events, &job, DeliveryResult::Sent).await?;
            maybe_complete_campaign(db, events, campaign).await?;
        }
        SendOutcome::Permanent { error_code } => {
            let job = db
                .jobs()
                .update_job_state(job, JobState::Failed, attempt, Some(error_code))
                .await?;
            record_outcome(db, events, &job, DeliveryResult::Failed).await?;
            maybe_complete_campaign(db, events, campaign).await?;
        }
        SendOutcome::RateLimited => {
            retry_or_fail(db, events, config, campaign, job, attempt, "rate_limited", DeliveryResult::RateLimited)
                .await?;
        }
        SendOutcome::Transient { error_code } => {
            retry_or_fail(db, events, config, campaign, job, attempt, &error_code, DeliveryResult::Failed)
                .await?;
        }
    }

    Ok(())
}

async fn retry_or_fail(
    db: &dyn Database,
    events: &EventBus,
    config: &DispatchConfig,
    campaign: Campaign,
    job: DispatchJob,
    attempt: u32,
    error_code: &str,
    result: DeliveryResult,
) -> Result<(), Error> {
    if attempt >= config.max_send_attempts {
        let job = db
            .jobs()
            .update_job_state(job, JobState::Failed, attempt, Some(error_code.to_string()))
            .await?;
        record_outcome(db, events, &job, DeliveryResult::Failed).await?;
        maybe_complete_campaign(db, events, campaign).await?;
    } else {
        let next = Utc::now() + retry_delay(config, attempt);
        let job = db.jobs().requeue_job(job, attempt, next).await?;
        db.deliveries()
            .append_record(&DeliveryRecord::new(
                job.campaign_id,
                job.id,
                job.lead_id,
                attempt,
                result,
                Some(error_code.to_string()),
            ))
            .await?;
        events.publish(job.campaign_id, CampaignEventKind::StatsChanged);
    }

    Ok(())
}

async fn record_outcome(
    db: &dyn Database,
    events: &EventBus,
    job: &DispatchJob,
    result: DeliveryResult,
) -> Result<(), Error> {
    db.deliveries()
        .append_record(&DeliveryRecord::new(
            job.campaign_id,
            job.id,
            job.lead_id,
            job.attempts,
            result,
            job.last_error_code.clone(),
        ))
        .await?;
    events.publish(job.campaign_id, CampaignEventKind::StatsChanged);

    Ok(())
}

/// Complete the campaign once its last outstanding job reaches a terminal
/// state. The count comes from the store, so whichever worker finishes last
/// sees zero; a lost `mark_terminal` race means someone else already did it.
async fn maybe_complete_campaign(
    db: &dyn Database,
    events: &EventBus,
    campaign: Campaign,
) -> Result<(), Error> {
    if campaign.status != CampaignStatus::Running {
        return Ok(());
    }
    if db.jobs().count_outstanding(campaign.id).await? > 0 {
        return Ok(());
    }

    let campaign_id = campaign.id;
    match db
        .campaigns()
        .mark_terminal(campaign, CampaignStatus::Completed)
        .await
    {
        Ok(_) => {
            audit::record(db, "COMPLETE_CAMPAIGN", "campaign", campaign_id.to_string(), "system", None)
                .await;
            events.publish(campaign_id, CampaignEventKind::StatusChanged);
        }
        Err(Error::ConcurrentModificationDetected) => {}
        Err(err) => return Err(err),
    }

    Ok(())
}

/// Exponential backoff from the base delay, with jitter so a burst of
/// transient failures does not retry in lockstep.
fn retry_delay(config: &DispatchConfig, attempt: u32) -> chrono::Duration {
    let base_ms = config.retry_base_delay.as_millis() as u64;
    let exponent = attempt.saturating_sub(1).min(16);
    let delay_ms = base_ms.saturating_mul(1 << exponent);
    let jitter_ms = rand::thread_rng().gen_range(0..250);

    chrono::Duration::milliseconds((delay_ms + jitter_ms) as i64)
}

fn chrono_interval(interval: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(interval.as_millis() as i64)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration};

    use crate::campaign::{CampaignType, TargetAudience};
    use crate::database::test::MockDatabase;
    use crate::dispatch::DispatchJobId;
    use crate::lead::LeadId;

    use super::*;

    struct MockAdapter {
        on_send: Box<dyn Fn(&str, &str) -> SendOutcome + Send + Sync>,
    }

    impl MockAdapter {
        fn returning(outcome: SendOutcome) -> MockAdapter {
            MockAdapter {
                on_send: Box::new(move |_, _| outcome.clone()),
            }
        }

        fn unreachable() -> MockAdapter {
            MockAdapter {
                on_send: Box::new(|_, _| panic!("unexpected call to send")),
            }
        }
    }

    #[async_trait]
    impl ChannelAdapter for MockAdapter {
        fn channel(&self) -> ChannelKind {
            ChannelKind::Messenger
        }

        async fn send(&self, recipient: &str, content: &str) -> SendOutcome {
            (self.on_send)(recipient, content)
        }
    }

    fn config() -> DispatchConfig {
        DispatchConfig {
            workers_per_channel: 1,
            max_send_attempts: 3,
            retry_base_delay: Duration::from_millis(2000),
            poll_interval: Duration::from_millis(500),
        }
    }

    fn running_campaign() -> Campaign {
        let now = Utc::now();
        Campaign {
            id: "CPN-4B57176948AD4E2F9D22DD41D405F891".parse().unwrap(),
            name: "Spring promo".to_string(),
            description: None,
            campaign_type: CampaignType::MessengerBroadcast,
            status: CampaignStatus::Running,
            template_id: None,
            message_content: Some("Hi".to_string()),
            audience: TargetAudience::default(),
            scheduled_at: None,
            started_at: Some(now),
            completed_at: None,
            created_at: now,
            modified_at: now,
        }
    }

    fn claimed_job(campaign: &Campaign) -> DispatchJob {
        let now = Utc::now();
        DispatchJob {
            id: DispatchJobId::new(),
            campaign_id: campaign.id,
            lead_id: LeadId::new(),
            channel: ChannelKind::Messenger,
            recipient: "fb-1001".to_string(),
            content: "Hi Ada".to_string(),
            state: JobState::InFlight,
            attempts: 0,
            next_attempt_at: now,
            last_error_code: None,
            created_at: now,
            modified_at: now,
        }
    }

    fn apply_update(
        (mut job, state, attempts, error_code): (DispatchJob, JobState, u32, Option<String>),
    ) -> DispatchJob {
        job.state = state;
        job.attempts = attempts;
        job.last_error_code = error_code;
        job
    }

    #[tokio::test]
    async fn successful_send_marks_the_job_sent_and_ledgers_it() {
        let campaign = running_campaign();
        let job = claimed_job(&campaign);
        let recorded = Arc::new(AtomicUsize::new(0));

        let mut db = MockDatabase::new();
        db.campaigns.on_fetch_campaign_by_id = {
            let campaign = campaign.clone();
            Box::new(move |_| Ok(Some(campaign.clone())))
        };
        db.jobs.on_update_job_state = Box::new(|update| {
            assert_eq!(update.1, JobState::Sent);
            assert_eq!(update.2, 1);
            Ok(apply_update(update))
        });
        db.jobs.on_count_outstanding = Box::new(|_| Ok(4));
        db.deliveries.on_append_record = {
            let recorded = Arc::clone(&recorded);
            Box::new(move |record| {
                assert_eq!(record.result, DeliveryResult::Sent);
                assert_eq!(record.attempt, 1);
                recorded.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };

        let adapter = MockAdapter::returning(SendOutcome::Sent {
            provider_message_id: Some("mid.123".to_string()),
        });
        let bucket = TokenBucket::new(100.0, 100.0);
        let events = EventBus::default();

        process_claimed_job(&db, &adapter, &bucket, &events, &config(), job)
            .await
            .unwrap();

        assert_eq!(recorded.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn last_terminal_job_completes_the_campaign() {
        let campaign = running_campaign();
        let job = claimed_job(&campaign);
        let completed = Arc::new(AtomicBool::new(false));

        let mut db = MockDatabase::new();
        db.campaigns.on_fetch_campaign_by_id = {
            let campaign = campaign.clone();
            Box::new(move |_| Ok(Some(campaign.clone())))
        };
        db.jobs.on_update_job_state = Box::new(|update| Ok(apply_update(update)));
        db.jobs.on_count_outstanding = Box::new(|_| Ok(0));
        db.deliveries.on_append_record = Box::new(|_| Ok(()));
        db.campaigns.on_mark_terminal = {
            let completed = Arc::clone(&completed);
            Box::new(move |(mut campaign, status)| {
                assert_eq!(status, CampaignStatus::Completed);
                completed.store(true, Ordering::SeqCst);
                campaign.status = status;
                Ok(campaign)
            })
        };

        let adapter = MockAdapter::returning(SendOutcome::Sent {
            provider_message_id: None,
        });
        let bucket = TokenBucket::new(100.0, 100.0);
        let events = EventBus::default();

        process_claimed_job(&db, &adapter, &bucket, &events, &config(), job)
            .await
            .unwrap();

        assert!(completed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn transient_failure_requeues_with_growing_backoff() {
        let campaign = running_campaign();
        let job = claimed_job(&campaign);

        let mut db = MockDatabase::new();
        db.campaigns.on_fetch_campaign_by_id = {
            let campaign = campaign.clone();
            Box::new(move |_| Ok(Some(campaign.clone())))
        };
        let before: DateTime<Utc> = Utc::now();
        db.jobs.on_requeue_job = Box::new(move |(mut job, attempts, next_attempt_at)| {
            assert_eq!(attempts, 1);
            assert!(next_attempt_at >= before + ChronoDuration::milliseconds(2000));
            job.attempts = attempts;
            job.next_attempt_at = next_attempt_at;
            job.state = JobState::Queued;
            Ok(job)
        });
        db.deliveries.on_append_record = Box::new(|record| {
            assert_eq!(record.result, DeliveryResult::Failed);
            assert_eq!(record.error_code.as_deref(), Some("network"));
            Ok(())
        });

        let adapter = MockAdapter::returning(SendOutcome::Transient {
            error_code: "network".to_string(),
        });
        let bucket = TokenBucket::new(100.0, 100.0);
        let events = EventBus::default();

        process_claimed_job(&db, &adapter, &bucket, &events, &config(), job)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn transient_failure_at_the_attempt_ceiling_fails_the_job() {
        let campaign = running_campaign();
        let mut job = claimed_job(&campaign);
        job.attempts = 2;

        let mut db = MockDatabase::new();
        db.campaigns.on_fetch_campaign_by_id = {
            let campaign = campaign.clone();
            Box::new(move |_| Ok(Some(campaign.clone())))
        };
        db.jobs.on_update_job_state = Box::new(|update| {
            assert_eq!(update.1, JobState::Failed);
            assert_eq!(update.2, 3);
            assert_eq!(update.3.as_deref(), Some("network"));
            Ok(apply_update(update))
        });
        db.jobs.on_count_outstanding = Box::new(|_| Ok(1));
        db.deliveries.on_append_record = Box::new(|record| {
            assert_eq!(record.result, DeliveryResult::Failed);
            Ok(())
        });

        let adapter = MockAdapter::returning(SendOutcome::Transient {
            error_code: "network".to_string(),
        });
        let bucket = TokenBucket::new(100.0, 100.0);
        let events = EventBus::default();

        // requeue_job's default handler would panic on a fourth attempt
        process_claimed_job(&db, &adapter, &bucket, &events, &config(), job)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn permanent_failure_is_never_retried() {
        let campaign = running_campaign();
        let job = claimed_job(&campaign);

        let mut db = MockDatabase::new();
        db.campaigns.on_fetch_campaign_by_id = {
            let campaign = campaign.clone();
            Box::new(move |_| Ok(Some(campaign.clone())))
        };
        db.jobs.on_update_job_state = Box::new(|update| {
            assert_eq!(update.1, JobState::Failed);
            assert_eq!(update.3.as_deref(), Some("551"));
            Ok(apply_update(update))
        });
        db.jobs.on_count_outstanding = Box::new(|_| Ok(1));
        db.deliveries.on_append_record = Box::new(|record| {
            assert_eq!(record.result, DeliveryResult::Failed);
            assert_eq!(record.attempt, 1);
            Ok(())
        });

        let adapter = MockAdapter::returning(SendOutcome::Permanent {
            error_code: "551".to_string(),
        });
        let bucket = TokenBucket::new(100.0, 100.0);
        let events = EventBus::default();

        process_claimed_job(&db, &adapter, &bucket, &events, &config(), job)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn job_of_a_paused_campaign_is_released_without_an_attempt() {
        let mut campaign = running_campaign();
        campaign.status = CampaignStatus::Paused;
        let job = claimed_job(&campaign);

        let mut db = MockDatabase::new();
        db.campaigns.on_fetch_campaign_by_id = Box::new(move |_| Ok(Some(campaign.clone())));
        db.jobs.on_requeue_job = Box::new(|(mut job, attempts, next_attempt_at)| {
            assert_eq!(attempts, 0);
            job.attempts = attempts;
            job.next_attempt_at = next_attempt_at;
            job.state = JobState::Queued;
            Ok(job)
        });

        // the adapter and the ledger keep their panicking defaults
        let adapter = MockAdapter::unreachable();
        let bucket = TokenBucket::new(100.0, 100.0);
        let events = EventBus::default();

        process_claimed_job(&db, &adapter, &bucket, &events, &config(), job)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn job_of_a_draft_campaign_is_released_without_sending() {
        // Reachable when a failed start is rolled back after its partial
        // enqueue; the job must not produce a send for a DRAFT campaign.
        let mut campaign = running_campaign();
        campaign.status = CampaignStatus::Draft;
        let job = claimed_job(&campaign);

        let mut db = MockDatabase::new();
        db.campaigns.on_fetch_campaign_by_id = Box::new(move |_| Ok(Some(campaign.clone())));
        db.jobs.on_requeue_job = Box::new(|(mut job, attempts, next_attempt_at)| {
            assert_eq!(attempts, 0);
            job.attempts = attempts;
            job.next_attempt_at = next_attempt_at;
            job.state = JobState::Queued;
            Ok(job)
        });

        // the adapter and the ledger keep their panicking defaults
        let adapter = MockAdapter::unreachable();
        let bucket = TokenBucket::new(100.0, 100.0);
        let events = EventBus::default();

        process_claimed_job(&db, &adapter, &bucket, &events, &config(), job)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn job_of_a_cancelled_campaign_is_skipped_and_ledgered() {
        let mut campaign = running_campaign();
        campaign.status = CampaignStatus::Cancelled;
        let job = claimed_job(&campaign);

        let mut db = MockDatabase::new();
        db.campaigns.on_fetch_campaign_by_id = Box::new(move |_| Ok(Some(campaign.clone())));
        db.jobs.on_update_job_state = Box::new(|update| {
            assert_eq!(update.1, JobState::Skipped);
            assert_eq!(update.3.as_deref(), Some("campaign_inactive"));
            Ok(apply_update(update))
        });
        db.deliveries.on_append_record = Box::new(|record| {
            assert_eq!(record.result, DeliveryResult::SkippedIneligible);
            Ok(())
        });

        let adapter = MockAdapter::unreachable();
        let bucket = TokenBucket::new(100.0, 100.0);
        let events = EventBus::default();

        process_claimed_job(&db, &adapter, &bucket, &events, &config(), job)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn empty_rate_bucket_defers_the_job_without_sending() {
        let campaign = running_campaign();
        let job = claimed_job(&campaign);

        let mut db = MockDatabase::new();
        db.campaigns.on_fetch_campaign_by_id = Box::new(move |_| Ok(Some(campaign.clone())));
        let before = Utc::now();
        db.jobs.on_requeue_job = Box::new(move |(mut job, attempts, next_attempt_at)| {
            assert_eq!(attempts, 0);
            assert!(next_attempt_at > before);
            job.attempts = attempts;
            job.next_attempt_at = next_attempt_at;
            job.state = JobState::Queued;
            Ok(job)
        });

        let adapter = MockAdapter::unreachable();
        let bucket = TokenBucket::new(1.0, 1.0);
        assert!(bucket.try_acquire());
        let events = EventBus::default();

        process_claimed_job(&db, &adapter, &bucket, &events, &config(), job)
            .await
            .unwrap();
    }
}
