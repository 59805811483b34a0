use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson;
use mongodb::options::{FindOneAndUpdateOptions, ReturnDocument};

use crate::campaign::CampaignId;
use crate::channel::ChannelKind;
use crate::database::MongoJobStore;
use crate::error::Error;

use super::{DispatchJob, JobState};

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Batch insert for one campaign run. The unique (campaign_id, lead_id)
    /// index rejects duplicates from a racing second enqueue.
    async fn insert_jobs(&self, jobs: &[DispatchJob]) -> Result<(), Error>;

    /// Rollback of a partially failed batch insert.
    async fn delete_queued_jobs(&self, campaign_id: CampaignId) -> Result<(), Error>;

    async fn fetch_jobs_by_campaign(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Vec<DispatchJob>, Error>;

    /// Atomically claim the oldest due QUEUED job on the channel and mark it
    /// IN_FLIGHT. No two workers can claim the same job.
    async fn claim_queued_job(
        &self,
        channel: ChannelKind,
        now: DateTime<Utc>,
    ) -> Result<Option<DispatchJob>, Error>;

    async fn update_job_state(
        &self,
        job: DispatchJob,
        state: JobState,
        attempts: u32,
        error_code: Option<String>,
    ) -> Result<DispatchJob, Error>;

    /// Push an IN_FLIGHT job back to QUEUED, optionally further into the
    /// future for retry backoff.
    async fn requeue_job(
        &self,
        job: DispatchJob,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<DispatchJob, Error>;

    /// Mark every QUEUED job of the campaign SKIPPED; returns exactly the
    /// jobs that were flipped so the caller can write ledger records for
    /// them. A job claimed by a worker mid-call is left to the worker.
    async fn skip_queued_jobs(&self, campaign_id: CampaignId) -> Result<Vec<DispatchJob>, Error>;

    /// QUEUED + IN_FLIGHT count, the completion-detection input. Always a
    /// consistent store count, never an in-memory counter.
    async fn count_outstanding(&self, campaign_id: CampaignId) -> Result<u64, Error>;

    async fn count_by_campaign(&self, campaign_id: CampaignId) -> Result<u64, Error>;

    async fn count_by_channel_and_state(
        &self,
        channel: ChannelKind,
        state: JobState,
    ) -> Result<u64, Error>;
}

#[async_trait]
impl JobStore for MongoJobStore {
    #[tracing::instrument(skip(self, jobs))]
    async fn insert_jobs(&self, jobs: &[DispatchJob]) -> Result<(), Error> {
        self.insert_many(jobs, None).await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete_queued_jobs(&self, campaign_id: CampaignId) -> Result<(), Error> {
        self.delete_many(
            bson::doc! {
                "campaign_id": campaign_id,
                "state": bson::to_bson(&JobState::Queued)?,
            },
            None,
        )
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_jobs_by_campaign(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Vec<DispatchJob>, Error> {
        let jobs: Vec<DispatchJob> = self
            .find(bson::doc! { "campaign_id": campaign_id }, None)
            .await?
            .try_collect()
            .await?;

        Ok(jobs)
    }

    #[tracing::instrument(skip(self))]
    async fn claim_queued_job(
        &self,
        channel: ChannelKind,
        now: DateTime<Utc>,
    ) -> Result<Option<DispatchJob>, Error> {
        let options = FindOneAndUpdateOptions::builder()
            .sort(bson::doc! { "created_at": 1 })
            .return_document(ReturnDocument::After)
            .build();

        let job = self
            .find_one_and_update(
                bson::doc! {
                    "channel": bson::to_bson(&channel)?,
                    "state": bson::to_bson(&JobState::Queued)?,
                    "next_attempt_at": { "$lte": bson::DateTime::from_chrono(now) },
                },
                bson::doc! { "$set": {
                    "state": bson::to_bson(&JobState::InFlight)?,
                    "modified_at": bson::DateTime::from_chrono(now),
                } },
                options,
            )
            .await?;

        Ok(job)
    }

    #[tracing::instrument(skip(self, job))]
    async fn update_job_state(
        &self,
        mut job: DispatchJob,
        state: JobState,
        attempts: u32,
        error_code: Option<String>,
    ) -> Result<DispatchJob, Error> {
        let now = Utc::now();
        let old_modified_at = bson::DateTime::from_chrono(job.modified_at);

        let result = self
            .update_one(
                bson::doc! { "_id": job.id, "modified_at": old_modified_at },
                bson::doc! { "$set": {
                    "state": bson::to_bson(&state)?,
                    "attempts": attempts,
                    "last_error_code": error_code
                        .as_deref()
                        .map(bson::Bson::from)
                        .unwrap_or(bson::Bson::Null),
                    "modified_at": bson::DateTime::from_chrono(now),
                } },
                None,
            )
            .await?;

        if result.matched_count == 0 {
            return Err(Error::ConcurrentModificationDetected);
        }

        job.state = state;
        job.attempts = attempts;
        job.last_error_code = error_code;
        job.modified_at = now;

        Ok(job)
    }

    #[tracing::instrument(skip(self, job))]
    async fn requeue_job(
        &self,
        mut job: DispatchJob,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<DispatchJob, Error> {
        let now = Utc::now();
        let old_modified_at = bson::DateTime::from_chrono(job.modified_at);

        let result = self
            .update_one(
                bson::doc! { "_id": job.id, "modified_at": old_modified_at },
                bson::doc! { "$set": {
                    "state": bson::to_bson(&JobState::Queued)?,
                    "attempts": attempts,
                    "next_attempt_at": bson::DateTime::from_chrono(next_attempt_at),
                    "modified_at": bson::DateTime::from_chrono(now),
                } },
                None,
            )
            .await?;

        if result.matched_count == 0 {
            return Err(Error::ConcurrentModificationDetected);
        }

        job.state = JobState::Queued;
        job.attempts = attempts;
        job.next_attempt_at = next_attempt_at;
        job.modified_at = now;

        Ok(job)
    }

    #[tracing::instrument(skip(self))]
    async fn skip_queued_jobs(&self, campaign_id: CampaignId) -> Result<Vec<DispatchJob>, Error> {
        // One atomic flip per job, same shape as the worker claim, so a job
        // claimed concurrently can never end up both IN_FLIGHT and ledgered
        // as skipped.
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        let mut skipped = Vec::new();
        loop {
            let job = self
                .find_one_and_update(
                    bson::doc! {
                        "campaign_id": campaign_id,
                        "state": bson::to_bson(&JobState::Queued)?,
                    },
                    bson::doc! { "$set": {
                        "state": bson::to_bson(&JobState::Skipped)?,
                        "modified_at": bson::DateTime::from_chrono(Utc::now()),
                    } },
                    options.clone(),
                )
                .await?;

            match job {
                Some(job) => skipped.push(job),
                None => break,
            }
        }

        Ok(skipped)
    }

    #[tracing::instrument(skip(self))]
    async fn count_outstanding(&self, campaign_id: CampaignId) -> Result<u64, Error> {
        let outstanding = [JobState::Queued, JobState::InFlight]
            .iter()
            .map(bson::to_bson)
            .collect::<Result<Vec<_>, _>>()?;

        let count = self
            .count_documents(
                bson::doc! {
                    "campaign_id": campaign_id,
                    "state": { "$in": outstanding },
                },
                None,
            )
            .await?;

        Ok(count)
    }

    #[tracing::instrument(skip(self))]
    async fn count_by_campaign(&self, campaign_id: CampaignId) -> Result<u64, Error> {
        let count = self
            .count_documents(bson::doc! { "campaign_id": campaign_id }, None)
            .await?;

        Ok(count)
    }

    #[tracing::instrument(skip(self))]
    async fn count_by_channel_and_state(
        &self,
        channel: ChannelKind,
        state: JobState,
    ) -> Result<u64, Error> {
        let count = self
            .count_documents(
                bson::doc! {
                    "channel": bson::to_bson(&channel)?,
                    "state": bson::to_bson(&state)?,
                },
                None,
            )
            .await?;

        Ok(count)
    }
}
