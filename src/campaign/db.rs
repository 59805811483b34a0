use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson;
use mongodb::options::FindOptions;

use crate::database::MongoCampaignStore;
use crate::error::Error;

use super::{Campaign, CampaignId, CampaignStatus, CampaignType};

#[derive(Clone, Copy, Debug, Default)]
pub struct CampaignFilter {
    pub status: Option<CampaignStatus>,
    pub campaign_type: Option<CampaignType>,
}

#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn insert_campaign(&self, campaign: &Campaign) -> Result<(), Error>;

    async fn fetch_campaigns(&self, filter: CampaignFilter) -> Result<Vec<Campaign>, Error>;

    async fn fetch_campaign_by_id(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Option<Campaign>, Error>;

    /// SCHEDULED campaigns whose start time has passed.
    async fn fetch_due_campaigns(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>, Error>;

    /// Replace the campaign's editable fields; fails on concurrent
    /// modification.
    async fn update_campaign(&self, campaign: Campaign) -> Result<Campaign, Error>;

    /// Flip DRAFT/SCHEDULED to RUNNING. The status-gated update is the
    /// exactly-one-winner point for concurrent starts: only one caller can
    /// match the gate, so only one resolution pass ever happens.
    async fn mark_running(&self, campaign: Campaign) -> Result<Campaign, Error>;

    /// Undo a `mark_running` whose enqueue step failed, restoring the prior
    /// status and schedule.
    async fn revert_start(
        &self,
        campaign: Campaign,
        status: CampaignStatus,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<Campaign, Error>;

    async fn update_campaign_status(
        &self,
        campaign: Campaign,
        status: CampaignStatus,
    ) -> Result<Campaign, Error>;

    /// Move to COMPLETED or CANCELLED and stamp `completed_at`.
    async fn mark_terminal(
        &self,
        campaign: Campaign,
        status: CampaignStatus,
    ) -> Result<Campaign, Error>;
}

#[async_trait]
impl CampaignStore for MongoCampaignStore {
    #[tracing::instrument(skip(self, campaign))]
    async fn insert_campaign(&self, campaign: &Campaign) -> Result<(), Error> {
        self.insert_one(campaign, None).await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_campaigns(&self, filter: CampaignFilter) -> Result<Vec<Campaign>, Error> {
        let mut query = bson::doc! {};
        if let Some(status) = filter.status {
            query.insert("status", bson::to_bson(&status)?);
        }
        if let Some(campaign_type) = filter.campaign_type {
            query.insert("campaign_type", bson::to_bson(&campaign_type)?);
        }

        let options = FindOptions::builder()
            .sort(bson::doc! { "created_at": -1 })
            .build();

        let campaigns: Vec<Campaign> = self.find(query, options).await?.try_collect().await?;

        Ok(campaigns)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_campaign_by_id(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Option<Campaign>, Error> {
        let campaign = self.find_one(bson::doc! { "_id": campaign_id }, None).await?;

        Ok(campaign)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_due_campaigns(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>, Error> {
        let query = bson::doc! {
            "status": bson::to_bson(&CampaignStatus::Scheduled)?,
            "scheduled_at": { "$lte": bson::DateTime::from_chrono(now) },
        };

        let campaigns: Vec<Campaign> = self.find(query, None).await?.try_collect().await?;

        Ok(campaigns)
    }

    #[tracing::instrument(skip(self, campaign))]
    async fn update_campaign(&self, mut campaign: Campaign) -> Result<Campaign, Error> {
        let old_modified_at = bson::DateTime::from_chrono(campaign.modified_at);
        campaign.modified_at = Utc::now();

        let result = self
            .replace_one(
                bson::doc! { "_id": campaign.id, "modified_at": old_modified_at },
                &campaign,
                None,
            )
            .await?;

        if result.matched_count == 0 {
            return Err(Error::ConcurrentModificationDetected);
        }

        Ok(campaign)
    }

    #[tracing::instrument(skip(self, campaign))]
    async fn mark_running(&self, mut campaign: Campaign) -> Result<Campaign, Error> {
        let now = Utc::now();
        let startable = [CampaignStatus::Draft, CampaignStatus::Scheduled]
            .iter()
            .map(bson::to_bson)
            .collect::<Result<Vec<_>, _>>()?;

        let result = self
            .update_one(
                bson::doc! { "_id": campaign.id, "status": { "$in": startable } },
                bson::doc! { "$set": {
                    "status": bson::to_bson(&CampaignStatus::Running)?,
                    "started_at": bson::DateTime::from_chrono(now),
                    "scheduled_at": bson::Bson::Null,
                    "modified_at": bson::DateTime::from_chrono(now),
                } },
                None,
            )
            .await?;

        if result.matched_count == 0 {
            return Err(Error::ConcurrentModificationDetected);
        }

        campaign.status = CampaignStatus::Running;
        campaign.started_at = Some(now);
        campaign.scheduled_at = None;
        campaign.modified_at = now;

        Ok(campaign)
    }

    #[tracing::instrument(skip(self, campaign))]
    async fn revert_start(
        &self,
        mut campaign: Campaign,
        status: CampaignStatus,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<Campaign, Error> {
        let now = Utc::now();
        let old_modified_at = bson::DateTime::from_chrono(campaign.modified_at);

        let result = self
            .update_one(
                bson::doc! { "_id": campaign.id, "modified_at": old_modified_at },
                bson::doc! { "$set": {
                    "status": bson::to_bson(&status)?,
                    "started_at": bson::Bson::Null,
                    "scheduled_at": scheduled_at
                        .map(bson::DateTime::from_chrono)
                        .map(bson::Bson::DateTime)
                        .unwrap_or(bson::Bson::Null),
                    "modified_at": bson::DateTime::from_chrono(now),
                } },
                None,
            )
            .await?;

        if result.matched_count == 0 {
            return Err(Error::ConcurrentModificationDetected);
        }

        campaign.status = status;
        campaign.started_at = None;
        campaign.scheduled_at = scheduled_at;
        campaign.modified_at = now;

        Ok(campaign)
    }

    #[tracing::instrument(skip(self, campaign))]
    async fn update_campaign_status(
        &self,
        mut campaign: Campaign,
        status: CampaignStatus,
    ) -> Result<Campaign, Error> {
        let now = Utc::now();
        let old_modified_at = bson::DateTime::from_chrono(campaign.modified_at);

        let result = self
            .update_one(
                bson::doc! { "_id": campaign.id, "modified_at": old_modified_at },
                bson::doc! { "$set": {
                    "status": bson::to_bson(&status)?,
                    "modified_at": bson::DateTime::from_chrono(now),
                } },
                None,
            )
            .await?;

        if result.matched_count == 0 {
            return Err(Error::ConcurrentModificationDetected);
        }

        campaign.status = status;
        campaign.modified_at = now;

        Ok(campaign)
    }

    #[tracing::instrument(skip(self, campaign))]
    async fn mark_terminal(
        &self,
        mut campaign: Campaign,
        status: CampaignStatus,
    ) -> Result<Campaign, Error> {
        let now = Utc::now();
        let old_modified_at = bson::DateTime::from_chrono(campaign.modified_at);

        let result = self
            .update_one(
                bson::doc! { "_id": campaign.id, "modified_at": old_modified_at },
                bson::doc! { "$set": {
                    "status": bson::to_bson(&status)?,
                    "completed_at": bson::DateTime::from_chrono(now),
                    "modified_at": bson::DateTime::from_chrono(now),
                } },
                None,
            )
            .await?;

        if result.matched_count == 0 {
            return Err(Error::ConcurrentModificationDetected);
        }

        campaign.status = status;
        campaign.completed_at = Some(now);
        campaign.modified_at = now;

        Ok(campaign)
    }
}
