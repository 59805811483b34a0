use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson;
use mongodb::options::FindOptions;

use crate::campaign::CampaignId;
use crate::database::MongoDeliveryStore;
use crate::error::Error;

use super::DeliveryRecord;

#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Append-only; there is deliberately no update or delete.
    async fn append_record(&self, record: &DeliveryRecord) -> Result<(), Error>;

    /// All records for the campaign in recording order, so a fold that keeps
    /// the last record per job sees the final outcome.
    async fn fetch_records_by_campaign(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Vec<DeliveryRecord>, Error>;
}

#[async_trait]
impl DeliveryStore for MongoDeliveryStore {
    #[tracing::instrument(skip(self, record))]
    async fn append_record(&self, record: &DeliveryRecord) -> Result<(), Error> {
        self.insert_one(record, None).await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_records_by_campaign(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Vec<DeliveryRecord>, Error> {
        let options = FindOptions::builder()
            .sort(bson::doc! { "recorded_at": 1 })
            .build();

        let records: Vec<DeliveryRecord> = self
            .find(bson::doc! { "campaign_id": campaign_id }, options)
            .await?
            .try_collect()
            .await?;

        Ok(records)
    }
}
