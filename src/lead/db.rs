use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson;
use mongodb::options::FindOptions;

use crate::database::MongoLeadStore;
use crate::error::Error;

use super::Lead;

#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn insert_lead(&self, lead: &Lead) -> Result<(), Error>;

    /// Full population snapshot in creation order; the resolver depends on
    /// this order being stable so job creation is deterministic.
    async fn fetch_leads(&self) -> Result<Vec<Lead>, Error>;
}

#[async_trait]
impl LeadStore for MongoLeadStore {
    #[tracing::instrument(skip(self))]
    async fn insert_lead(&self, lead: &Lead) -> Result<(), Error> {
        self.insert_one(lead, None).await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_leads(&self) -> Result<Vec<Lead>, Error> {
        let options = FindOptions::builder()
            .sort(bson::doc! { "created_at": 1 })
            .build();

        let leads: Vec<Lead> = self.find(bson::doc! {}, options).await?.try_collect().await?;

        Ok(leads)
    }
}
