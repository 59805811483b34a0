use async_trait::async_trait;
use mongodb::bson;

use crate::database::MongoTemplateStore;
use crate::error::Error;

use super::{Template, TemplateId};

#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn insert_template(&self, template: &Template) -> Result<(), Error>;

    async fn fetch_template_by_id(
        &self,
        template_id: TemplateId,
    ) -> Result<Option<Template>, Error>;
}

#[async_trait]
impl TemplateStore for MongoTemplateStore {
    #[tracing::instrument(skip(self))]
    async fn insert_template(&self, template: &Template) -> Result<(), Error> {
        self.insert_one(template, None).await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_template_by_id(
        &self,
        template_id: TemplateId,
    ) -> Result<Option<Template>, Error> {
        let template = self.find_one(bson::doc! { "_id": template_id }, None).await?;

        Ok(template)
    }
}
