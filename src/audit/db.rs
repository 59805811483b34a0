use async_trait::async_trait;

use crate::database::MongoAuditStore;
use crate::error::Error;

use super::AuditEntry;

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn insert_entry(&self, entry: &AuditEntry) -> Result<(), Error>;
}

#[async_trait]
impl AuditStore for MongoAuditStore {
    #[tracing::instrument(skip(self, entry))]
    async fn insert_entry(&self, entry: &AuditEntry) -> Result<(), Error> {
        self.insert_one(entry, None).await?;

        Ok(())
    }
}
