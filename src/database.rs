use mongodb::{bson, Collection, Database as MongoDb};

use crate::audit::db::AuditStore;
use crate::audit::AuditEntry;
use crate::campaign::db::CampaignStore;
use crate::campaign::Campaign;
use crate::dispatch::db::JobStore;
use crate::dispatch::DispatchJob;
use crate::error::Error;
use crate::lead::db::LeadStore;
use crate::lead::Lead;
use crate::ledger::db::DeliveryStore;
use crate::ledger::DeliveryRecord;
use crate::template::db::TemplateStore;
use crate::template::Template;

pub type MongoCampaignStore = Collection<Campaign>;
pub type MongoLeadStore = Collection<Lead>;
pub type MongoTemplateStore = Collection<Template>;
pub type MongoJobStore = Collection<DispatchJob>;
pub type MongoDeliveryStore = Collection<DeliveryRecord>;
pub type MongoAuditStore = Collection<AuditEntry>;

/// Aggregate persistence handle. Managers and workers depend on this trait
/// only, so unit tests can substitute the closure-driven mock below.
pub trait Database: Send + Sync {
    fn campaigns(&self) -> &dyn CampaignStore;
    fn leads(&self) -> &dyn LeadStore;
    fn templates(&self) -> &dyn TemplateStore;
    fn jobs(&self) -> &dyn JobStore;
    fn deliveries(&self) -> &dyn DeliveryStore;
    fn audits(&self) -> &dyn AuditStore;
}

#[derive(Clone, Debug)]
pub struct MongoDatabase {
    campaigns: Collection<Campaign>,
    leads: Collection<Lead>,
    templates: Collection<Template>,
    jobs: Collection<DispatchJob>,
    deliveries: Collection<DeliveryRecord>,
    audits: Collection<AuditEntry>,
    db: MongoDb,
}

impl MongoDatabase {
    pub async fn initialize(db: MongoDb) -> Result<MongoDatabase, Error> {
        // The unique job index backs the at-most-one-job-per-(campaign, lead)
        // invariant even across racing processes.
        db.run_command(
            bson::doc! {
                "createIndexes": "jobs",
                "indexes": [
                    {
                        "key": { "campaign_id": 1, "lead_id": 1 },
                        "name": "by_campaign_lead",
                        "unique": true,
                    },
                    {
                        "key": { "channel": 1, "state": 1, "next_attempt_at": 1 },
                        "name": "by_channel_claimable",
                    },
                    { "key": { "campaign_id": 1, "state": 1 }, "name": "by_campaign_state" },
                ]
            },
            None,
        )
        .await?;

        db.run_command(
            bson::doc! {
                "createIndexes": "deliveries",
                "indexes": [
                    {
                        "key": { "campaign_id": 1, "recorded_at": 1 },
                        "name": "by_campaign_recorded",
                    },
                ]
            },
            None,
        )
        .await?;

        db.run_command(
            bson::doc! {
                "createIndexes": "campaigns",
                "indexes": [
                    { "key": { "status": 1, "scheduled_at": 1 }, "name": "by_status_schedule" },
                ]
            },
            None,
        )
        .await?;

        Ok(MongoDatabase {
            campaigns: db.collection("campaigns"),
            leads: db.collection("leads"),
            templates: db.collection("templates"),
            jobs: db.collection("jobs"),
            deliveries: db.collection("deliveries"),
            audits: db.collection("audit_logs"),
            db,
        })
    }

    pub async fn drop(&self) -> Result<(), Error> {
        self.db.drop(None).await?;
        Ok(())
    }
}

impl Database for MongoDatabase {
    fn campaigns(&self) -> &dyn CampaignStore {
        &self.campaigns
    }

    fn leads(&self) -> &dyn LeadStore {
        &self.leads
    }

    fn templates(&self) -> &dyn TemplateStore {
        &self.templates
    }

    fn jobs(&self) -> &dyn JobStore {
        &self.jobs
    }

    fn deliveries(&self) -> &dyn DeliveryStore {
        &self.deliveries
    }

    fn audits(&self) -> &dyn AuditStore {
        &self.audits
    }
}
