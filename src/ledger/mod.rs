use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::campaign::CampaignId;
use crate::dispatch::DispatchJobId;
use crate::lead::LeadId;
use crate::typedid::{TypedId, TypedIdMarker};

pub mod db;
pub mod manager;

pub type DeliveryRecordId = TypedId<DeliveryRecord>;

/// Append-only outcome of one dispatch attempt. Records are never mutated;
/// campaign statistics are always a fold over them, so the aggregates cannot
/// drift from the attempt log.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DeliveryRecord {
    #[serde(rename = "_id")]
    pub id: DeliveryRecordId,
    pub campaign_id: CampaignId,
    pub job_id: DispatchJobId,
    pub lead_id: LeadId,
    pub attempt: u32,
    pub result: DeliveryResult,
    pub error_code: Option<String>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub recorded_at: DateTime<Utc>,
}

impl DeliveryRecord {
    pub fn new(
        campaign_id: CampaignId,
        job_id: DispatchJobId,
        lead_id: LeadId,
        attempt: u32,
        result: DeliveryResult,
        error_code: Option<String>,
    ) -> DeliveryRecord {
        DeliveryRecord {
            id: DeliveryRecordId::new(),
            campaign_id,
            job_id,
            lead_id,
            attempt,
            result,
            error_code,
            recorded_at: Utc::now(),
        }
    }
}

impl TypedIdMarker for DeliveryRecord {
    fn tag() -> &'static str {
        "DLV"
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryResult {
    Sent,
    Failed,
    RateLimited,
    SkippedIneligible,
}
