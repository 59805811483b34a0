use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::campaign::CampaignId;
use crate::channel::ChannelKind;
use crate::lead::LeadId;
use crate::typedid::{TypedId, TypedIdMarker};

pub mod db;
pub mod endpoints;
pub mod rate_limit;
pub mod worker;
pub use endpoints::*;

pub type DispatchJobId = TypedId<DispatchJob>;

/// The unit of work "send this campaign's message to this lead". Created once
/// per campaign run, unique per (campaign, lead) — a unique index backs the
/// no-duplicate-send invariant. Immutable after creation except for `state`,
/// `attempts`, and the retry gate.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DispatchJob {
    #[serde(rename = "_id")]
    pub id: DispatchJobId,
    pub campaign_id: CampaignId,
    pub lead_id: LeadId,
    pub channel: ChannelKind,
    pub recipient: String,
    pub content: String,
    pub state: JobState,
    pub attempts: u32,
    /// Earliest instant a worker may claim this job; pushed forward by the
    /// retry backoff.
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub next_attempt_at: DateTime<Utc>,
    pub last_error_code: Option<String>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub modified_at: DateTime<Utc>,
}

impl TypedIdMarker for DispatchJob {
    fn tag() -> &'static str {
        "JOB"
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Queued,
    InFlight,
    Sent,
    Failed,
    Skipped,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Sent | JobState::Failed | JobState::Skipped)
    }
}
