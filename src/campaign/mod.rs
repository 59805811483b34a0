use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channel::ChannelKind;
use crate::lead::{Lead, LeadSource, LeadStatus};
use crate::template::TemplateId;
use crate::typedid::{TypedId, TypedIdMarker};

pub mod db;
pub mod endpoints;
pub mod manager;
pub mod scheduler;
pub use endpoints::*;

pub type CampaignId = TypedId<Campaign>;

/// A broadcast definition and its lifecycle status. Owned exclusively by the
/// state machine in `manager`; every mutation goes through a defined
/// transition. Message statistics are never stored here, they are a fold over
/// the delivery ledger.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Campaign {
    #[serde(rename = "_id")]
    pub id: CampaignId,
    pub name: String,
    pub description: Option<String>,
    pub campaign_type: CampaignType,
    pub status: CampaignStatus,
    pub template_id: Option<TemplateId>,
    pub message_content: Option<String>,
    pub audience: TargetAudience,
    #[serde(with = "crate::utils::option_chrono_datetime_as_bson_datetime")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(with = "crate::utils::option_chrono_datetime_as_bson_datetime")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(with = "crate::utils::option_chrono_datetime_as_bson_datetime")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub modified_at: DateTime<Utc>,
}

impl TypedIdMarker for Campaign {
    fn tag() -> &'static str {
        "CPN"
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignType {
    WhatsappTemplate,
    MessengerBroadcast,
    FollowUp,
}

impl CampaignType {
    pub fn channel(&self) -> ChannelKind {
        match self {
            CampaignType::WhatsappTemplate => ChannelKind::WhatsApp,
            CampaignType::MessengerBroadcast => ChannelKind::Messenger,
            CampaignType::FollowUp => ChannelKind::Messenger,
        }
    }

    pub fn requires_template(&self) -> bool {
        matches!(self, CampaignType::WhatsappTemplate)
    }

    /// Follow-ups are session replies inside an existing conversation and do
    /// not need marketing consent; everything else does.
    pub fn requires_consent(&self) -> bool {
        !matches!(self, CampaignType::FollowUp)
    }

    /// USD per message, used by the preview estimator.
    pub fn per_message_rate(&self) -> f64 {
        match self {
            CampaignType::WhatsappTemplate => 0.05,
            CampaignType::MessengerBroadcast => 0.01,
            CampaignType::FollowUp => 0.02,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Running,
    Paused,
    Completed,
    Cancelled,
}

impl CampaignStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CampaignStatus::Completed | CampaignStatus::Cancelled)
    }
}

/// Lead selection criteria; every specified criterion must match (AND).
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct TargetAudience {
    pub statuses: Option<Vec<LeadStatus>>,
    pub sources: Option<Vec<LeadSource>>,
    pub tags: Option<Vec<String>>,
}

impl TargetAudience {
    pub fn matches(&self, lead: &Lead) -> bool {
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&lead.status) {
                return false;
            }
        }
        if let Some(sources) = &self.sources {
            if !sources.contains(&lead.source) {
                return false;
            }
        }
        if let Some(tags) = &self.tags {
            if !tags.iter().all(|tag| lead.tags.contains(tag)) {
                return false;
            }
        }

        true
    }
}

/// Derived per-campaign aggregate, recomputed from the ledger on demand.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct MessageStats {
    pub total: u64,
    pub sent: u64,
    pub failed: u64,
}
