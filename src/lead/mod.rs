use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channel::ChannelKind;
use crate::typedid::{TypedId, TypedIdMarker};

pub mod db;

pub type LeadId = TypedId<Lead>;

/// A contact record. The engine reads leads, it never owns their schema:
/// consent and opt-out flags are maintained by the surrounding CRM and must
/// simply be honored here.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Lead {
    #[serde(rename = "_id")]
    pub id: LeadId,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub facebook_user_id: Option<String>,
    pub status: LeadStatus,
    pub source: LeadSource,
    pub tags: Vec<String>,
    pub consent_given: bool,
    #[serde(with = "crate::utils::option_chrono_datetime_as_bson_datetime")]
    pub consent_at: Option<DateTime<Utc>>,
    pub opted_out: bool,
    #[serde(with = "crate::utils::option_chrono_datetime_as_bson_datetime")]
    pub last_messenger_inbound_at: Option<DateTime<Utc>>,
    #[serde(with = "crate::utils::option_chrono_datetime_as_bson_datetime")]
    pub last_whatsapp_inbound_at: Option<DateTime<Utc>>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub modified_at: DateTime<Utc>,
}

impl Lead {
    /// The identifier a send on the given channel would address, if the lead
    /// has one.
    pub fn channel_identifier(&self, channel: ChannelKind) -> Option<&str> {
        match channel {
            ChannelKind::WhatsApp => self.phone_number.as_deref(),
            ChannelKind::Messenger => self.facebook_user_id.as_deref(),
        }
    }

    /// Last inbound message from this lead on the given channel, the anchor
    /// of the 24-hour session window.
    pub fn last_inbound_at(&self, channel: ChannelKind) -> Option<DateTime<Utc>> {
        match channel {
            ChannelKind::WhatsApp => self.last_whatsapp_inbound_at,
            ChannelKind::Messenger => self.last_messenger_inbound_at,
        }
    }
}

impl TypedIdMarker for Lead {
    fn tag() -> &'static str {
        "LED"
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeadStatus {
    New,
    Contacted,
    Qualified,
    Converted,
    Closed,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeadSource {
    Manual,
    WebForm,
    FacebookMessage,
    WhatsappInbound,
}
