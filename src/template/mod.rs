use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channel::ChannelKind;
use crate::lead::Lead;
use crate::typedid::{TypedId, TypedIdMarker};

pub mod db;

pub type TemplateId = TypedId<Template>;

/// A pre-approved message template mirrored from the platform. Approval is a
/// platform decision; the engine only reads the status and refuses to start
/// template campaigns that lack an APPROVED one.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Template {
    #[serde(rename = "_id")]
    pub id: TemplateId,
    pub name: String,
    pub language: String,
    pub channel: ChannelKind,
    pub status: TemplateStatus,
    pub body: String,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub modified_at: DateTime<Utc>,
}

impl TypedIdMarker for Template {
    fn tag() -> &'static str {
        "TPL"
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TemplateStatus {
    Approved,
    Pending,
    Rejected,
}

/// Fill the lead-level placeholder slots in a message body. Unknown
/// placeholders are left as-is for the operator to notice in preview.
pub fn render_placeholders(body: &str, lead: &Lead) -> String {
    body.replace("{{first_name}}", lead.first_name.as_deref().unwrap_or(""))
        .replace("{{last_name}}", lead.last_name.as_deref().unwrap_or(""))
        .replace("{{email}}", lead.email.as_deref().unwrap_or(""))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::lead::{LeadId, LeadSource, LeadStatus};

    use super::*;

    fn lead(first_name: Option<&str>) -> Lead {
        let now = Utc::now();
        Lead {
            id: LeadId::new(),
            first_name: first_name.map(str::to_string),
            last_name: Some("Okafor".to_string()),
            email: None,
            phone_number: None,
            facebook_user_id: None,
            status: LeadStatus::New,
            source: LeadSource::Manual,
            tags: vec![],
            consent_given: true,
            consent_at: Some(now),
            opted_out: false,
            last_messenger_inbound_at: None,
            last_whatsapp_inbound_at: None,
            created_at: now,
            modified_at: now,
        }
    }

    #[test]
    fn substitutes_known_placeholders() {
        let rendered = render_placeholders("Hi {{first_name}} {{last_name}}!", &lead(Some("Ada")));

        assert_eq!(rendered, "Hi Ada Okafor!");
    }

    #[test]
    fn missing_fields_render_empty_and_unknown_slots_survive() {
        let rendered = render_placeholders("Hi {{first_name}}, code {{code}}", &lead(None));

        assert_eq!(rendered, "Hi , code {{code}}");
    }
}
