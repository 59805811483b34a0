use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::database::Database;
use crate::typedid::{TypedId, TypedIdMarker};

pub mod db;

pub type AuditEntryId = TypedId<AuditEntry>;

/// Append-only record of an orchestration-relevant action.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AuditEntry {
    #[serde(rename = "_id")]
    pub id: AuditEntryId,
    pub action: String,
    pub resource: String,
    pub resource_id: String,
    pub actor: String,
    pub details: Option<Value>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl TypedIdMarker for AuditEntry {
    fn tag() -> &'static str {
        "ADT"
    }
}

/// Record an action in the audit sink. Fire-and-forget: a failing sink is
/// logged and must never fail or delay the operation that triggered it.
pub async fn record(
    db: &dyn Database,
    action: &str,
    resource: &str,
    resource_id: String,
    actor: &str,
    details: Option<Value>,
) {
    let entry = AuditEntry {
        id: AuditEntryId::new(),
        action: action.to_string(),
        resource: resource.to_string(),
        resource_id,
        actor: actor.to_string(),
        details,
        created_at: Utc::now(),
    };

    if let Err(err) = db.audits().insert_entry(&entry).await {
        warn!(action, resource = entry.resource.as_str(), %err, "failed to record audit entry");
    }
}
