use std::collections::BTreeMap;

use actix_web::get;
use actix_web::web::{Data, Json};
use serde::{Deserialize, Serialize};

use crate::channel::ChannelKind;
use crate::database::Database;
use crate::error::Error;

use super::JobState;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueBody {
    pub active: u64,
    pub waiting: u64,
}

#[get("/queues")]
#[tracing::instrument(skip(db))]
pub async fn get_queues(db: Data<dyn Database>) -> Result<Json<BTreeMap<String, QueueBody>>, Error> {
    let mut body = BTreeMap::new();

    for channel in [ChannelKind::WhatsApp, ChannelKind::Messenger] {
        let active = db
            .jobs()
            .count_by_channel_and_state(channel, JobState::InFlight)
            .await?;
        let waiting = db
            .jobs()
            .count_by_channel_and_state(channel, JobState::Queued)
            .await?;

        body.insert(channel.queue_name().to_string(), QueueBody { active, waiting });
    }

    Ok(Json(body))
}
