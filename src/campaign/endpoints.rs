use actix_web::web::{Data, Json, Path, Query};
use actix_web::{get, post, put, HttpRequest};
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};

use crate::database::Database;
use crate::error::Error;
use crate::events::EventBus;
use crate::lead::LeadId;
use crate::ledger::manager::StatsCache;
use crate::template::TemplateId;

use super::db::CampaignFilter;
use super::manager::{self, CampaignLocks, CampaignUpdate, NewCampaign};
use super::{Campaign, CampaignId, CampaignStatus, CampaignType, MessageStats, TargetAudience};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateCampaignBody {
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub campaign_type: CampaignType,
    pub template_id: Option<TemplateId>,
    pub message_content: Option<String>,
    #[serde(default)]
    pub audience: TargetAudience,
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateCampaignBody {
    pub name: Option<String>,
    pub description: Option<String>,
    pub template_id: Option<TemplateId>,
    pub message_content: Option<String>,
    pub audience: Option<TargetAudience>,
    /// Absent leaves the schedule untouched; an explicit `null` clears it
    /// and returns a SCHEDULED campaign to DRAFT.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::utils::double_option"
    )]
    pub scheduled_at: Option<Option<DateTime<Utc>>>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ListCampaignsQuery {
    pub status: Option<CampaignStatus>,
    #[serde(rename = "type")]
    pub campaign_type: Option<CampaignType>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CampaignBody {
    pub id: CampaignId,
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub campaign_type: CampaignType,
    pub status: CampaignStatus,
    pub template_id: Option<TemplateId>,
    pub message_content: Option<String>,
    pub audience: TargetAudience,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub message_stats: MessageStats,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl CampaignBody {
    pub async fn render(
        db: &dyn Database,
        stats: &StatsCache,
        campaign: Campaign,
    ) -> Result<CampaignBody, Error> {
        let message_stats = stats.stats_for(db, campaign.id).await?;

        Ok(CampaignBody {
            id: campaign.id,
            name: campaign.name,
            description: campaign.description,
            campaign_type: campaign.campaign_type,
            status: campaign.status,
            template_id: campaign.template_id,
            message_content: campaign.message_content,
            audience: campaign.audience,
            scheduled_at: campaign.scheduled_at,
            started_at: campaign.started_at,
            completed_at: campaign.completed_at,
            message_stats,
            created_at: campaign.created_at,
            modified_at: campaign.modified_at,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StartCampaignBody {
    pub campaign: CampaignBody,
    pub enqueued_jobs: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PreviewBody {
    pub total_leads: usize,
    pub eligible_leads: usize,
    pub message_template: String,
    pub estimated_cost: f64,
    pub leads_sample: Vec<LeadSampleBody>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LeadSampleBody {
    pub lead_id: LeadId,
    pub recipient: String,
    pub content: String,
}

fn actor_from(request: &HttpRequest) -> String {
    request
        .headers()
        .get("x-operator-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("operator")
        .to_string()
}

#[post("/campaigns")]
#[tracing::instrument(skip(db, stats, request))]
pub async fn create_campaign(
    db: Data<dyn Database>,
    stats: Data<StatsCache>,
    request: HttpRequest,
    body: Json<CreateCampaignBody>,
) -> Result<Json<CampaignBody>, Error> {
    let body = body.into_inner();

    let campaign = manager::create_campaign(
        &**db,
        NewCampaign {
            name: body.name,
            description: body.description,
            campaign_type: body.campaign_type,
            template_id: body.template_id,
            message_content: body.message_content,
            audience: body.audience,
            scheduled_at: body.scheduled_at,
        },
        &actor_from(&request),
    )
    .await?;

    Ok(Json(CampaignBody::render(&**db, &stats, campaign).await?))
}

#[get("/campaigns")]
#[tracing::instrument(skip(db, stats))]
pub async fn get_campaigns(
    db: Data<dyn Database>,
    stats: Data<StatsCache>,
    query: Query<ListCampaignsQuery>,
) -> Result<Json<Vec<CampaignBody>>, Error> {
    let query = query.into_inner();

    let campaigns = manager::list_campaigns(
        &**db,
        CampaignFilter {
            status: query.status,
            campaign_type: query.campaign_type,
        },
    )
    .await?;

    let body = stream::iter(campaigns)
        .then(|campaign| CampaignBody::render(&**db, &stats, campaign))
        .try_collect()
        .await?;

    Ok(Json(body))
}

#[get("/campaigns/{campaign_id}")]
#[tracing::instrument(skip(db, stats))]
pub async fn get_campaign_by_id(
    db: Data<dyn Database>,
    stats: Data<StatsCache>,
    params: Path<CampaignId>,
) -> Result<Json<CampaignBody>, Error> {
    let campaign_id = params.into_inner();

    let campaign = manager::get_campaign_by_id(&**db, campaign_id).await?;

    Ok(Json(CampaignBody::render(&**db, &stats, campaign).await?))
}

#[put("/campaigns/{campaign_id}")]
#[tracing::instrument(skip(db, stats, request))]
pub async fn update_campaign(
    db: Data<dyn Database>,
    stats: Data<StatsCache>,
    request: HttpRequest,
    params: Path<CampaignId>,
    body: Json<UpdateCampaignBody>,
) -> Result<Json<CampaignBody>, Error> {
    let campaign_id = params.into_inner();
    let body = body.into_inner();

    let campaign = manager::update_campaign(
        &**db,
        campaign_id,
        CampaignUpdate {
            name: body.name,
            description: body.description,
            template_id: body.template_id,
            message_content: body.message_content,
            audience: body.audience,
            scheduled_at: body.scheduled_at,
        },
        &actor_from(&request),
    )
    .await?;

    Ok(Json(CampaignBody::render(&**db, &stats, campaign).await?))
}

#[post("/campaigns/{campaign_id}/start")]
#[tracing::instrument(skip(db, locks, events, stats, request))]
pub async fn start_campaign(
    db: Data<dyn Database>,
    locks: Data<CampaignLocks>,
    events: Data<EventBus>,
    stats: Data<StatsCache>,
    request: HttpRequest,
    params: Path<CampaignId>,
) -> Result<Json<StartCampaignBody>, Error> {
    let campaign_id = params.into_inner();

    let (campaign, enqueued_jobs) =
        manager::start_campaign(&**db, &locks, &events, campaign_id, &actor_from(&request))
            .await?;
    stats.invalidate(campaign_id).await;

    Ok(Json(StartCampaignBody {
        campaign: CampaignBody::render(&**db, &stats, campaign).await?,
        enqueued_jobs,
    }))
}

#[post("/campaigns/{campaign_id}/pause")]
#[tracing::instrument(skip(db, locks, events, stats, request))]
pub async fn pause_campaign(
    db: Data<dyn Database>,
    locks: Data<CampaignLocks>,
    events: Data<EventBus>,
    stats: Data<StatsCache>,
    request: HttpRequest,
    params: Path<CampaignId>,
) -> Result<Json<CampaignBody>, Error> {
    let campaign_id = params.into_inner();

    let campaign =
        manager::pause_campaign(&**db, &locks, &events, campaign_id, &actor_from(&request))
            .await?;

    Ok(Json(CampaignBody::render(&**db, &stats, campaign).await?))
}

#[post("/campaigns/{campaign_id}/resume")]
#[tracing::instrument(skip(db, locks, events, stats, request))]
pub async fn resume_campaign(
    db: Data<dyn Database>,
    locks: Data<CampaignLocks>,
    events: Data<EventBus>,
    stats: Data<StatsCache>,
    request: HttpRequest,
    params: Path<CampaignId>,
) -> Result<Json<CampaignBody>, Error> {
    let campaign_id = params.into_inner();

    let campaign =
        manager::resume_campaign(&**db, &locks, &events, campaign_id, &actor_from(&request))
            .await?;

    Ok(Json(CampaignBody::render(&**db, &stats, campaign).await?))
}

#[post("/campaigns/{campaign_id}/cancel")]
#[tracing::instrument(skip(db, locks, events, stats, request))]
pub async fn cancel_campaign(
    db: Data<dyn Database>,
    locks: Data<CampaignLocks>,
    events: Data<EventBus>,
    stats: Data<StatsCache>,
    request: HttpRequest,
    params: Path<CampaignId>,
) -> Result<Json<CampaignBody>, Error> {
    let campaign_id = params.into_inner();

    let campaign =
        manager::cancel_campaign(&**db, &locks, &events, campaign_id, &actor_from(&request))
            .await?;
    stats.invalidate(campaign_id).await;

    Ok(Json(CampaignBody::render(&**db, &stats, campaign).await?))
}

#[post("/campaigns/{campaign_id}/preview")]
#[tracing::instrument(skip(db))]
pub async fn preview_campaign(
    db: Data<dyn Database>,
    params: Path<CampaignId>,
) -> Result<Json<PreviewBody>, Error> {
    let campaign_id = params.into_inner();

    let preview = manager::preview_campaign(&**db, campaign_id).await?;

    Ok(Json(PreviewBody {
        total_leads: preview.total_leads,
        eligible_leads: preview.eligible_leads,
        message_template: preview.message_template,
        estimated_cost: preview.estimated_cost,
        leads_sample: preview
            .leads_sample
            .into_iter()
            .map(|eligible| LeadSampleBody {
                lead_id: eligible.lead_id,
                recipient: eligible.recipient,
                content: eligible.content,
            })
            .collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_body_distinguishes_a_missing_schedule_from_an_explicit_null() {
        let body: UpdateCampaignBody = serde_json::from_str("{}").unwrap();
        assert_eq!(body.scheduled_at, None);

        let body: UpdateCampaignBody =
            serde_json::from_str(r#"{ "scheduled_at": null }"#).unwrap();
        assert_eq!(body.scheduled_at, Some(None));
    }
}
