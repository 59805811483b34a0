use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

use crate::audit;
use crate::database::Database;
use crate::dispatch::{DispatchJob, DispatchJobId, JobState};
use crate::eligibility::{self, EligibleLead};
use crate::error::Error;
use crate::events::{CampaignEventKind, EventBus};
use crate::ledger::{DeliveryRecord, DeliveryResult};
use crate::template::{Template, TemplateId, TemplateStatus};

use super::db::CampaignFilter;
use super::{Campaign, CampaignId, CampaignStatus, CampaignType, TargetAudience};

/// Per-campaign in-process locks serializing lifecycle transitions. The lock
/// makes concurrent `start` calls on one campaign queue up; the status-gated
/// store update in `mark_running` then guarantees a single winner even across
/// processes. Entries are tiny and never evicted.
#[derive(Debug, Default)]
pub struct CampaignLocks {
    inner: Mutex<HashMap<CampaignId, Arc<Mutex<()>>>>,
}

impl CampaignLocks {
    pub fn new() -> CampaignLocks {
        CampaignLocks::default()
    }

    pub async fn acquire(&self, campaign_id: CampaignId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            Arc::clone(map.entry(campaign_id).or_default())
        };

        lock.lock_owned().await
    }
}

pub struct NewCampaign {
    pub name: String,
    pub description: Option<String>,
    pub campaign_type: CampaignType,
    pub template_id: Option<TemplateId>,
    pub message_content: Option<String>,
    pub audience: TargetAudience,
    pub scheduled_at: Option<DateTime<Utc>>,
}

pub struct CampaignUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub template_id: Option<TemplateId>,
    pub message_content: Option<String>,
    pub audience: Option<TargetAudience>,
    /// `Some(None)` clears the schedule and returns the campaign to DRAFT.
    pub scheduled_at: Option<Option<DateTime<Utc>>>,
}

/// Side-effect-free dry run of `start_campaign`.
#[derive(Clone, Debug)]
pub struct CampaignPreview {
    pub total_leads: usize,
    pub eligible_leads: usize,
    pub message_template: String,
    pub estimated_cost: f64,
    pub leads_sample: Vec<EligibleLead>,
}

#[tracing::instrument(skip(db, new))]
pub async fn create_campaign(
    db: &dyn Database,
    new: NewCampaign,
    actor: &str,
) -> Result<Campaign, Error> {
    let campaign_id = CampaignId::new();
    let now = Utc::now();

    let template = fetch_referenced_template(db, new.template_id).await?;
    if new.campaign_type.requires_template() && template.is_none() {
        return Err(Error::MissingTemplateReference { campaign_id: None });
    }
    if !new.campaign_type.requires_template() && empty_content(&new.message_content) {
        return Err(Error::MissingMessageContent);
    }

    let status = match new.scheduled_at {
        Some(scheduled_at) if scheduled_at <= now => {
            return Err(Error::ScheduledTimeInPast { scheduled_at })
        }
        Some(_) => {
            // Scheduling arms an unattended start, so the template gate that
            // `start` would apply has to hold now.
            if let Some(template) = &template {
                if new.campaign_type.requires_template()
                    && template.status != TemplateStatus::Approved
                {
                    return Err(Error::TemplateNotApproved {
                        campaign_id,
                        template_id: template.id,
                        status: template.status,
                    });
                }
            }
            CampaignStatus::Scheduled
        }
        None => CampaignStatus::Draft,
    };

    let campaign = Campaign {
        id: campaign_id,
        name: new.name,
        description: new.description,
        campaign_type: new.campaign_type,
        status,
        template_id: new.template_id,
        message_content: new.message_content,
        audience: new.audience,
        scheduled_at: new.scheduled_at,
        started_at: None,
        completed_at: None,
        created_at: now,
        modified_at: now,
    };

    db.campaigns().insert_campaign(&campaign).await?;

    audit::record(db, "CREATE_CAMPAIGN", "campaign", campaign.id.to_string(), actor, None).await;

    Ok(campaign)
}

#[tracing::instrument(skip(db, update))]
pub async fn update_campaign(
    db: &dyn Database,
    campaign_id: CampaignId,
    update: CampaignUpdate,
    actor: &str,
) -> Result<Campaign, Error> {
    let mut campaign = get_campaign_by_id(db, campaign_id).await?;

    if campaign.status.is_terminal() {
        return Err(Error::TerminalState {
            campaign_id,
            status: campaign.status,
        });
    }
    if !matches!(campaign.status, CampaignStatus::Draft | CampaignStatus::Scheduled) {
        return Err(Error::InvalidTransition {
            campaign_id,
            status: campaign.status,
            action: "update",
        });
    }

    if let Some(name) = update.name {
        campaign.name = name;
    }
    if let Some(description) = update.description {
        campaign.description = Some(description);
    }
    if let Some(template_id) = update.template_id {
        campaign.template_id = Some(template_id);
    }
    if let Some(message_content) = update.message_content {
        campaign.message_content = Some(message_content);
    }
    if let Some(audience) = update.audience {
        campaign.audience = audience;
    }
    match update.scheduled_at {
        Some(Some(scheduled_at)) => {
            if scheduled_at <= Utc::now() {
                return Err(Error::ScheduledTimeInPast { scheduled_at });
            }
            campaign.scheduled_at = Some(scheduled_at);
            campaign.status = CampaignStatus::Scheduled;
        }
        Some(None) => {
            campaign.scheduled_at = None;
            campaign.status = CampaignStatus::Draft;
        }
        None => {}
    }

    let template = fetch_referenced_template(db, campaign.template_id).await?;
    if campaign.campaign_type.requires_template() && template.is_none() {
        return Err(Error::MissingTemplateReference {
            campaign_id: Some(campaign_id),
        });
    }
    if !campaign.campaign_type.requires_template() && empty_content(&campaign.message_content) {
        return Err(Error::MissingMessageContent);
    }
    if campaign.status == CampaignStatus::Scheduled {
        if let Some(template) = &template {
            if campaign.campaign_type.requires_template()
                && template.status != TemplateStatus::Approved
            {
                return Err(Error::TemplateNotApproved {
                    campaign_id,
                    template_id: template.id,
                    status: template.status,
                });
            }
        }
    }

    let campaign = db.campaigns().update_campaign(campaign).await?;

    audit::record(db, "UPDATE_CAMPAIGN", "campaign", campaign_id.to_string(), actor, None).await;

    Ok(campaign)
}

#[tracing::instrument(skip(db))]
pub async fn get_campaign_by_id(
    db: &dyn Database,
    campaign_id: CampaignId,
) -> Result<Campaign, Error> {
    db.campaigns()
        .fetch_campaign_by_id(campaign_id)
        .await?
        .ok_or(Error::CampaignDoesNotExist { campaign_id })
}

#[tracing::instrument(skip(db))]
pub async fn list_campaigns(
    db: &dyn Database,
    filter: CampaignFilter,
) -> Result<Vec<Campaign>, Error> {
    db.campaigns().fetch_campaigns(filter).await
}

/// Start the campaign: a single eligibility resolution pass over a snapshot
/// of the lead base, then one queued job per eligible lead. Exactly one
/// resolution pass can ever happen per start, no matter how many concurrent
/// callers race.
#[tracing::instrument(skip(db, locks, events))]
pub async fn start_campaign(
    db: &dyn Database,
    locks: &CampaignLocks,
    events: &EventBus,
    campaign_id: CampaignId,
    actor: &str,
) -> Result<(Campaign, usize), Error> {
    let _guard = locks.acquire(campaign_id).await;

    let campaign = get_campaign_by_id(db, campaign_id).await?;
    match campaign.status {
        CampaignStatus::Running => return Err(Error::AlreadyRunning { campaign_id }),
        CampaignStatus::Paused => {
            return Err(Error::InvalidTransition {
                campaign_id,
                status: campaign.status,
                action: "start",
            })
        }
        status if status.is_terminal() => {
            return Err(Error::TerminalState { campaign_id, status })
        }
        _ => {}
    }

    let template = fetch_referenced_template(db, campaign.template_id).await?;
    let content = match &template {
        Some(template) if campaign.campaign_type.requires_template() => {
            if template.status != TemplateStatus::Approved {
                return Err(Error::TemplateNotApproved {
                    campaign_id,
                    template_id: template.id,
                    status: template.status,
                });
            }
            template.body.clone()
        }
        None if campaign.campaign_type.requires_template() => {
            return Err(Error::MissingTemplateReference {
                campaign_id: Some(campaign_id),
            })
        }
        _ => campaign
            .message_content
            .clone()
            .ok_or(Error::MissingMessageContent)?,
    };

    let prior_status = campaign.status;
    let prior_scheduled_at = campaign.scheduled_at;

    // A lost race here means another caller (or process) flipped the status
    // first; surface that as already-running rather than a concurrency fault.
    let campaign = match db.campaigns().mark_running(campaign).await {
        Ok(campaign) => campaign,
        Err(Error::ConcurrentModificationDetected) => {
            return Err(Error::AlreadyRunning { campaign_id })
        }
        Err(err) => return Err(err),
    };

    let now = Utc::now();
    let leads = db.leads().fetch_leads().await?;
    let existing_jobs = db.jobs().fetch_jobs_by_campaign(campaign_id).await?;
    let resolution = eligibility::resolve(
        &campaign,
        template.as_ref(),
        &content,
        &leads,
        &existing_jobs,
        now,
    );

    if resolution.eligible.is_empty() {
        let backlog = existing_jobs
            .iter()
            .filter(|job| matches!(job.state, JobState::Queued | JobState::InFlight))
            .count();
        if backlog == 0 {
            db.campaigns()
                .revert_start(campaign, prior_status, prior_scheduled_at)
                .await?;
            return Err(Error::NoEligibleLeads { campaign_id });
        }

        // An interrupted start already enqueued these leads; keep running and
        // let the workers drain the backlog instead of enqueueing twice.
        audit::record(
            db,
            "START_CAMPAIGN",
            "campaign",
            campaign_id.to_string(),
            actor,
            Some(json!({ "eligible": 0, "excluded": resolution.exclusions.len(), "backlog": backlog })),
        )
        .await;
        events.publish(campaign_id, CampaignEventKind::StatusChanged);

        return Ok((campaign, 0));
    }

    let channel = campaign.campaign_type.channel();
    let jobs: Vec<DispatchJob> = resolution
        .eligible
        .iter()
        .map(|eligible| DispatchJob {
            id: DispatchJobId::new(),
            campaign_id,
            lead_id: eligible.lead_id,
            channel,
            recipient: eligible.recipient.clone(),
            content: eligible.content.clone(),
            state: JobState::Queued,
            attempts: 0,
            next_attempt_at: now,
            last_error_code: None,
            created_at: now,
            modified_at: now,
        })
        .collect();

    if let Err(err) = db.jobs().insert_jobs(&jobs).await {
        // Best-effort rollback; the scheduler's reconciliation pass heals
        // whatever these two calls could not undo.
        if let Err(rollback_err) = db.jobs().delete_queued_jobs(campaign_id).await {
            warn!(%campaign_id, %rollback_err, "failed to delete queued jobs after enqueue failure");
        }
        if let Err(rollback_err) = db
            .campaigns()
            .revert_start(campaign, prior_status, prior_scheduled_at)
            .await
        {
            warn!(%campaign_id, %rollback_err, "failed to revert campaign after enqueue failure");
        }
        return Err(err);
    }

    audit::record(
        db,
        "START_CAMPAIGN",
        "campaign",
        campaign_id.to_string(),
        actor,
        Some(json!({
            "eligible": resolution.eligible.len(),
            "excluded": resolution.exclusions.len(),
        })),
    )
    .await;
    events.publish(campaign_id, CampaignEventKind::StatusChanged);

    Ok((campaign, jobs.len()))
}

/// Halt dispatch without touching the backlog; queued jobs stay queued and
/// resume picks them up where they were left.
#[tracing::instrument(skip(db, locks, events))]
pub async fn pause_campaign(
    db: &dyn Database,
    locks: &CampaignLocks,
    events: &EventBus,
    campaign_id: CampaignId,
    actor: &str,
) -> Result<Campaign, Error> {
    let _guard = locks.acquire(campaign_id).await;

    let campaign = get_campaign_by_id(db, campaign_id).await?;
    if campaign.status.is_terminal() {
        return Err(Error::TerminalState {
            campaign_id,
            status: campaign.status,
        });
    }
    if campaign.status != CampaignStatus::Running {
        return Err(Error::InvalidTransition {
            campaign_id,
            status: campaign.status,
            action: "pause",
        });
    }

    let campaign = db
        .campaigns()
        .update_campaign_status(campaign, CampaignStatus::Paused)
        .await?;

    audit::record(db, "PAUSE_CAMPAIGN", "campaign", campaign_id.to_string(), actor, None).await;
    events.publish(campaign_id, CampaignEventKind::StatusChanged);

    Ok(campaign)
}

/// Resume dispatch of the remaining backlog. There is deliberately no
/// re-resolution: the eligible set was fixed at start. A campaign whose
/// backlog drained while paused completes immediately.
#[tracing::instrument(skip(db, locks, events))]
pub async fn resume_campaign(
    db: &dyn Database,
    locks: &CampaignLocks,
    events: &EventBus,
    campaign_id: CampaignId,
    actor: &str,
) -> Result<Campaign, Error> {
    let _guard = locks.acquire(campaign_id).await;

    let campaign = get_campaign_by_id(db, campaign_id).await?;
    if campaign.status.is_terminal() {
        return Err(Error::TerminalState {
            campaign_id,
            status: campaign.status,
        });
    }
    if campaign.status != CampaignStatus::Paused {
        return Err(Error::InvalidTransition {
            campaign_id,
            status: campaign.status,
            action: "resume",
        });
    }

    let campaign = db
        .campaigns()
        .update_campaign_status(campaign, CampaignStatus::Running)
        .await?;

    let campaign = if db.jobs().count_outstanding(campaign_id).await? == 0 {
        db.campaigns()
            .mark_terminal(campaign, CampaignStatus::Completed)
            .await?
    } else {
        campaign
    };

    audit::record(db, "RESUME_CAMPAIGN", "campaign", campaign_id.to_string(), actor, None).await;
    events.publish(campaign_id, CampaignEventKind::StatusChanged);

    Ok(campaign)
}

/// Cancel from any non-terminal status. Queued jobs are skipped and ledgered
/// so the campaign's totals still account for them; in-flight jobs finish
/// their current attempt and are skipped by the worker afterwards.
#[tracing::instrument(skip(db, locks, events))]
pub async fn cancel_campaign(
    db: &dyn Database,
    locks: &CampaignLocks,
    events: &EventBus,
    campaign_id: CampaignId,
    actor: &str,
) -> Result<Campaign, Error> {
    let _guard = locks.acquire(campaign_id).await;

    let campaign = get_campaign_by_id(db, campaign_id).await?;
    if campaign.status.is_terminal() {
        return Err(Error::TerminalState {
            campaign_id,
            status: campaign.status,
        });
    }

    let skipped = db.jobs().skip_queued_jobs(campaign_id).await?;
    for job in &skipped {
        db.deliveries()
            .append_record(&DeliveryRecord::new(
                campaign_id,
                job.id,
                job.lead_id,
                job.attempts,
                DeliveryResult::SkippedIneligible,
                Some("campaign_cancelled".to_string()),
            ))
            .await?;
    }

    let campaign = db
        .campaigns()
        .mark_terminal(campaign, CampaignStatus::Cancelled)
        .await?;

    audit::record(
        db,
        "CANCEL_CAMPAIGN",
        "campaign",
        campaign_id.to_string(),
        actor,
        Some(json!({ "skipped": skipped.len() })),
    )
    .await;
    events.publish(campaign_id, CampaignEventKind::StatusChanged);
    events.publish(campaign_id, CampaignEventKind::StatsChanged);

    Ok(campaign)
}

/// Run the eligibility pass without enqueueing anything; this is the only
/// operation that reads the lead base without taking the campaign lock.
#[tracing::instrument(skip(db))]
pub async fn preview_campaign(
    db: &dyn Database,
    campaign_id: CampaignId,
) -> Result<CampaignPreview, Error> {
    let campaign = get_campaign_by_id(db, campaign_id).await?;

    let template = fetch_referenced_template(db, campaign.template_id).await?;
    let content = match &template {
        Some(template) if campaign.campaign_type.requires_template() => template.body.clone(),
        None if campaign.campaign_type.requires_template() => {
            return Err(Error::MissingTemplateReference {
                campaign_id: Some(campaign_id),
            })
        }
        _ => campaign
            .message_content
            .clone()
            .ok_or(Error::MissingMessageContent)?,
    };

    let leads = db.leads().fetch_leads().await?;
    let existing_jobs = db.jobs().fetch_jobs_by_campaign(campaign_id).await?;
    let resolution = eligibility::resolve(
        &campaign,
        template.as_ref(),
        &content,
        &leads,
        &existing_jobs,
        Utc::now(),
    );

    let eligible_leads = resolution.eligible.len();
    let estimated_cost =
        (eligible_leads as f64 * campaign.campaign_type.per_message_rate() * 100.0).round() / 100.0;
    let leads_sample = resolution.eligible.into_iter().take(10).collect();

    Ok(CampaignPreview {
        total_leads: resolution.total_candidates,
        eligible_leads,
        message_template: content,
        estimated_cost,
        leads_sample,
    })
}

async fn fetch_referenced_template(
    db: &dyn Database,
    template_id: Option<TemplateId>,
) -> Result<Option<Template>, Error> {
    match template_id {
        Some(template_id) => Ok(Some(
            db.templates()
                .fetch_template_by_id(template_id)
                .await?
                .ok_or(Error::TemplateDoesNotExist { template_id })?,
        )),
        None => Ok(None),
    }
}

fn empty_content(content: &Option<String>) -> bool {
    content.as_deref().map(str::trim).unwrap_or("").is_empty()
}
