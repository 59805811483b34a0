use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};

use crate::campaign::{Campaign, CampaignType};
use crate::dispatch::DispatchJob;
use crate::lead::{Lead, LeadId};
use crate::template::{self, Template, TemplateStatus};

/// Free-form replies are allowed this long after a lead's last inbound
/// message on the channel; outside it only pre-approved templates may go out.
pub const SESSION_WINDOW_HOURS: i64 = 24;

/// A lead cleared for dispatch, tagged with the identifier to address and the
/// message rendered for it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EligibleLead {
    pub lead_id: LeadId,
    pub recipient: String,
    pub content: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Exclusion {
    pub lead_id: LeadId,
    pub reason: ExclusionReason,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ExclusionReason {
    NoConsent,
    OptedOut,
    MissingChannelIdentifier,
    TemplateNotApproved,
    OutsideSessionWindow,
    AlreadyQueued,
}

#[derive(Clone, Debug)]
pub struct Resolution {
    /// Leads matching the audience filter, before policy rules.
    pub total_candidates: usize,
    pub eligible: Vec<EligibleLead>,
    pub exclusions: Vec<Exclusion>,
}

/// Decide which leads may receive the campaign's message right now.
///
/// Pure over its inputs: the same snapshot always yields the same ordered,
/// deduplicated set, so retrying `start` cannot change the campaign's scope.
/// Rules short-circuit per lead and the first failing rule is recorded.
pub fn resolve(
    campaign: &Campaign,
    template: Option<&Template>,
    content: &str,
    leads: &[Lead],
    existing_jobs: &[DispatchJob],
    now: DateTime<Utc>,
) -> Resolution {
    let channel = campaign.campaign_type.channel();
    let template_approved =
        template.map(|t| t.status == TemplateStatus::Approved).unwrap_or(false);
    let active_lead_ids: HashSet<LeadId> = existing_jobs
        .iter()
        .filter(|job| !job.state.is_terminal())
        .map(|job| job.lead_id)
        .collect();

    let mut seen = HashSet::new();
    let mut eligible = Vec::new();
    let mut exclusions = Vec::new();
    let mut total_candidates = 0;

    for lead in leads {
        if !campaign.audience.matches(lead) || !seen.insert(lead.id) {
            continue;
        }
        total_candidates += 1;

        let excluded = |reason| Exclusion {
            lead_id: lead.id,
            reason,
        };

        if campaign.campaign_type.requires_consent() {
            if lead.opted_out {
                exclusions.push(excluded(ExclusionReason::OptedOut));
                continue;
            }
            if !lead.consent_given {
                exclusions.push(excluded(ExclusionReason::NoConsent));
                continue;
            }
        }

        let recipient = match lead.channel_identifier(channel) {
            Some(recipient) => recipient.to_string(),
            None => {
                exclusions.push(excluded(ExclusionReason::MissingChannelIdentifier));
                continue;
            }
        };

        let in_window = lead
            .last_inbound_at(channel)
            .map(|at| now - at < Duration::hours(SESSION_WINDOW_HOURS))
            .unwrap_or(false);
        match campaign.campaign_type {
            CampaignType::WhatsappTemplate => {
                if !template_approved {
                    exclusions.push(excluded(ExclusionReason::TemplateNotApproved));
                    continue;
                }
            }
            CampaignType::MessengerBroadcast => {
                if !in_window && !template_approved {
                    exclusions.push(excluded(ExclusionReason::OutsideSessionWindow));
                    continue;
                }
            }
            CampaignType::FollowUp => {
                if !in_window {
                    exclusions.push(excluded(ExclusionReason::OutsideSessionWindow));
                    continue;
                }
            }
        }

        if active_lead_ids.contains(&lead.id) {
            exclusions.push(excluded(ExclusionReason::AlreadyQueued));
            continue;
        }

        eligible.push(EligibleLead {
            lead_id: lead.id,
            recipient,
            content: template::render_placeholders(content, lead),
        });
    }

    Resolution {
        total_candidates,
        eligible,
        exclusions,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::campaign::{CampaignId, CampaignStatus, TargetAudience};
    use crate::channel::ChannelKind;
    use crate::dispatch::{DispatchJobId, JobState};
    use crate::lead::{LeadSource, LeadStatus};
    use crate::template::TemplateId;

    use super::*;

    fn campaign(campaign_type: CampaignType) -> Campaign {
        let now = Utc::now();
        Campaign {
            id: CampaignId::new(),
            name: "Spring promo".to_string(),
            description: None,
            campaign_type,
            status: CampaignStatus::Draft,
            template_id: None,
            message_content: Some("Hi {{first_name}}".to_string()),
            audience: TargetAudience::default(),
            scheduled_at: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            modified_at: now,
        }
    }

    fn lead() -> Lead {
        let now = Utc::now();
        Lead {
            id: LeadId::new(),
            first_name: Some("Ada".to_string()),
            last_name: None,
            email: None,
            phone_number: Some("+15550001111".to_string()),
            facebook_user_id: Some("fb-1001".to_string()),
            status: LeadStatus::New,
            source: LeadSource::Manual,
            tags: vec![],
            consent_given: true,
            consent_at: Some(now),
            opted_out: false,
            last_messenger_inbound_at: Some(now - Duration::hours(1)),
            last_whatsapp_inbound_at: None,
            created_at: now,
            modified_at: now,
        }
    }

    fn approved_template() -> Template {
        let now = Utc::now();
        Template {
            id: TemplateId::new(),
            name: "spring_promo".to_string(),
            language: "en_US".to_string(),
            channel: ChannelKind::WhatsApp,
            status: TemplateStatus::Approved,
            body: "Hi {{first_name}}".to_string(),
            created_at: now,
            modified_at: now,
        }
    }

    fn job_for(campaign: &Campaign, lead: &Lead, state: JobState) -> DispatchJob {
        let now = Utc::now();
        DispatchJob {
            id: DispatchJobId::new(),
            campaign_id: campaign.id,
            lead_id: lead.id,
            channel: ChannelKind::Messenger,
            recipient: "fb-1001".to_string(),
            content: "Hi".to_string(),
            state,
            attempts: 0,
            next_attempt_at: now,
            last_error_code: None,
            created_at: now,
            modified_at: now,
        }
    }

    #[test]
    fn lead_without_consent_is_never_eligible_for_broadcasts() {
        let mut no_consent = lead();
        no_consent.consent_given = false;

        for campaign_type in [CampaignType::WhatsappTemplate, CampaignType::MessengerBroadcast] {
            let campaign = campaign(campaign_type);
            let template = approved_template();
            let resolution = resolve(
                &campaign,
                Some(&template),
                "Hi",
                &[no_consent.clone()],
                &[],
                Utc::now(),
            );

            assert!(resolution.eligible.is_empty());
            assert_eq!(resolution.exclusions[0].reason, ExclusionReason::NoConsent);
        }
    }

    #[test]
    fn follow_up_does_not_require_consent() {
        let mut no_consent = lead();
        no_consent.consent_given = false;

        let resolution = resolve(
            &campaign(CampaignType::FollowUp),
            None,
            "Hi {{first_name}}",
            &[no_consent],
            &[],
            Utc::now(),
        );

        assert_eq!(resolution.eligible.len(), 1);
        assert_eq!(resolution.eligible[0].content, "Hi Ada");
    }

    #[test]
    fn opted_out_lead_is_excluded_before_consent() {
        let mut opted_out = lead();
        opted_out.opted_out = true;

        let resolution = resolve(
            &campaign(CampaignType::MessengerBroadcast),
            None,
            "Hi",
            &[opted_out],
            &[],
            Utc::now(),
        );

        assert_eq!(resolution.exclusions[0].reason, ExclusionReason::OptedOut);
    }

    #[test]
    fn whatsapp_campaign_requires_phone_number() {
        let mut no_phone = lead();
        no_phone.phone_number = None;

        let template = approved_template();
        let resolution = resolve(
            &campaign(CampaignType::WhatsappTemplate),
            Some(&template),
            "Hi",
            &[no_phone],
            &[],
            Utc::now(),
        );

        assert_eq!(
            resolution.exclusions[0].reason,
            ExclusionReason::MissingChannelIdentifier
        );
    }

    #[test]
    fn whatsapp_without_approved_template_excludes_everyone() {
        let mut template = approved_template();
        template.status = TemplateStatus::Pending;

        let resolution = resolve(
            &campaign(CampaignType::WhatsappTemplate),
            Some(&template),
            "Hi",
            &[lead()],
            &[],
            Utc::now(),
        );

        assert_eq!(
            resolution.exclusions[0].reason,
            ExclusionReason::TemplateNotApproved
        );
    }

    #[test]
    fn messenger_send_outside_session_window_is_excluded_not_converted() {
        let mut stale = lead();
        stale.last_messenger_inbound_at =
            Some(Utc::now() - Duration::hours(SESSION_WINDOW_HOURS + 1));

        let resolution = resolve(
            &campaign(CampaignType::MessengerBroadcast),
            None,
            "Hi",
            &[stale],
            &[],
            Utc::now(),
        );

        assert!(resolution.eligible.is_empty());
        assert_eq!(
            resolution.exclusions[0].reason,
            ExclusionReason::OutsideSessionWindow
        );
    }

    #[test]
    fn active_job_blocks_re_resolution_but_terminal_does_not() {
        let campaign = campaign(CampaignType::MessengerBroadcast);
        let lead = lead();

        let queued = job_for(&campaign, &lead, JobState::Queued);
        let resolution = resolve(&campaign, None, "Hi", &[lead.clone()], &[queued], Utc::now());
        assert_eq!(resolution.exclusions[0].reason, ExclusionReason::AlreadyQueued);

        let sent = job_for(&campaign, &lead, JobState::Sent);
        let resolution = resolve(&campaign, None, "Hi", &[lead], &[sent], Utc::now());
        assert_eq!(resolution.eligible.len(), 1);
    }

    #[test]
    fn audience_criteria_apply_as_an_and() {
        let mut campaign = campaign(CampaignType::MessengerBroadcast);
        campaign.audience = TargetAudience {
            statuses: Some(vec![LeadStatus::New]),
            sources: None,
            tags: Some(vec!["vip".to_string()]),
        };

        let mut tagged = lead();
        tagged.tags = vec!["vip".to_string(), "spring".to_string()];
        let untagged = lead();

        let resolution = resolve(
            &campaign,
            None,
            "Hi",
            &[tagged.clone(), untagged],
            &[],
            Utc::now(),
        );

        assert_eq!(resolution.total_candidates, 1);
        assert_eq!(resolution.eligible.len(), 1);
        assert_eq!(resolution.eligible[0].lead_id, tagged.id);
    }

    #[test]
    fn duplicate_snapshot_entries_resolve_once() {
        let lead = lead();

        let resolution = resolve(
            &campaign(CampaignType::MessengerBroadcast),
            None,
            "Hi",
            &[lead.clone(), lead],
            &[],
            Utc::now(),
        );

        assert_eq!(resolution.total_candidates, 1);
        assert_eq!(resolution.eligible.len(), 1);
    }
}
