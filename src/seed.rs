use chrono::{Duration, Utc};

use crate::campaign::{Campaign, CampaignStatus, CampaignType, TargetAudience};
use crate::channel::ChannelKind;
use crate::database::MongoDatabase;
use crate::error::Error;
use crate::lead::{Lead, LeadId, LeadSource, LeadStatus};
use crate::template::{Template, TemplateStatus};

pub async fn seed(db: &MongoDatabase) -> Result<(), Error> {
    use crate::database::Database;

    db.drop().await?;

    let approved_template_id = "TPL-9D9BFEF1-7269-43F2-8C1A-27A726A2B9AA".parse().unwrap();
    let pending_template_id = "TPL-0AF8BE70-3D23-4CB3-BE9E-2C32302B2D5B".parse().unwrap();
    let whatsapp_campaign_id = "CPN-16E77539-8873-4C8A-BCA3-2036010474AD".parse().unwrap();
    let messenger_campaign_id = "CPN-4B571769-48AD-4E2F-9D22-DD41D405F891".parse().unwrap();
    let lead1_id = "LED-33957EB6-0EE7-487F-A087-E55C335BD63C".parse().unwrap();
    let lead2_id = "LED-DE3168FD-2730-47A2-BFE0-E53C79DD57A0".parse().unwrap();

    let now = Utc::now();

    let templates = vec![
        Template {
            id: approved_template_id,
            name: "spring_promo".to_string(),
            language: "en_US".to_string(),
            channel: ChannelKind::WhatsApp,
            status: TemplateStatus::Approved,
            body: "Hi {{first_name}}, our spring offer ends this week.".to_string(),
            created_at: now,
            modified_at: now,
        },
        Template {
            id: pending_template_id,
            name: "summer_teaser".to_string(),
            language: "en_US".to_string(),
            channel: ChannelKind::WhatsApp,
            status: TemplateStatus::Pending,
            body: "Hi {{first_name}}, summer is coming.".to_string(),
            created_at: now,
            modified_at: now,
        },
    ];

    let leads = vec![
        Lead {
            id: lead1_id,
            first_name: Some("Ada".to_string()),
            last_name: Some("Lovelace".to_string()),
            email: Some("ada@example.com".to_string()),
            phone_number: Some("+15550001111".to_string()),
            facebook_user_id: Some("fb-1001".to_string()),
            status: LeadStatus::New,
            source: LeadSource::WebForm,
            tags: vec!["vip".to_string()],
            consent_given: true,
            consent_at: Some(now - Duration::days(3)),
            opted_out: false,
            last_messenger_inbound_at: Some(now - Duration::hours(2)),
            last_whatsapp_inbound_at: None,
            created_at: now,
            modified_at: now,
        },
        Lead {
            id: lead2_id,
            first_name: Some("Grace".to_string()),
            last_name: Some("Hopper".to_string()),
            email: Some("grace@example.com".to_string()),
            phone_number: Some("+15550002222".to_string()),
            facebook_user_id: Some("fb-1002".to_string()),
            status: LeadStatus::Contacted,
            source: LeadSource::FacebookMessage,
            tags: vec![],
            consent_given: true,
            consent_at: Some(now - Duration::days(10)),
            opted_out: false,
            last_messenger_inbound_at: Some(now - Duration::days(2)),
            last_whatsapp_inbound_at: Some(now - Duration::hours(1)),
            created_at: now,
            modified_at: now,
        },
        Lead {
            id: LeadId::new(),
            first_name: Some("Alan".to_string()),
            last_name: Some("Turing".to_string()),
            email: None,
            phone_number: Some("+15550003333".to_string()),
            facebook_user_id: None,
            status: LeadStatus::New,
            source: LeadSource::Manual,
            tags: vec![],
            consent_given: false,
            consent_at: None,
            opted_out: false,
            last_messenger_inbound_at: None,
            last_whatsapp_inbound_at: None,
            created_at: now,
            modified_at: now,
        },
        Lead {
            id: LeadId::new(),
            first_name: Some("Edsger".to_string()),
            last_name: Some("Dijkstra".to_string()),
            email: None,
            phone_number: None,
            facebook_user_id: Some("fb-1004".to_string()),
            status: LeadStatus::Qualified,
            source: LeadSource::WhatsappInbound,
            tags: vec![],
            consent_given: true,
            consent_at: Some(now - Duration::days(1)),
            opted_out: true,
            last_messenger_inbound_at: Some(now - Duration::hours(5)),
            last_whatsapp_inbound_at: None,
            created_at: now,
            modified_at: now,
        },
    ];

    let campaigns = vec![
        Campaign {
            id: whatsapp_campaign_id,
            name: "Spring promo".to_string(),
            description: Some("Template blast to the spring segment".to_string()),
            campaign_type: CampaignType::WhatsappTemplate,
            status: CampaignStatus::Draft,
            template_id: Some(approved_template_id),
            message_content: None,
            audience: TargetAudience::default(),
            scheduled_at: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            modified_at: now,
        },
        Campaign {
            id: messenger_campaign_id,
            name: "VIP check-in".to_string(),
            description: None,
            campaign_type: CampaignType::MessengerBroadcast,
            status: CampaignStatus::Draft,
            template_id: None,
            message_content: Some("Hi {{first_name}}, anything we can help with?".to_string()),
            audience: TargetAudience {
                statuses: None,
                sources: None,
                tags: Some(vec!["vip".to_string()]),
            },
            scheduled_at: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            modified_at: now,
        },
    ];

    for template in &templates {
        db.templates().insert_template(template).await?;
    }
    for lead in &leads {
        db.leads().insert_lead(lead).await?;
    }
    for campaign in &campaigns {
        db.campaigns().insert_campaign(campaign).await?;
    }

    Ok(())
}
