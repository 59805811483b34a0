use std::collections::BTreeMap;
use std::time::Duration;

use awc::Client;
use leadcast_server::campaign::{CampaignStatus, CampaignType, TargetAudience};
use leadcast_server::dispatch::QueueBody;
use leadcast_server::{CampaignBody, CreateCampaignBody, PreviewBody};

#[actix_rt::test]
#[ignore = "requires a local mongod"]
async fn create_preview_and_inspect_queues() {
    let _ = std::thread::spawn(|| leadcast_server::run(false));
    tokio::time::sleep(Duration::from_millis(500)).await;

    let body = CreateCampaignBody {
        name: "Autumn check-in".into(),
        description: None,
        campaign_type: CampaignType::MessengerBroadcast,
        template_id: None,
        message_content: Some("Hi {{first_name}}, how are things?".into()),
        audience: TargetAudience::default(),
        scheduled_at: None,
    };
    let client = Client::default();
    let campaign: CampaignBody = client
        .post("http://localhost:8080/campaigns")
        .send_json(&body)
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(campaign.name, "Autumn check-in".to_string());
    assert_eq!(campaign.status, CampaignStatus::Draft);
    assert_eq!(campaign.message_stats.total, 0);

    let preview: PreviewBody = client
        .post(format!(
            "http://localhost:8080/campaigns/{}/preview",
            campaign.id
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(
        preview.message_template,
        "Hi {{first_name}}, how are things?".to_string()
    );
    assert_eq!(
        preview.estimated_cost,
        (preview.eligible_leads as f64 * 0.01 * 100.0).round() / 100.0
    );
    assert!(preview.leads_sample.len() <= 10);

    let queues: BTreeMap<String, QueueBody> = client
        .get("http://localhost:8080/queues")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert!(queues.contains_key("whatsapp_queue"));
    assert!(queues.contains_key("messenger_queue"));
}
