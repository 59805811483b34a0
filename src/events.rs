use tokio::sync::broadcast;

use crate::campaign::CampaignId;

/// Notification that a campaign's status or aggregates changed. Mutating
/// operations publish these so cached views are invalidated explicitly
/// instead of relying on pollers to notice staleness.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CampaignEvent {
    pub campaign_id: CampaignId,
    pub kind: CampaignEventKind,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CampaignEventKind {
    StatusChanged,
    StatsChanged,
}

#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<CampaignEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> EventBus {
        let (tx, _) = broadcast::channel(capacity);
        EventBus { tx }
    }

    /// Publishing without subscribers is fine; events are advisory.
    pub fn publish(&self, campaign_id: CampaignId, kind: CampaignEventKind) {
        let _ = self.tx.send(CampaignEvent { campaign_id, kind });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CampaignEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> EventBus {
        EventBus::new(256)
    }
}
