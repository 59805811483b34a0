use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod graph;

/// Messaging platforms the engine can dispatch to. Each campaign type maps to
/// exactly one of these and each gets its own queue, worker pool, and rate
/// limit account.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelKind {
    WhatsApp,
    Messenger,
}

impl ChannelKind {
    pub fn queue_name(&self) -> &'static str {
        match self {
            ChannelKind::WhatsApp => "whatsapp_queue",
            ChannelKind::Messenger => "messenger_queue",
        }
    }
}

/// Outcome of a single send attempt, classified for the dispatch workers.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SendOutcome {
    Sent {
        provider_message_id: Option<String>,
    },
    /// The platform throttled the account; retry after backoff.
    RateLimited,
    /// Timeout or upstream hiccup; retry up to the attempt ceiling.
    Transient {
        error_code: String,
    },
    /// Invalid recipient, policy violation, rejected template; never retried.
    Permanent {
        error_code: String,
    },
}

/// One per-channel messaging client. Implementations must classify their own
/// failures into [`SendOutcome`]; workers never inspect transport errors.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn channel(&self) -> ChannelKind;

    async fn send(&self, recipient: &str, content: &str) -> SendOutcome;
}
