use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::debug;

use super::{ChannelAdapter, ChannelKind, SendOutcome};

/// Shared Facebook Graph API transport for both messaging channels.
#[derive(Clone, Debug)]
pub struct GraphClient {
    http: Client,
    api_base: String,
    access_token: String,
}

impl GraphClient {
    pub fn new(api_base: String, access_token: String, timeout: Duration) -> GraphClient {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        GraphClient {
            http,
            api_base,
            access_token,
        }
    }

    async fn post(&self, path: &str, body: Value) -> SendOutcome {
        let url = format!("{}/{}", self.api_base, path);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(err) if err.is_timeout() || err.is_connect() => {
                return SendOutcome::Transient {
                    error_code: "network".to_string(),
                }
            }
            Err(_) => {
                return SendOutcome::Permanent {
                    error_code: "request_build".to_string(),
                }
            }
        };

        let status = response.status();
        if status.is_success() {
            let provider_message_id = response
                .json::<Value>()
                .await
                .ok()
                .and_then(|value| graph_message_id(&value));
            return SendOutcome::Sent {
                provider_message_id,
            };
        }

        let error_code = response
            .json::<Value>()
            .await
            .ok()
            .and_then(|value| graph_error_code(&value))
            .unwrap_or_else(|| status.as_u16().to_string());
        debug!(%status, error_code, "graph api send rejected");

        if status == StatusCode::TOO_MANY_REQUESTS {
            SendOutcome::RateLimited
        } else if status.is_server_error() {
            SendOutcome::Transient { error_code }
        } else {
            SendOutcome::Permanent { error_code }
        }
    }
}

fn graph_message_id(value: &Value) -> Option<String> {
    // Messenger replies with a top-level message_id, WhatsApp Cloud nests
    // ids under `messages`.
    value["message_id"]
        .as_str()
        .or_else(|| value["messages"][0]["id"].as_str())
        .map(str::to_string)
}

fn graph_error_code(value: &Value) -> Option<String> {
    value["error"]["code"]
        .as_i64()
        .map(|code| code.to_string())
        .or_else(|| value["error"]["type"].as_str().map(str::to_string))
}

pub struct MessengerAdapter {
    client: GraphClient,
}

impl MessengerAdapter {
    pub fn new(client: GraphClient) -> MessengerAdapter {
        MessengerAdapter { client }
    }
}

#[async_trait]
impl ChannelAdapter for MessengerAdapter {
    fn channel(&self) -> ChannelKind {
        ChannelKind::Messenger
    }

    async fn send(&self, recipient: &str, content: &str) -> SendOutcome {
        let body = json!({
            "recipient": { "id": recipient },
            "messaging_type": "MESSAGE_TAG",
            "message": { "text": content },
        });

        self.client.post("me/messages", body).await
    }
}

pub struct WhatsAppAdapter {
    client: GraphClient,
    phone_number_id: String,
}

impl WhatsAppAdapter {
    pub fn new(client: GraphClient, phone_number_id: String) -> WhatsAppAdapter {
        WhatsAppAdapter {
            client,
            phone_number_id,
        }
    }
}

#[async_trait]
impl ChannelAdapter for WhatsAppAdapter {
    fn channel(&self) -> ChannelKind {
        ChannelKind::WhatsApp
    }

    async fn send(&self, recipient: &str, content: &str) -> SendOutcome {
        let body = json!({
            "messaging_product": "whatsapp",
            "to": recipient,
            "type": "text",
            "text": { "body": content },
        });

        let path = format!("{}/messages", self.phone_number_id);
        self.client.post(&path, body).await
    }
}
