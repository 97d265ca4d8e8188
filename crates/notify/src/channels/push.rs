//! Mobile push delivery through an external push gateway.

use async_trait::async_trait;

use shopline_core::channels::CHANNEL_PUSH;
use shopline_core::types::DbId;

use super::{ChannelError, ChannelSender, DeliveryOutcome, Recipient};

/// Configuration for the mobile push gateway channel.
#[derive(Debug, Clone)]
pub struct PushConfig {
    pub gateway_url: String,
    pub api_key: String,
}

impl PushConfig {
    /// Load from `PUSH_GATEWAY_URL` / `PUSH_GATEWAY_KEY`.
    ///
    /// Returns `None` when the URL is not set (channel unconfigured).
    pub fn from_env() -> Option<Self> {
        let gateway_url = std::env::var("PUSH_GATEWAY_URL").ok()?;
        Some(Self {
            gateway_url,
            api_key: std::env::var("PUSH_GATEWAY_KEY").unwrap_or_default(),
        })
    }
}

/// Sends mobile push notifications through the gateway.
pub struct PushSender {
    config: PushConfig,
    client: reqwest::Client,
}

impl PushSender {
    pub fn new(config: PushConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ChannelSender for PushSender {
    fn channel(&self) -> &'static str {
        CHANNEL_PUSH
    }

    async fn send(
        &self,
        notification_id: DbId,
        recipient: &Recipient,
        title: &str,
        body: &str,
        options: &serde_json::Value,
    ) -> Result<DeliveryOutcome, ChannelError> {
        let Some(token) = recipient.push_token.as_deref() else {
            return Err(ChannelError::NoAddress {
                channel: CHANNEL_PUSH,
                user_id: recipient.user_id,
            });
        };

        let payload = serde_json::json!({
            "token": token,
            "title": title,
            "body": body,
            "data": options,
        });

        let response = self
            .client
            .post(format!("{}/send", self.config.gateway_url))
            .header("X-Api-Key", &self.config.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ChannelError::Transport(format!(
                "Push gateway returned {}",
                response.status()
            )));
        }

        tracing::info!(notification_id, user_id = recipient.user_id, "Push sent");
        Ok(DeliveryOutcome::Sent)
    }
}
