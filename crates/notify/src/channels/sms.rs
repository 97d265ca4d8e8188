//! SMS delivery through an external HTTP gateway.
//!
//! The gateway contract is a single `POST {url}/messages` with a bearer
//! token and a `{to, message}` JSON body; 2xx means accepted for delivery.

use async_trait::async_trait;

use shopline_core::channels::CHANNEL_SMS;
use shopline_core::types::DbId;

use super::{ChannelError, ChannelSender, DeliveryOutcome, Recipient};

/// Configuration for the SMS gateway channel.
#[derive(Debug, Clone)]
pub struct SmsConfig {
    pub gateway_url: String,
    pub api_token: String,
}

impl SmsConfig {
    /// Load from `SMS_GATEWAY_URL` / `SMS_GATEWAY_TOKEN`.
    ///
    /// Returns `None` when the URL is not set (channel unconfigured).
    pub fn from_env() -> Option<Self> {
        let gateway_url = std::env::var("SMS_GATEWAY_URL").ok()?;
        Some(Self {
            gateway_url,
            api_token: std::env::var("SMS_GATEWAY_TOKEN").unwrap_or_default(),
        })
    }
}

/// Sends notification texts through the SMS gateway.
pub struct SmsSender {
    config: SmsConfig,
    client: reqwest::Client,
}

impl SmsSender {
    pub fn new(config: SmsConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ChannelSender for SmsSender {
    fn channel(&self) -> &'static str {
        CHANNEL_SMS
    }

    async fn send(
        &self,
        notification_id: DbId,
        recipient: &Recipient,
        title: &str,
        body: &str,
        _options: &serde_json::Value,
    ) -> Result<DeliveryOutcome, ChannelError> {
        let Some(phone) = recipient.phone.as_deref() else {
            return Err(ChannelError::NoAddress {
                channel: CHANNEL_SMS,
                user_id: recipient.user_id,
            });
        };

        let payload = serde_json::json!({
            "to": phone,
            "message": format!("{title}: {body}"),
        });

        let response = self
            .client
            .post(format!("{}/messages", self.config.gateway_url))
            .bearer_auth(&self.config.api_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ChannelError::Transport(format!(
                "SMS gateway returned {}",
                response.status()
            )));
        }

        tracing::info!(notification_id, user_id = recipient.user_id, "SMS sent");
        Ok(DeliveryOutcome::Sent)
    }
}
