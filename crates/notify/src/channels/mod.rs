//! External delivery channels.
//!
//! Each sender stops at the provider boundary (SMTP relay, HTTP gateway);
//! provider authentication beyond basic credentials is out of scope. The
//! in-app channel has no sender here -- it is the presence layer's push.

pub mod email;
pub mod push;
pub mod sms;

use async_trait::async_trait;

use shopline_core::types::DbId;

/// What the provider acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Handed off to the provider; end-device receipt unknown.
    Sent,
    /// The provider confirmed end-device receipt synchronously.
    Delivered,
}

/// Error type shared by all channel senders.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The recipient has no usable address for this channel.
    #[error("No {channel} address for user {user_id}")]
    NoAddress { channel: &'static str, user_id: DbId },

    /// The recipient address could not be parsed.
    #[error("Invalid address: {0}")]
    Address(String),

    /// Provider-level failure (connection, authentication, 5xx).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The channel is not configured in this deployment.
    #[error("Channel not configured: {0}")]
    NotConfigured(&'static str),
}

/// Addressing details for one recipient, resolved from the user directory.
#[derive(Debug, Clone)]
pub struct Recipient {
    pub user_id: DbId,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub push_token: Option<String>,
}

/// One delivery medium the dispatcher can hand a message to.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    /// The channel name this sender implements
    /// (one of [`shopline_core::channels`]).
    fn channel(&self) -> &'static str;

    /// Deliver one message to one recipient.
    async fn send(
        &self,
        notification_id: DbId,
        recipient: &Recipient,
        title: &str,
        body: &str,
        options: &serde_json::Value,
    ) -> Result<DeliveryOutcome, ChannelError>;
}
