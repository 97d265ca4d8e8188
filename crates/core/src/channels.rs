//! Well-known delivery channel name constants.
//!
//! These must match the channel values stored in the
//! `notification_deliveries.channel` column and referenced by the dispatch
//! coordinator, channel senders, and API handlers.

/// In-app notification delivered via WebSocket push and stored for the
/// notification bell UI.
pub const CHANNEL_IN_APP: &str = "in_app";

/// Email notification delivered via SMTP.
pub const CHANNEL_EMAIL: &str = "email";

/// SMS notification delivered through an external SMS gateway.
pub const CHANNEL_SMS: &str = "sms";

/// Mobile push notification delivered through an external push gateway.
pub const CHANNEL_PUSH: &str = "push";

/// Every channel the engine knows how to deliver to.
pub const ALL_CHANNELS: &[&str] = &[CHANNEL_IN_APP, CHANNEL_EMAIL, CHANNEL_SMS, CHANNEL_PUSH];

/// Check whether a channel name is one the engine recognizes.
pub fn is_known_channel(channel: &str) -> bool {
    ALL_CHANNELS.contains(&channel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_channels_are_recognized() {
        for channel in ALL_CHANNELS {
            assert!(is_known_channel(channel));
        }
    }

    #[test]
    fn unknown_channel_is_rejected() {
        assert!(!is_known_channel("carrier_pigeon"));
    }
}
