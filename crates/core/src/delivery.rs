//! Per-channel delivery state machine.
//!
//! This module lives in `core` (zero internal deps) so it can be used by
//! both the repository layer and the notification engine's delivery tracker.

use serde::{Deserialize, Serialize};

/// State of one (notification, channel) delivery record.
///
/// Transitions: `Pending -> Sent -> Delivered`, or `Pending/Sent -> Failed`.
/// `Delivered` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    Sent,
    Delivered,
    Failed,
}

impl DeliveryState {
    /// String representation for display, logging, and database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }

    /// Parse a database state string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns the set of valid target states reachable from `self`.
    pub fn valid_transitions(&self) -> &'static [DeliveryState] {
        match self {
            Self::Pending => &[Self::Sent, Self::Failed],
            Self::Sent => &[Self::Delivered, Self::Failed],
            // Terminal states.
            Self::Delivered | Self::Failed => &[],
        }
    }

    /// Check whether a transition from `self` to `to` is valid.
    pub fn can_transition(&self, to: DeliveryState) -> bool {
        self.valid_transitions().contains(&to)
    }
}

impl std::fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_to_sent() {
        assert!(DeliveryState::Pending.can_transition(DeliveryState::Sent));
    }

    #[test]
    fn pending_to_failed() {
        assert!(DeliveryState::Pending.can_transition(DeliveryState::Failed));
    }

    #[test]
    fn sent_to_delivered() {
        assert!(DeliveryState::Sent.can_transition(DeliveryState::Delivered));
    }

    #[test]
    fn sent_to_failed() {
        assert!(DeliveryState::Sent.can_transition(DeliveryState::Failed));
    }

    #[test]
    fn pending_cannot_skip_to_delivered() {
        assert!(!DeliveryState::Pending.can_transition(DeliveryState::Delivered));
    }

    #[test]
    fn failed_is_terminal() {
        assert!(DeliveryState::Failed.valid_transitions().is_empty());
    }

    #[test]
    fn delivered_is_terminal() {
        assert!(DeliveryState::Delivered.valid_transitions().is_empty());
    }

    #[test]
    fn parse_round_trips() {
        use assert_matches::assert_matches;

        for state in [
            DeliveryState::Pending,
            DeliveryState::Sent,
            DeliveryState::Delivered,
            DeliveryState::Failed,
        ] {
            assert_eq!(DeliveryState::parse(state.as_str()), Some(state));
        }
        assert_matches!(DeliveryState::parse("bounced"), None);
    }
}
