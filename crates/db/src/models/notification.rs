//! Notification and delivery entity models.

use serde::Serialize;
use sqlx::FromRow;

use shopline_core::types::{DbId, Timestamp};

/// A row from the `notifications` table.
///
/// Immutable once `sent_at` is set; only the per-channel delivery
/// sub-records continue to change after that point.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Notification {
    pub id: DbId,
    pub user_id: DbId,
    /// Coarse category (`task`, `artwork`, `truck`, `approval`, ...).
    pub notification_type: String,
    /// Fine-grained event key the notification originated from
    /// (e.g. `task.field.status`).
    pub event_key: String,
    pub importance: String,
    pub title: String,
    pub body: String,
    /// Structured deep-link payload ([`shopline_core::notification::ActionRef`]).
    pub action: Option<serde_json::Value>,
    pub entity_type: Option<String>,
    pub entity_id: Option<DbId>,
    /// Requested channels at dispatch time, as a JSON string array.
    pub channels: serde_json::Value,
    /// Free-form metadata bag.
    pub metadata: serde_json::Value,
    pub created_at: Timestamp,
    /// Set when the calendar gate deferred the send to a later instant.
    pub scheduled_at: Option<Timestamp>,
    pub sent_at: Option<Timestamp>,
}

/// A row from the `notification_deliveries` table: one per
/// (notification, channel) pair.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct NotificationDelivery {
    pub id: DbId,
    pub notification_id: DbId,
    pub channel: String,
    /// State machine value ([`shopline_core::delivery::DeliveryState`]).
    pub state: String,
    pub error_reason: Option<String>,
    pub sent_at: Option<Timestamp>,
    pub delivered_at: Option<Timestamp>,
    pub failed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Parameters for creating a notification row.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: DbId,
    pub notification_type: String,
    pub event_key: String,
    pub importance: String,
    pub title: String,
    pub body: String,
    pub action: Option<serde_json::Value>,
    pub entity_type: Option<String>,
    pub entity_id: Option<DbId>,
    pub channels: Vec<String>,
    pub metadata: serde_json::Value,
    pub scheduled_at: Option<Timestamp>,
}
