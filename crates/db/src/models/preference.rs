//! Notification preference models and DTOs.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use shopline_core::types::{DbId, Timestamp};

/// A row from the `notification_preferences` table.
///
/// Keyed by (user, notification type, event key). `channels` is a JSON
/// string array; an empty array disables the event entirely for the user
/// unless `is_mandatory` is set, in which case updates that would empty it
/// are rejected at the write path.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Preference {
    pub id: DbId,
    pub user_id: DbId,
    pub notification_type: String,
    pub event_key: String,
    pub channels: serde_json::Value,
    pub is_mandatory: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Preference {
    /// Decode the enabled-channel list, skipping malformed entries.
    pub fn channel_list(&self) -> Vec<String> {
        self.channels
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// DTO for updating a preference.
#[derive(Debug, Deserialize)]
pub struct UpdatePreference {
    pub channels: Vec<String>,
}
