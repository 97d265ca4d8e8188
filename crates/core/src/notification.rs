//! Notification type, importance, and deep-link action primitives.

use serde::{Deserialize, Serialize};

/// Coarse notification category used for preference grouping.
///
/// Preferences are stored per (user, type, event key); the type groups
/// related event keys (e.g. every `task.*` event) under one settings row
/// family in the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Task,
    Artwork,
    Truck,
    Approval,
    Reminder,
    System,
}

impl NotificationType {
    /// String representation for display, logging, and database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Artwork => "artwork",
            Self::Truck => "truck",
            Self::Approval => "approval",
            Self::Reminder => "reminder",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Importance level attached to every notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Low,
    Normal,
    High,
    Critical,
}

impl Importance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Importance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured deep-link payload pointing the client at the entity a
/// notification is about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRef {
    /// Target entity kind (e.g. `"task"`, `"artwork"`, `"truck"`).
    pub entity_type: String,
    /// Target entity database id.
    pub entity_id: i64,
    /// Optional client-side view hint (e.g. `"approval_panel"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view: Option<String>,
}

impl ActionRef {
    pub fn new(entity_type: impl Into<String>, entity_id: i64) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id,
            view: None,
        }
    }

    pub fn with_view(mut self, view: impl Into<String>) -> Self {
        self.view = Some(view.into());
        self
    }
}
