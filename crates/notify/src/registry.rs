//! Event route registry: the typed table mapping event keys to dispatch
//! parameters.
//!
//! New domain events are wired in by adding a route here (or via
//! [`EventRegistry::insert`] at startup) -- dispatch logic never changes.

use std::collections::HashMap;

use shopline_core::channels::{CHANNEL_EMAIL, CHANNEL_IN_APP, CHANNEL_PUSH, CHANNEL_SMS};
use shopline_core::notification::{Importance, NotificationType};

/// How the recipient set of an event is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientRule {
    /// Every active user holding one of these roles.
    Roles(Vec<String>),
    /// Every active user in one of these sectors.
    Sectors(Vec<String>),
    /// The single user whose id sits under this key in the event payload.
    ContextUser(&'static str),
    /// Every active user except the triggering one.
    AllExceptActor,
}

/// Dispatch parameters for one event key.
#[derive(Debug, Clone)]
pub struct EventRoute {
    pub event_key: &'static str,
    pub notification_type: NotificationType,
    pub importance: Importance,
    /// Urgent events bypass aggregation and the calendar gate.
    pub urgent: bool,
    pub recipients: RecipientRule,
    /// Channels used when the recipient has no stored preference.
    pub default_channels: Vec<String>,
    /// `{placeholder}` templates interpolated from the event payload.
    pub title_template: &'static str,
    pub body_template: &'static str,
}

/// Registry of all routable event keys.
pub struct EventRegistry {
    routes: HashMap<&'static str, EventRoute>,
}

impl EventRegistry {
    /// An empty registry (extend via [`insert`](Self::insert)).
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    /// The built-in production-shop routes.
    pub fn defaults() -> Self {
        let mut registry = Self::new();

        let in_app = || vec![CHANNEL_IN_APP.to_string()];
        let in_app_push = || vec![CHANNEL_IN_APP.to_string(), CHANNEL_PUSH.to_string()];
        let all = || {
            vec![
                CHANNEL_IN_APP.to_string(),
                CHANNEL_EMAIL.to_string(),
                CHANNEL_SMS.to_string(),
                CHANNEL_PUSH.to_string(),
            ]
        };
        let production = || RecipientRule::Sectors(vec!["production".into()]);
        let supervisors = || RecipientRule::Roles(vec!["supervisor".into(), "admin".into()]);

        for route in [
            // --- Task lifecycle ---
            EventRoute {
                event_key: "task.created",
                notification_type: NotificationType::Task,
                importance: Importance::Normal,
                urgent: false,
                recipients: production(),
                default_channels: in_app(),
                title_template: "New task: {title}",
                body_template: "{actor_name} created task \"{title}\"",
            },
            EventRoute {
                event_key: "task.assigned",
                notification_type: NotificationType::Task,
                importance: Importance::High,
                urgent: true,
                recipients: RecipientRule::ContextUser("assignee_id"),
                default_channels: in_app_push(),
                title_template: "Task assigned to you: {title}",
                body_template: "{actor_name} assigned \"{title}\" to you",
            },
            EventRoute {
                event_key: "task.field.status",
                notification_type: NotificationType::Task,
                importance: Importance::Normal,
                urgent: false,
                recipients: production(),
                default_channels: in_app(),
                title_template: "Task updated: {title}",
                body_template: "Status changed from {old} to {new}",
            },
            EventRoute {
                event_key: "task.field.deadline",
                notification_type: NotificationType::Task,
                importance: Importance::High,
                urgent: false,
                recipients: production(),
                default_channels: in_app(),
                title_template: "Deadline moved: {title}",
                body_template: "Deadline changed from {old} to {new}",
            },
            EventRoute {
                event_key: "task.field.attachments",
                notification_type: NotificationType::Task,
                importance: Importance::Normal,
                urgent: false,
                recipients: production(),
                default_channels: in_app(),
                title_template: "Files updated: {title}",
                body_template: "{delta}",
            },
            EventRoute {
                event_key: "task.field.*",
                notification_type: NotificationType::Task,
                importance: Importance::Normal,
                urgent: false,
                recipients: production(),
                default_channels: in_app(),
                title_template: "Task updated: {title}",
                body_template: "{label} changed",
            },
            // --- Artwork lifecycle ---
            EventRoute {
                event_key: "artwork.created",
                notification_type: NotificationType::Artwork,
                importance: Importance::Normal,
                urgent: false,
                recipients: RecipientRule::Sectors(vec!["design".into()]),
                default_channels: in_app(),
                title_template: "New artwork: {name}",
                body_template: "{actor_name} uploaded artwork \"{name}\"",
            },
            EventRoute {
                event_key: "artwork.field.status",
                notification_type: NotificationType::Artwork,
                importance: Importance::Normal,
                urgent: false,
                recipients: RecipientRule::Sectors(vec!["design".into()]),
                default_channels: in_app(),
                title_template: "Artwork updated: {name}",
                body_template: "Status changed from {old} to {new}",
            },
            EventRoute {
                event_key: "artwork.field.files",
                notification_type: NotificationType::Artwork,
                importance: Importance::Normal,
                urgent: false,
                recipients: RecipientRule::Sectors(vec!["design".into()]),
                default_channels: in_app(),
                title_template: "Artwork files updated: {name}",
                body_template: "{delta}",
            },
            EventRoute {
                event_key: "artwork.field.*",
                notification_type: NotificationType::Artwork,
                importance: Importance::Normal,
                urgent: false,
                recipients: RecipientRule::Sectors(vec!["design".into()]),
                default_channels: in_app(),
                title_template: "Artwork updated: {name}",
                body_template: "{label} changed",
            },
            // --- Truck lifecycle ---
            EventRoute {
                event_key: "truck.created",
                notification_type: NotificationType::Truck,
                importance: Importance::Normal,
                urgent: false,
                recipients: production(),
                default_channels: in_app(),
                title_template: "New truck: {plate}",
                body_template: "{actor_name} registered truck {plate}",
            },
            EventRoute {
                event_key: "truck.field.status",
                notification_type: NotificationType::Truck,
                importance: Importance::Normal,
                urgent: false,
                recipients: production(),
                default_channels: in_app(),
                title_template: "Truck {plate} updated",
                body_template: "Status changed from {old} to {new}",
            },
            EventRoute {
                event_key: "truck.field.*",
                notification_type: NotificationType::Truck,
                importance: Importance::Normal,
                urgent: false,
                recipients: production(),
                default_channels: in_app(),
                title_template: "Truck {plate} updated",
                body_template: "{label} changed",
            },
            // --- Approval workflow ---
            EventRoute {
                event_key: "approval.requested",
                notification_type: NotificationType::Approval,
                importance: Importance::High,
                urgent: true,
                recipients: supervisors(),
                default_channels: in_app_push(),
                title_template: "Approval needed: {title}",
                body_template: "{actor_name} requested approval for \"{title}\"",
            },
            EventRoute {
                event_key: "approval.decided",
                notification_type: NotificationType::Approval,
                importance: Importance::High,
                urgent: true,
                recipients: RecipientRule::ContextUser("requester_id"),
                default_channels: in_app_push(),
                title_template: "Approval {decision}: {title}",
                body_template: "Your request \"{title}\" was {decision}",
            },
            // --- Reminders (system-sourced) ---
            EventRoute {
                event_key: "reminder.deadline",
                notification_type: NotificationType::Reminder,
                importance: Importance::High,
                urgent: true,
                recipients: RecipientRule::ContextUser("assignee_id"),
                default_channels: all(),
                title_template: "Deadline approaching: {title}",
                body_template: "\"{title}\" is due {due}",
            },
            EventRoute {
                event_key: "reminder.forecast",
                notification_type: NotificationType::Reminder,
                importance: Importance::Normal,
                urgent: false,
                recipients: supervisors(),
                default_channels: in_app(),
                title_template: "Workload forecast",
                body_template: "{summary}",
            },
            // --- System announcements ---
            EventRoute {
                event_key: "system.announcement",
                notification_type: NotificationType::System,
                importance: Importance::Critical,
                urgent: true,
                recipients: RecipientRule::AllExceptActor,
                default_channels: in_app_push(),
                title_template: "{title}",
                body_template: "{body}",
            },
        ] {
            registry.insert(route);
        }

        registry
    }

    /// Register (or replace) a route.
    pub fn insert(&mut self, route: EventRoute) {
        self.routes.insert(route.event_key, route);
    }

    /// Look up the route for an event key.
    ///
    /// Falls back to the `prefix.*` wildcard route when no exact route
    /// exists, so e.g. `task.field.priority` resolves to `task.field.*`
    /// unless a more specific route was registered.
    pub fn get(&self, event_key: &str) -> Option<&EventRoute> {
        if let Some(route) = self.routes.get(event_key) {
            return Some(route);
        }
        let (prefix, _) = event_key.rsplit_once('.')?;
        self.routes.get(format!("{prefix}.*").as_str())
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::defaults()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use shopline_core::channels::is_known_channel;

    #[test]
    fn defaults_cover_the_core_event_keys() {
        let registry = EventRegistry::defaults();
        for key in [
            "task.created",
            "task.field.status",
            "artwork.field.files",
            "truck.field.status",
            "approval.requested",
            "reminder.deadline",
            "system.announcement",
        ] {
            assert!(registry.get(key).is_some(), "missing route for {key}");
        }
    }

    #[test]
    fn unknown_key_has_no_route() {
        assert!(EventRegistry::defaults().get("invoice.created").is_none());
        assert!(EventRegistry::defaults().get("invoice.field.total").is_none());
    }

    #[test]
    fn field_changes_fall_back_to_the_wildcard_route() {
        let registry = EventRegistry::defaults();
        // Exact route wins.
        assert_eq!(
            registry.get("task.field.deadline").map(|r| r.event_key),
            Some("task.field.deadline")
        );
        // Tracked fields without a dedicated route use the wildcard.
        assert_eq!(
            registry.get("task.field.priority").map(|r| r.event_key),
            Some("task.field.*")
        );
        assert_eq!(
            registry.get("truck.field.sector").map(|r| r.event_key),
            Some("truck.field.*")
        );
    }

    #[test]
    fn every_default_channel_is_known() {
        let registry = EventRegistry::defaults();
        for route in registry.routes.values() {
            assert!(!route.default_channels.is_empty(), "{}", route.event_key);
            for channel in &route.default_channels {
                assert!(is_known_channel(channel), "{channel} in {}", route.event_key);
            }
        }
    }

    #[test]
    fn insert_replaces_existing_route() {
        let mut registry = EventRegistry::defaults();
        let before = registry.len();
        let mut route = registry.get("task.created").unwrap().clone();
        route.urgent = true;
        registry.insert(route);

        assert_eq!(registry.len(), before);
        assert!(registry.get("task.created").unwrap().urgent);
    }

    #[test]
    fn urgent_routes_for_workflow_events() {
        let registry = EventRegistry::defaults();
        assert!(registry.get("approval.requested").unwrap().urgent);
        assert!(registry.get("reminder.deadline").unwrap().urgent);
        assert!(!registry.get("task.field.status").unwrap().urgent);
    }
}
