//! Event listener: drains the bus into the dispatch coordinator, plus the
//! helper that turns detected field changes into bus events.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use shopline_core::diff::FieldChange;
use shopline_core::types::DbId;

use crate::bus::{DomainEvent, EventBus};
use crate::dispatch::Dispatcher;

/// Subscribes to the [`EventBus`] and forwards every event to the
/// [`Dispatcher`].
pub struct EventListener {
    bus: Arc<EventBus>,
    dispatcher: Arc<Dispatcher>,
}

impl EventListener {
    pub fn new(bus: Arc<EventBus>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { bus, dispatcher }
    }

    /// Consume events until cancelled.
    ///
    /// A lagged receiver (dispatch slower than the publish rate for longer
    /// than the bus buffer) drops the overwritten events and keeps going;
    /// dispatch itself never errors, so one bad event cannot stop the loop.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut rx = self.bus.subscribe();
        tracing::info!("Event listener started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Event listener stopped");
                    break;
                }
                received = rx.recv() => match received {
                    Ok(event) => self.dispatcher.dispatch(&event).await,
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Event listener lagged, events dropped");
                    }
                    Err(RecvError::Closed) => {
                        tracing::info!("Event bus closed, listener exiting");
                        break;
                    }
                },
            }
        }
    }
}

/// Publish one `{entity}.field.{name}` event per detected change.
///
/// `context` carries entity-level template values (title, plate, ...) and is
/// merged under the per-change keys, which win on collision. The array delta
/// description, when present, lands under `delta`.
pub fn emit_field_change_events(
    bus: &EventBus,
    entity_type: &str,
    entity_id: DbId,
    actor_user_id: Option<DbId>,
    context: &serde_json::Value,
    changes: &[FieldChange],
) {
    for change in changes {
        let mut payload = match context {
            serde_json::Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        payload.insert("field".into(), change.field.into());
        payload.insert("label".into(), change.label.into());
        payload.insert("old".into(), change.old.clone());
        payload.insert("new".into(), change.new.clone());
        payload.insert("changed_by".into(), change.changed_by.into());
        if let Some(delta) = &change.array_delta {
            payload.insert("delta".into(), delta.description.clone().into());
            payload.insert(
                "added".into(),
                serde_json::json!(delta.added),
            );
            payload.insert(
                "removed".into(),
                serde_json::json!(delta.removed),
            );
        }

        let mut event = DomainEvent::new(format!("{entity_type}.field.{}", change.field))
            .with_entity(entity_type, entity_id)
            .with_payload(serde_json::Value::Object(payload));
        if let Some(actor) = actor_user_id {
            event = event.with_actor(actor);
        }
        bus.publish(event);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use shopline_core::diff::detect_changes;

    #[tokio::test]
    async fn field_changes_become_one_event_each() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        let old = serde_json::json!({"status": "pending", "deadline": "2026-09-01"});
        let new = serde_json::json!({"status": "active", "deadline": "2026-09-05"});
        let changes = detect_changes("task", &old, &new, 7);
        assert_eq!(changes.len(), 2);

        emit_field_change_events(
            &bus,
            "task",
            12,
            Some(7),
            &serde_json::json!({"title": "Wrap truck"}),
            &changes,
        );

        let mut keys = Vec::new();
        for _ in 0..2 {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.entity_type.as_deref(), Some("task"));
            assert_eq!(event.entity_id, Some(12));
            assert_eq!(event.actor_user_id, Some(7));
            assert_eq!(event.payload["title"], "Wrap truck");
            assert_eq!(event.payload["changed_by"], 7);
            keys.push(event.event_key);
        }
        keys.sort();
        assert_eq!(keys, ["task.field.deadline", "task.field.status"]);
    }

    #[tokio::test]
    async fn array_delta_description_is_carried() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        let old = serde_json::json!({"attachments": [{"id": "a"}]});
        let new = serde_json::json!({"attachments": [{"id": "a"}, {"id": "b"}]});
        let changes = detect_changes("task", &old, &new, 3);
        assert_eq!(changes.len(), 1);

        emit_field_change_events(&bus, "task", 9, Some(3), &serde_json::json!({}), &changes);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_key, "task.field.attachments");
        assert!(event.payload["delta"].as_str().unwrap().contains("added"));
        assert_eq!(event.payload["added"], serde_json::json!(["b"]));
    }

    #[test]
    fn no_changes_publish_nothing() {
        let bus = EventBus::default();
        emit_field_change_events(&bus, "task", 1, None, &serde_json::json!({}), &[]);
        // No subscriber panic, nothing buffered; publish on an empty change
        // set is a no-op by construction.
    }
}
