//! Dispatch coordination: from a routed event to per-channel deliveries.
//!
//! [`Dispatcher::dispatch`] is the single entry point the listeners call. It
//! never returns an error: an unroutable event is logged and dropped, a
//! recipient-resolution failure drops the event (fail closed, no guessing at
//! recipients), and every per-recipient and per-channel failure is recorded
//! on the delivery record without affecting its siblings.
//!
//! Send timing:
//! - urgent routes send immediately, bypassing aggregation and the calendar
//!   gate (after flushing any buffer already open for the same key);
//! - non-urgent field changes are buffered in the [`Aggregator`];
//! - all other non-urgent sends are calendar-gated: outside business hours
//!   the row is stamped with `scheduled_at`, the in-app copy still goes out
//!   right away, and the external channels wait for the deferred-send loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use shopline_core::channels::CHANNEL_IN_APP;
use shopline_core::notification::ActionRef;
use shopline_core::types::DbId;
use shopline_db::models::notification::{NewNotification, Notification};
use shopline_db::models::preference::Preference;
use shopline_db::models::user::User;
use shopline_db::repositories::{DeliveryRepo, NotificationRepo, PreferenceRepo, UserRepo};
use shopline_db::DbPool;

use crate::aggregation::{AggKey, Aggregator, BufferMeta, ChangeEntry, FlushSink, PendingAggregation};
use crate::bus::DomainEvent;
use crate::calendar::BusinessCalendar;
use crate::channels::email::{EmailConfig, EmailSender};
use crate::channels::push::{PushConfig, PushSender};
use crate::channels::sms::{SmsConfig, SmsSender};
use crate::channels::{ChannelSender, DeliveryOutcome, Recipient};
use crate::presence::RealtimePush;
use crate::registry::{EventRegistry, EventRoute, RecipientRule};
use crate::tracker::DeliveryTracker;

/// How often the deferred-send loop polls for due notifications.
const DEFERRED_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Batch size per deferred-send poll.
const DEFERRED_BATCH: i64 = 100;

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

/// Everything a [`Dispatcher`] is built from.
pub struct DispatchContext {
    pub pool: DbPool,
    pub registry: EventRegistry,
    pub calendar: Arc<BusinessCalendar>,
    pub aggregator: Arc<Aggregator>,
    pub realtime: Arc<dyn RealtimePush>,
}

/// The dispatch coordinator.
pub struct Dispatcher {
    pool: DbPool,
    registry: EventRegistry,
    calendar: Arc<BusinessCalendar>,
    aggregator: Arc<Aggregator>,
    tracker: DeliveryTracker,
    realtime: Arc<dyn RealtimePush>,
    senders: HashMap<&'static str, Arc<dyn ChannelSender>>,
}

impl Dispatcher {
    pub fn new(ctx: DispatchContext) -> Self {
        Self {
            tracker: DeliveryTracker::new(ctx.pool.clone()),
            pool: ctx.pool,
            registry: ctx.registry,
            calendar: ctx.calendar,
            aggregator: ctx.aggregator,
            realtime: ctx.realtime,
            senders: HashMap::new(),
        }
    }

    /// Register an external channel sender.
    pub fn register_sender(&mut self, sender: Arc<dyn ChannelSender>) {
        self.senders.insert(sender.channel(), sender);
    }

    /// Register every external channel whose configuration is present in the
    /// environment. Unconfigured channels are skipped with a log line;
    /// deliveries requested on them later fail with `not configured`.
    pub fn register_senders_from_env(&mut self) {
        match EmailConfig::from_env() {
            Some(config) => self.register_sender(Arc::new(EmailSender::new(config))),
            None => tracing::info!("SMTP_HOST not set, email channel disabled"),
        }
        match SmsConfig::from_env() {
            Some(config) => self.register_sender(Arc::new(SmsSender::new(config))),
            None => tracing::info!("SMS_GATEWAY_URL not set, SMS channel disabled"),
        }
        match PushConfig::from_env() {
            Some(config) => self.register_sender(Arc::new(PushSender::new(config))),
            None => tracing::info!("PUSH_GATEWAY_URL not set, push channel disabled"),
        }
    }

    // -----------------------------------------------------------------------
    // Dispatch entry point
    // -----------------------------------------------------------------------

    /// Route one event to its recipients.
    ///
    /// Infallible by contract: every failure mode is logged or recorded on
    /// the delivery records, never surfaced to the event source.
    pub async fn dispatch(&self, event: &DomainEvent) {
        let Some(route) = self.registry.get(&event.event_key) else {
            tracing::warn!(event_key = %event.event_key, "No route for event key, dropping");
            return;
        };

        let recipients = match self.resolve_recipients(route, event).await {
            Ok(users) => users,
            Err(e) => {
                // Fail closed: no guessing at recipient sets on a directory error.
                tracing::warn!(
                    event_key = %event.event_key,
                    error = %e,
                    "Recipient resolution failed, dropping event"
                );
                return;
            }
        };

        tracing::debug!(
            event_key = %event.event_key,
            recipients = recipients.len(),
            "Dispatching event"
        );

        for user in recipients {
            if suppress_self_notification(event, user.id) {
                tracing::debug!(user_id = user.id, "Skipping actor self-notification");
                continue;
            }
            if let Err(e) = self.dispatch_to_user(route, event, &user).await {
                tracing::warn!(
                    event_key = %event.event_key,
                    user_id = user.id,
                    error = %e,
                    "Dispatch to recipient failed"
                );
            }
        }
    }

    async fn dispatch_to_user(
        &self,
        route: &EventRoute,
        event: &DomainEvent,
        user: &User,
    ) -> Result<(), sqlx::Error> {
        let channels = self.resolve_channels(user.id, route).await?;
        if channels.is_empty() {
            // The user disabled this event entirely. Silent by contract.
            tracing::debug!(
                user_id = user.id,
                event_key = %event.event_key,
                "All channels disabled by preference, skipping"
            );
            return Ok(());
        }

        // Literal overrides in the payload bypass the route templates.
        let title = payload_override(&event.payload, "title_override")
            .unwrap_or_else(|| render_template(route.title_template, &event.payload));
        let body = payload_override(&event.payload, "body_override")
            .unwrap_or_else(|| render_template(route.body_template, &event.payload));

        // Non-urgent field changes collapse into the aggregation buffer.
        if !route.urgent && is_field_change(&event.event_key) {
            if let (Some(entity_type), Some(entity_id)) =
                (event.entity_type.clone(), event.entity_id)
            {
                let key = AggKey {
                    user_id: user.id,
                    entity_type,
                    entity_id,
                };
                self.aggregator.buffer(
                    key,
                    BufferMeta {
                        notification_type: route.notification_type.as_str().to_string(),
                        importance: route.importance.as_str().to_string(),
                        event_key: event.event_key.clone(),
                        channels,
                    },
                    ChangeEntry {
                        label: change_label(event),
                        summary: body,
                        payload: event.payload.clone(),
                        buffered_at: event.timestamp,
                    },
                );
                return Ok(());
            }
        }

        let params = SendParams {
            user_id: user.id,
            notification_type: route.notification_type.as_str().to_string(),
            event_key: event.event_key.clone(),
            importance: route.importance.as_str().to_string(),
            title,
            body,
            action: event.payload.get("action").cloned(),
            entity_type: event.entity_type.clone(),
            entity_id: event.entity_id,
            channels,
            metadata: event.payload.clone(),
        };

        if route.urgent {
            // An open buffer for the same key would otherwise arrive after
            // the urgent message; flush it first.
            if let (Some(entity_type), Some(entity_id)) =
                (event.entity_type.clone(), event.entity_id)
            {
                let key = AggKey {
                    user_id: user.id,
                    entity_type,
                    entity_id,
                };
                if let Some(pending) = self.aggregator.take(&key) {
                    self.send_merged(pending).await;
                }
            }
            self.send_now(&recipient_of(user), params, false).await?;
        } else {
            self.send_now(&recipient_of(user), params, true).await?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Recipient and channel resolution
    // -----------------------------------------------------------------------

    async fn resolve_recipients(
        &self,
        route: &EventRoute,
        event: &DomainEvent,
    ) -> Result<Vec<User>, sqlx::Error> {
        match &route.recipients {
            RecipientRule::Roles(roles) => UserRepo::active_by_roles(&self.pool, roles).await,
            RecipientRule::Sectors(sectors) => {
                UserRepo::active_by_sectors(&self.pool, sectors).await
            }
            RecipientRule::ContextUser(key) => {
                let Some(user_id) = event.payload.get(*key).and_then(|v| v.as_i64()) else {
                    tracing::warn!(
                        event_key = %event.event_key,
                        payload_key = key,
                        "Context-user key missing from payload"
                    );
                    return Ok(Vec::new());
                };
                let user = UserRepo::find_by_id(&self.pool, user_id).await?;
                Ok(user.into_iter().filter(|u| u.is_active).collect())
            }
            RecipientRule::AllExceptActor => {
                UserRepo::all_active_except(&self.pool, event.actor_user_id.unwrap_or(0)).await
            }
        }
    }

    /// The user's stored channel list for this event, or the route defaults
    /// when nothing is stored.
    async fn resolve_channels(
        &self,
        user_id: DbId,
        route: &EventRoute,
    ) -> Result<Vec<String>, sqlx::Error> {
        let preference = PreferenceRepo::get(
            &self.pool,
            user_id,
            route.notification_type.as_str(),
            route.event_key,
        )
        .await?;
        Ok(channels_for(preference.as_ref(), route))
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    /// Persist a notification and drive its channel sends.
    ///
    /// When `gated` is set and the calendar gate is closed, the row gets a
    /// `scheduled_at`, the in-app copy is still pushed immediately, and the
    /// external channels stay pending for the deferred-send loop.
    async fn send_now(
        &self,
        recipient: &Recipient,
        params: SendParams,
        gated: bool,
    ) -> Result<(), sqlx::Error> {
        let scheduled_at = if gated && !self.calendar.can_send_now().await {
            Some(self.calendar.next_sendable_time().await)
        } else {
            None
        };

        let action = params.action.clone().or_else(|| {
            params
                .entity_type
                .as_deref()
                .zip(params.entity_id)
                .and_then(|(t, id)| serde_json::to_value(ActionRef::new(t, id)).ok())
        });

        let notification = NotificationRepo::create(
            &self.pool,
            &NewNotification {
                user_id: params.user_id,
                notification_type: params.notification_type,
                event_key: params.event_key,
                importance: params.importance,
                title: params.title,
                body: params.body,
                action,
                entity_type: params.entity_type,
                entity_id: params.entity_id,
                channels: params.channels.clone(),
                metadata: params.metadata,
                scheduled_at,
            },
        )
        .await?;

        for channel in &params.channels {
            self.tracker.ensure_pending(notification.id, channel).await?;
        }

        if params.channels.iter().any(|c| c == CHANNEL_IN_APP) {
            self.push_in_app(&notification).await?;
        }

        let external: Vec<&str> = params
            .channels
            .iter()
            .map(String::as_str)
            .filter(|c| *c != CHANNEL_IN_APP)
            .collect();

        if let Some(at) = scheduled_at {
            tracing::debug!(
                notification_id = notification.id,
                scheduled_at = %at,
                deferred_channels = external.len(),
                "Outside business hours, external channels deferred"
            );
        } else {
            self.send_external(&notification, recipient, &external).await;
            NotificationRepo::mark_sent(&self.pool, notification.id).await?;
        }
        Ok(())
    }

    /// Push the in-app copy over any live sockets and refresh the badge.
    async fn push_in_app(&self, notification: &Notification) -> Result<(), sqlx::Error> {
        let payload = serde_json::json!({
            "type": "notification:new",
            "notification": notification,
        });
        let reached = self.realtime.push_to_user(notification.user_id, payload).await;

        // Stored-and-pushed counts as sent even with zero live devices; the
        // message is replayed from the database on the next connect.
        self.tracker.record_sent(notification.id, CHANNEL_IN_APP).await?;
        if reached > 0 {
            self.tracker
                .record_delivered(notification.id, CHANNEL_IN_APP)
                .await?;
        }

        let count = NotificationRepo::unread_count(&self.pool, notification.user_id).await?;
        self.realtime
            .push_to_user(
                notification.user_id,
                serde_json::json!({"type": "notification:count", "count": count}),
            )
            .await;
        Ok(())
    }

    /// Drive the external channel sends for one notification, all failures
    /// isolated per channel.
    async fn send_external(
        &self,
        notification: &Notification,
        recipient: &Recipient,
        channels: &[&str],
    ) {
        let sends = channels.iter().map(|channel| {
            let channel = *channel;
            async move {
                if let Err(e) = self.send_one_channel(notification, recipient, channel).await {
                    tracing::warn!(
                        notification_id = notification.id,
                        channel,
                        error = %e,
                        "Delivery bookkeeping failed"
                    );
                }
            }
        });
        futures::future::join_all(sends).await;
    }

    async fn send_one_channel(
        &self,
        notification: &Notification,
        recipient: &Recipient,
        channel: &str,
    ) -> Result<(), sqlx::Error> {
        let Some(sender) = self.senders.get(channel) else {
            self.tracker
                .record_failed(notification.id, channel, "channel not configured")
                .await?;
            return Ok(());
        };

        let outcome = sender
            .send(
                notification.id,
                recipient,
                &notification.title,
                &notification.body,
                &notification.metadata,
            )
            .await;

        match outcome {
            Ok(DeliveryOutcome::Sent) => {
                self.tracker.record_sent(notification.id, channel).await?;
            }
            Ok(DeliveryOutcome::Delivered) => {
                self.tracker.record_sent(notification.id, channel).await?;
                self.tracker.record_delivered(notification.id, channel).await?;
            }
            Err(e) => {
                tracing::warn!(
                    notification_id = notification.id,
                    channel,
                    error = %e,
                    "Channel send failed"
                );
                self.tracker
                    .record_failed(notification.id, channel, &e.to_string())
                    .await?;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Aggregation flushes
    // -----------------------------------------------------------------------

    /// Send one flushed aggregation buffer as a merged notification.
    pub async fn send_merged(&self, pending: PendingAggregation) {
        let user = match UserRepo::find_by_id(&self.pool, pending.key.user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                tracing::warn!(user_id = pending.key.user_id, "Aggregation user vanished");
                return;
            }
            Err(e) => {
                tracing::warn!(
                    user_id = pending.key.user_id,
                    error = %e,
                    "User lookup failed, dropping merged notification"
                );
                return;
            }
        };

        let title = merged_title(&pending);
        let body = merged_body(&pending.entries);
        let metadata = serde_json::json!({
            "aggregated": true,
            "window_started_at": pending.window_started_at,
            "changes": pending
                .entries
                .iter()
                .map(|e| e.payload.clone())
                .collect::<Vec<_>>(),
        });

        let params = SendParams {
            user_id: user.id,
            notification_type: pending.meta.notification_type,
            event_key: pending.meta.event_key,
            importance: pending.meta.importance,
            title,
            body,
            action: None,
            entity_type: Some(pending.key.entity_type),
            entity_id: Some(pending.key.entity_id),
            channels: pending.meta.channels,
            metadata,
        };

        if let Err(e) = self.send_now(&recipient_of(&user), params, true).await {
            tracing::warn!(user_id = user.id, error = %e, "Merged send failed");
        }
    }

    /// Flush every buffer of one user immediately.
    pub async fn flush_user(&self, user_id: DbId) -> usize {
        let drained = self.aggregator.drain_user(user_id);
        let count = drained.len();
        for pending in drained {
            self.send_merged(pending).await;
        }
        count
    }

    /// Flush every outstanding buffer immediately.
    pub async fn flush_all(&self) -> usize {
        let drained = self.aggregator.drain_all();
        let count = drained.len();
        for pending in drained {
            self.send_merged(pending).await;
        }
        count
    }

    // -----------------------------------------------------------------------
    // Deferred sends
    // -----------------------------------------------------------------------

    /// Poll for calendar-deferred notifications whose send time has arrived
    /// and complete their external deliveries. Runs until cancelled.
    pub async fn run_deferred_sends(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(DEFERRED_POLL_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Deferred-send loop stopped");
                    break;
                }
                _ = ticker.tick() => {}
            }

            // A stamped scheduled_at can still land outside the gate after a
            // restart; re-check instead of trusting the stored instant.
            if !self.calendar.can_send_now().await {
                continue;
            }

            let due = match NotificationRepo::list_due_scheduled(&self.pool, DEFERRED_BATCH).await {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::warn!(error = %e, "Deferred-send poll failed");
                    continue;
                }
            };

            for notification in due {
                if let Err(e) = self.complete_deferred(&notification).await {
                    tracing::warn!(
                        notification_id = notification.id,
                        error = %e,
                        "Deferred send failed"
                    );
                }
            }
        }
    }

    async fn complete_deferred(&self, notification: &Notification) -> Result<(), sqlx::Error> {
        let Some(user) = UserRepo::find_by_id(&self.pool, notification.user_id).await? else {
            NotificationRepo::mark_sent(&self.pool, notification.id).await?;
            return Ok(());
        };

        let pending = DeliveryRepo::pending_channels(&self.pool, notification.id).await?;
        let external: Vec<&str> = pending
            .iter()
            .map(String::as_str)
            .filter(|c| *c != CHANNEL_IN_APP)
            .collect();

        tracing::info!(
            notification_id = notification.id,
            channels = external.len(),
            "Completing deferred send"
        );
        self.send_external(notification, &recipient_of(&user), &external).await;
        NotificationRepo::mark_sent(&self.pool, notification.id).await?;
        Ok(())
    }
}

#[async_trait]
impl FlushSink for Dispatcher {
    async fn flush(&self, pending: PendingAggregation) {
        self.send_merged(pending).await;
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct SendParams {
    user_id: DbId,
    notification_type: String,
    event_key: String,
    importance: String,
    title: String,
    body: String,
    action: Option<serde_json::Value>,
    entity_type: Option<String>,
    entity_id: Option<DbId>,
    channels: Vec<String>,
    metadata: serde_json::Value,
}

fn recipient_of(user: &User) -> Recipient {
    Recipient {
        user_id: user.id,
        name: user.name.clone(),
        email: user.email.clone(),
        phone: user.phone.clone(),
        push_token: user.push_token.clone(),
    }
}

/// Actor mutations never notify the actor, unless the event is raised by the
/// system on the actor's behalf (reminders).
fn suppress_self_notification(event: &DomainEvent, recipient_id: DbId) -> bool {
    !event.system_sourced && event.actor_user_id == Some(recipient_id)
}

fn is_field_change(event_key: &str) -> bool {
    event_key.contains(".field.")
}

/// The effective channel set for one recipient: the stored preference wins,
/// including a stored empty list (the user opted out of this event, nothing
/// is created for them); only the absence of a row falls back to the route
/// defaults.
fn channels_for(preference: Option<&Preference>, route: &EventRoute) -> Vec<String> {
    match preference {
        Some(pref) => pref.channel_list(),
        None => route.default_channels.clone(),
    }
}

/// Field label for an aggregation entry: explicit `label` from the payload,
/// or the last event-key segment.
fn change_label(event: &DomainEvent) -> String {
    event
        .payload
        .get("label")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| {
            event
                .event_key
                .rsplit('.')
                .next()
                .unwrap_or(&event.event_key)
                .to_string()
        })
}

fn payload_override(payload: &serde_json::Value, key: &str) -> Option<String> {
    payload.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

/// Interpolate `{placeholder}` markers from a JSON object.
///
/// String values are inserted verbatim, other values via their JSON text.
/// Unknown placeholders are left in place so missing payload data is visible
/// rather than silently blanked.
fn render_template(template: &str, values: &serde_json::Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let key = &after[..close];
                match values.get(key) {
                    Some(serde_json::Value::String(s)) => out.push_str(s),
                    Some(value) => out.push_str(&value.to_string()),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn merged_title(pending: &PendingAggregation) -> String {
    let noun = &pending.key.entity_type;
    let n = pending.entries.len();
    if n == 1 {
        format!("Update to {} #{}", noun, pending.key.entity_id)
    } else {
        format!("{} updates to {} #{}", n, noun, pending.key.entity_id)
    }
}

/// Merged body: total change count plus the distinct field labels in
/// first-appearance order.
fn merged_body(entries: &[ChangeEntry]) -> String {
    let mut labels: Vec<&str> = Vec::new();
    for entry in entries {
        if !labels.contains(&entry.label.as_str()) {
            labels.push(&entry.label);
        }
    }
    let changes = if entries.len() == 1 { "change" } else { "changes" };
    format!("{} {} to: {}", entries.len(), changes, labels.join(", "))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(label: &str) -> ChangeEntry {
        ChangeEntry {
            label: label.into(),
            summary: String::new(),
            payload: serde_json::json!({}),
            buffered_at: Utc::now(),
        }
    }

    #[test]
    fn render_interpolates_strings_and_numbers() {
        let values = serde_json::json!({"title": "Wrap truck 12", "count": 3});
        assert_eq!(
            render_template("{count} tasks under {title}", &values),
            "3 tasks under Wrap truck 12"
        );
    }

    #[test]
    fn render_leaves_unknown_placeholders_visible() {
        let values = serde_json::json!({"title": "A"});
        assert_eq!(
            render_template("{title} by {actor_name}", &values),
            "A by {actor_name}"
        );
    }

    #[test]
    fn render_handles_unterminated_brace() {
        let values = serde_json::json!({});
        assert_eq!(render_template("broken {tail", &values), "broken {tail");
    }

    #[test]
    fn self_notification_suppressed_for_actor_only() {
        let event = DomainEvent::new("task.created").with_actor(7);
        assert!(suppress_self_notification(&event, 7));
        assert!(!suppress_self_notification(&event, 8));
    }

    #[test]
    fn system_sourced_events_reach_the_actor() {
        let event = DomainEvent::new("reminder.deadline")
            .with_actor(7)
            .system_sourced();
        assert!(!suppress_self_notification(&event, 7));
    }

    #[test]
    fn field_change_detection_by_key_shape() {
        assert!(is_field_change("task.field.status"));
        assert!(!is_field_change("task.created"));
        assert!(!is_field_change("system.announcement"));
    }

    #[test]
    fn change_label_prefers_payload_label() {
        let event = DomainEvent::new("task.field.status")
            .with_payload(serde_json::json!({"label": "status"}));
        assert_eq!(change_label(&event), "status");

        let bare = DomainEvent::new("task.field.deadline");
        assert_eq!(change_label(&bare), "deadline");
    }

    #[test]
    fn merged_body_lists_distinct_labels_with_total_count() {
        let entries = vec![entry("status"), entry("deadline"), entry("status")];
        assert_eq!(merged_body(&entries), "3 changes to: status, deadline");
    }

    #[test]
    fn merged_body_single_change() {
        let entries = vec![entry("status")];
        assert_eq!(merged_body(&entries), "1 change to: status");
    }

    #[tokio::test]
    async fn merged_title_counts_entries() {
        let pending = PendingAggregation {
            key: AggKey {
                user_id: 1,
                entity_type: "task".into(),
                entity_id: 12,
            },
            meta: BufferMeta {
                notification_type: "task".into(),
                importance: "normal".into(),
                event_key: "task.field.status".into(),
                channels: vec![CHANNEL_IN_APP.to_string()],
            },
            entries: vec![entry("status"), entry("deadline")],
            window_started_at: Utc::now(),
            deadline: tokio::time::Instant::now(),
        };
        assert_eq!(merged_title(&pending), "2 updates to task #12");
    }

    fn preference_with_channels(channels: serde_json::Value) -> Preference {
        Preference {
            id: 1,
            user_id: 7,
            notification_type: "task".into(),
            event_key: "task.created".into(),
            channels,
            is_mandatory: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn no_stored_preference_uses_route_defaults() {
        let registry = EventRegistry::defaults();
        let route = registry.get("task.created").unwrap();
        assert_eq!(channels_for(None, route), route.default_channels);
    }

    #[test]
    fn stored_preference_overrides_route_defaults() {
        let registry = EventRegistry::defaults();
        let route = registry.get("task.created").unwrap();
        let pref = preference_with_channels(serde_json::json!(["email", "sms"]));
        assert_eq!(channels_for(Some(&pref), route), vec!["email", "sms"]);
    }

    #[test]
    fn stored_empty_preference_disables_the_event() {
        // An explicit empty list means opt-out: dispatch_to_user sees no
        // channels and returns before any notification row is created.
        let registry = EventRegistry::defaults();
        let route = registry.get("task.created").unwrap();
        let pref = preference_with_channels(serde_json::json!([]));
        assert!(channels_for(Some(&pref), route).is_empty());
    }
}
