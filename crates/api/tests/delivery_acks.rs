//! Database-backed tests for the in-app delivery ack path and for
//! preference-driven dispatch skips.
//!
//! Uses `#[sqlx::test]` so every test runs against its own migrated
//! database, requiring only a reachable Postgres via `DATABASE_URL`.

use std::sync::Arc;

use sqlx::PgPool;

use shopline_api::ws::PresenceRouter;
use shopline_core::channels::CHANNEL_IN_APP;
use shopline_core::types::DbId;
use shopline_db::models::notification::NewNotification;
use shopline_db::repositories::{DeliveryRepo, NotificationRepo, PreferenceRepo};
use shopline_notify::calendar::{BusinessCalendar, CalendarConfig};
use shopline_notify::dispatch::{DispatchContext, Dispatcher};
use shopline_notify::holidays::StaticHolidayProvider;
use shopline_notify::presence::NoRealtime;
use shopline_notify::registry::EventRegistry;
use shopline_notify::{Aggregator, DomainEvent};

async fn insert_user(pool: &PgPool, name: &str, sector: Option<&str>) -> DbId {
    sqlx::query_scalar(
        "INSERT INTO users (name, email, role, sector) \
         VALUES ($1, $2, 'operator', $3) RETURNING id",
    )
    .bind(name)
    .bind(format!("{}@shopline.test", name.to_lowercase()))
    .bind(sector)
    .fetch_one(pool)
    .await
    .expect("insert user")
}

/// Create a notification for `user_id` whose in-app delivery already
/// reached the `sent` state, returning the notification id.
async fn sent_in_app_notification(pool: &PgPool, user_id: DbId) -> DbId {
    let notification = NotificationRepo::create(
        pool,
        &NewNotification {
            user_id,
            notification_type: "task".into(),
            event_key: "task.assigned".into(),
            importance: "high".into(),
            title: "Task assigned to you: Wrap truck 12".into(),
            body: "Dana assigned \"Wrap truck 12\" to you".into(),
            action: None,
            entity_type: Some("task".into()),
            entity_id: Some(12),
            channels: vec![CHANNEL_IN_APP.to_string()],
            metadata: serde_json::json!({}),
            scheduled_at: None,
        },
    )
    .await
    .expect("create notification");

    DeliveryRepo::upsert_pending(pool, notification.id, CHANNEL_IN_APP)
        .await
        .expect("pending delivery");
    assert!(DeliveryRepo::mark_sent(pool, notification.id, CHANNEL_IN_APP)
        .await
        .expect("mark sent"));
    notification.id
}

// ---------------------------------------------------------------------------
// Delivered acks are scoped to the notification's owner
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn delivered_transition_is_scoped_to_the_owner(pool: PgPool) {
    let owner = insert_user(&pool, "Owner", None).await;
    let stranger = insert_user(&pool, "Stranger", None).await;
    let id = sent_in_app_notification(&pool, owner).await;

    // Another user's ack matches no rows.
    let applied = DeliveryRepo::mark_delivered_for_user(&pool, id, CHANNEL_IN_APP, stranger)
        .await
        .unwrap();
    assert!(!applied);

    let record = DeliveryRepo::get(&pool, id, CHANNEL_IN_APP).await.unwrap().unwrap();
    assert_eq!(record.state, "sent");
    assert!(record.delivered_at.is_none());

    // The owner's ack applies.
    let applied = DeliveryRepo::mark_delivered_for_user(&pool, id, CHANNEL_IN_APP, owner)
        .await
        .unwrap();
    assert!(applied);

    let record = DeliveryRepo::get(&pool, id, CHANNEL_IN_APP).await.unwrap().unwrap();
    assert_eq!(record.state, "delivered");
    assert!(record.delivered_at.is_some());
}

#[sqlx::test(migrations = "../db/migrations")]
async fn socket_ack_cannot_touch_another_users_delivery(pool: PgPool) {
    let owner = insert_user(&pool, "Alex", None).await;
    let stranger = insert_user(&pool, "Blake", None).await;
    let id = sent_in_app_notification(&pool, owner).await;

    let router = PresenceRouter::new(pool.clone(), 20);
    let frame = serde_json::json!({"type": "mark.delivered", "id": id}).to_string();

    // A frame from another user's socket is a no-op.
    router.handle_client_message("conn-stranger", stranger, &frame).await;
    let record = DeliveryRepo::get(&pool, id, CHANNEL_IN_APP).await.unwrap().unwrap();
    assert_eq!(record.state, "sent");

    // The same frame from the owner's socket lands.
    router.handle_client_message("conn-owner", owner, &frame).await;
    let record = DeliveryRepo::get(&pool, id, CHANNEL_IN_APP).await.unwrap().unwrap();
    assert_eq!(record.state, "delivered");
}

// ---------------------------------------------------------------------------
// An all-disabled preference suppresses record creation entirely
// ---------------------------------------------------------------------------

fn test_dispatcher(pool: PgPool) -> Dispatcher {
    let calendar = Arc::new(BusinessCalendar::new(
        CalendarConfig::default(),
        Arc::new(StaticHolidayProvider::empty()),
    ));
    Dispatcher::new(DispatchContext {
        pool,
        registry: EventRegistry::defaults(),
        calendar,
        aggregator: Arc::new(Aggregator::default()),
        realtime: Arc::new(NoRealtime),
    })
}

#[sqlx::test(migrations = "../db/migrations")]
async fn disabled_preference_creates_no_records(pool: PgPool) {
    let opted_out = insert_user(&pool, "Quiet", Some("production")).await;
    let listening = insert_user(&pool, "Louder", Some("production")).await;

    // An explicit empty channel list opts the user out of this event.
    PreferenceRepo::upsert_channels(&pool, opted_out, "task", "task.created", &[])
        .await
        .unwrap();

    let dispatcher = test_dispatcher(pool.clone());
    let event = DomainEvent::new("task.created")
        .with_entity("task", 5)
        .with_payload(serde_json::json!({"title": "Paint cab", "actor_name": "Dana"}));
    dispatcher.dispatch(&event).await;

    // The opted-out user got nothing at all: no notification row, hence no
    // delivery rows either.
    let for_opted_out: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = $1")
            .bind(opted_out)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(for_opted_out, 0);

    // The other recipient proves the dispatch itself ran.
    let for_listening: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = $1")
            .bind(listening)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(for_listening, 1);

    let deliveries: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM notification_deliveries d \
         JOIN notifications n ON n.id = d.notification_id \
         WHERE n.user_id = $1",
    )
    .bind(opted_out)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(deliveries, 0);
}
