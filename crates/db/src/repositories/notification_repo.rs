//! Repository for the `notifications` and `notification_seen` tables.

use sqlx::PgPool;

use shopline_core::types::DbId;

use crate::models::notification::{NewNotification, Notification};

/// Column list for `notifications` queries.
const COLUMNS: &str = "\
    id, user_id, notification_type, event_key, importance, title, body, \
    action, entity_type, entity_id, channels, metadata, created_at, \
    scheduled_at, sent_at";

/// Same list qualified with the `n.` alias, for joins against
/// `notification_seen`.
const QUALIFIED_COLUMNS: &str = "\
    n.id, n.user_id, n.notification_type, n.event_key, n.importance, \
    n.title, n.body, n.action, n.entity_type, n.entity_id, n.channels, \
    n.metadata, n.created_at, n.scheduled_at, n.sent_at";

/// Provides CRUD operations for notifications and seen-acks.
pub struct NotificationRepo;

impl NotificationRepo {
    /// Create a notification, returning the full row.
    pub async fn create(pool: &PgPool, new: &NewNotification) -> Result<Notification, sqlx::Error> {
        let query = format!(
            "INSERT INTO notifications \
                (user_id, notification_type, event_key, importance, title, body, \
                 action, entity_type, entity_id, channels, metadata, scheduled_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Notification>(&query)
            .bind(new.user_id)
            .bind(&new.notification_type)
            .bind(&new.event_key)
            .bind(&new.importance)
            .bind(&new.title)
            .bind(&new.body)
            .bind(&new.action)
            .bind(&new.entity_type)
            .bind(new.entity_id)
            .bind(serde_json::json!(new.channels))
            .bind(&new.metadata)
            .bind(new.scheduled_at)
            .fetch_one(pool)
            .await
    }

    /// Fetch a notification by id.
    pub async fn get(pool: &PgPool, id: DbId) -> Result<Option<Notification>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM notifications WHERE id = $1");
        sqlx::query_as::<_, Notification>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Stamp `sent_at` on a notification. The row is immutable afterwards.
    pub async fn mark_sent(pool: &PgPool, notification_id: DbId) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE notifications SET sent_at = NOW() \
             WHERE id = $1 AND sent_at IS NULL",
        )
        .bind(notification_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// List notifications for a user, newest first.
    ///
    /// When `unread_only` is `true`, only notifications with no seen-ack are
    /// returned.
    pub async fn list_for_user(
        pool: &PgPool,
        user_id: DbId,
        unread_only: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Notification>, sqlx::Error> {
        let filter = if unread_only {
            "AND s.notification_id IS NULL"
        } else {
            ""
        };
        let query = format!(
            "SELECT {QUALIFIED_COLUMNS} FROM notifications n \
             LEFT JOIN notification_seen s \
               ON s.notification_id = n.id AND s.user_id = n.user_id \
             WHERE n.user_id = $1 {filter} \
             ORDER BY n.created_at DESC \
             LIMIT $2 OFFSET $3"
        );
        sqlx::query_as::<_, Notification>(&query)
            .bind(user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }

    /// List a user's unseen notifications, newest first, for reconnect replay.
    pub async fn list_unseen_for_user(
        pool: &PgPool,
        user_id: DbId,
        limit: i64,
    ) -> Result<Vec<Notification>, sqlx::Error> {
        Self::list_for_user(pool, user_id, true, limit, 0).await
    }

    /// List notifications whose deferred send time has arrived.
    ///
    /// Used by the deferred-send loop to pick up messages the calendar gate
    /// pushed past business-hours boundaries.
    pub async fn list_due_scheduled(
        pool: &PgPool,
        limit: i64,
    ) -> Result<Vec<Notification>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM notifications \
             WHERE scheduled_at IS NOT NULL AND scheduled_at <= NOW() \
               AND sent_at IS NULL \
             ORDER BY scheduled_at ASC LIMIT $1"
        );
        sqlx::query_as::<_, Notification>(&query)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Number of notifications with no seen-ack for the user.
    pub async fn unread_count(pool: &PgPool, user_id: DbId) -> Result<i64, sqlx::Error> {
        let count: Option<i64> = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications n \
             LEFT JOIN notification_seen s \
               ON s.notification_id = n.id AND s.user_id = n.user_id \
             WHERE n.user_id = $1 AND s.notification_id IS NULL",
        )
        .bind(user_id)
        .fetch_one(pool)
        .await?;
        Ok(count.unwrap_or(0))
    }

    /// Record a seen-ack for (notification, user).
    ///
    /// Returns `true` if the ack was newly created, `false` if the
    /// notification was already seen (or belongs to another user).
    pub async fn mark_seen(
        pool: &PgPool,
        notification_id: DbId,
        user_id: DbId,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO notification_seen (notification_id, user_id) \
             SELECT id, user_id FROM notifications \
             WHERE id = $1 AND user_id = $2 \
             ON CONFLICT (notification_id, user_id) DO NOTHING",
        )
        .bind(notification_id)
        .bind(user_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record seen-acks for every unseen notification of a user.
    ///
    /// Returns the number of acks created.
    pub async fn mark_all_seen(pool: &PgPool, user_id: DbId) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO notification_seen (notification_id, user_id) \
             SELECT n.id, n.user_id FROM notifications n \
             LEFT JOIN notification_seen s \
               ON s.notification_id = n.id AND s.user_id = n.user_id \
             WHERE n.user_id = $1 AND s.notification_id IS NULL",
        )
        .bind(user_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
