//! Repository for the `notification_deliveries` table.
//!
//! One row per (notification, channel) pair, enforced by a unique index and
//! upsert semantics. State transitions are guarded in SQL so concurrent
//! channel sends for the same notification cannot regress a record:
//! timestamps are set with `COALESCE` (never overwritten) and terminal
//! states are excluded from the `WHERE` clauses.

use sqlx::PgPool;

use shopline_core::types::DbId;

use crate::models::notification::NotificationDelivery;

/// Column list for `notification_deliveries` queries.
const COLUMNS: &str = "\
    id, notification_id, channel, state, error_reason, sent_at, \
    delivered_at, failed_at, created_at, updated_at";

/// Provides upsert and state-transition operations for delivery records.
pub struct DeliveryRepo;

impl DeliveryRepo {
    /// Create the pending delivery record for (notification, channel).
    ///
    /// Upsert semantics: if the record already exists (a concurrent dispatch
    /// raced us), the existing row is returned untouched.
    pub async fn upsert_pending(
        pool: &PgPool,
        notification_id: DbId,
        channel: &str,
    ) -> Result<NotificationDelivery, sqlx::Error> {
        let query = format!(
            "INSERT INTO notification_deliveries (notification_id, channel) \
             VALUES ($1, $2) \
             ON CONFLICT (notification_id, channel) DO UPDATE SET \
                updated_at = NOW() \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, NotificationDelivery>(&query)
            .bind(notification_id)
            .bind(channel)
            .fetch_one(pool)
            .await
    }

    /// Transition `pending -> sent`. No-op for any other current state.
    pub async fn mark_sent(
        pool: &PgPool,
        notification_id: DbId,
        channel: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE notification_deliveries SET \
                 state = 'sent', \
                 sent_at = COALESCE(sent_at, NOW()), \
                 updated_at = NOW() \
             WHERE notification_id = $1 AND channel = $2 AND state = 'pending'",
        )
        .bind(notification_id)
        .bind(channel)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Transition `sent -> delivered`.
    ///
    /// Requires a prior `sent` state, so `delivered_at` can never precede
    /// `sent_at` and `failed` records never resurrect.
    pub async fn mark_delivered(
        pool: &PgPool,
        notification_id: DbId,
        channel: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE notification_deliveries SET \
                 state = 'delivered', \
                 delivered_at = COALESCE(delivered_at, NOW()), \
                 updated_at = NOW() \
             WHERE notification_id = $1 AND channel = $2 AND state = 'sent'",
        )
        .bind(notification_id)
        .bind(channel)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Transition `sent -> delivered`, but only when the notification
    /// belongs to `user_id`.
    ///
    /// This is the variant for client-originated acks: the delivery row
    /// carries no owner, so the ownership check joins through
    /// `notifications`. An ack against someone else's notification matches
    /// zero rows.
    pub async fn mark_delivered_for_user(
        pool: &PgPool,
        notification_id: DbId,
        channel: &str,
        user_id: DbId,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE notification_deliveries d SET \
                 state = 'delivered', \
                 delivered_at = COALESCE(d.delivered_at, NOW()), \
                 updated_at = NOW() \
             FROM notifications n \
             WHERE d.notification_id = $1 AND d.channel = $2 AND d.state = 'sent' \
               AND n.id = d.notification_id AND n.user_id = $3",
        )
        .bind(notification_id)
        .bind(channel)
        .bind(user_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Transition `pending/sent -> failed` with an error reason.
    pub async fn mark_failed(
        pool: &PgPool,
        notification_id: DbId,
        channel: &str,
        reason: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE notification_deliveries SET \
                 state = 'failed', \
                 error_reason = $3, \
                 failed_at = COALESCE(failed_at, NOW()), \
                 updated_at = NOW() \
             WHERE notification_id = $1 AND channel = $2 \
               AND state IN ('pending', 'sent')",
        )
        .bind(notification_id)
        .bind(channel)
        .bind(reason)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Fetch the delivery record for (notification, channel), if any.
    pub async fn get(
        pool: &PgPool,
        notification_id: DbId,
        channel: &str,
    ) -> Result<Option<NotificationDelivery>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM notification_deliveries \
             WHERE notification_id = $1 AND channel = $2"
        );
        sqlx::query_as::<_, NotificationDelivery>(&query)
            .bind(notification_id)
            .bind(channel)
            .fetch_optional(pool)
            .await
    }

    /// List every delivery record for a notification.
    pub async fn list_for_notification(
        pool: &PgPool,
        notification_id: DbId,
    ) -> Result<Vec<NotificationDelivery>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM notification_deliveries \
             WHERE notification_id = $1 ORDER BY channel"
        );
        sqlx::query_as::<_, NotificationDelivery>(&query)
            .bind(notification_id)
            .fetch_all(pool)
            .await
    }

    /// Channels of a notification still awaiting their first send attempt.
    pub async fn pending_channels(
        pool: &PgPool,
        notification_id: DbId,
    ) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT channel FROM notification_deliveries \
             WHERE notification_id = $1 AND state = 'pending' ORDER BY channel",
        )
        .bind(notification_id)
        .fetch_all(pool)
        .await
    }

    /// Aggregate per-state counts over a channel, for operator reporting.
    pub async fn state_counts_for_channel(
        pool: &PgPool,
        channel: &str,
    ) -> Result<Vec<(String, i64)>, sqlx::Error> {
        sqlx::query_as(
            "SELECT state, COUNT(*) FROM notification_deliveries \
             WHERE channel = $1 GROUP BY state ORDER BY state",
        )
        .bind(channel)
        .fetch_all(pool)
        .await
    }
}
