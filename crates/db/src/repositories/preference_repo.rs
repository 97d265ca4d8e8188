//! Repository for the `notification_preferences` table.

use sqlx::PgPool;

use shopline_core::types::DbId;

use crate::models::preference::Preference;

/// Column list for `notification_preferences` queries.
const COLUMNS: &str = "\
    id, user_id, notification_type, event_key, channels, is_mandatory, \
    created_at, updated_at";

/// Provides CRUD operations for notification preferences.
pub struct PreferenceRepo;

impl PreferenceRepo {
    /// Get the preference for (user, type, event key), if one is stored.
    ///
    /// A missing row means the user never customized this event; callers
    /// fall back to the event route's default channels.
    pub async fn get(
        pool: &PgPool,
        user_id: DbId,
        notification_type: &str,
        event_key: &str,
    ) -> Result<Option<Preference>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM notification_preferences \
             WHERE user_id = $1 AND notification_type = $2 AND event_key = $3"
        );
        sqlx::query_as::<_, Preference>(&query)
            .bind(user_id)
            .bind(notification_type)
            .bind(event_key)
            .fetch_optional(pool)
            .await
    }

    /// List all preferences for a user.
    pub async fn list_for_user(
        pool: &PgPool,
        user_id: DbId,
    ) -> Result<Vec<Preference>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM notification_preferences \
             WHERE user_id = $1 \
             ORDER BY notification_type, event_key"
        );
        sqlx::query_as::<_, Preference>(&query)
            .bind(user_id)
            .fetch_all(pool)
            .await
    }

    /// Insert or update a preference in a single round-trip.
    ///
    /// The mandatory flag is only ever set by seed data / admin tooling, so
    /// the upsert deliberately does not touch it.
    pub async fn upsert_channels(
        pool: &PgPool,
        user_id: DbId,
        notification_type: &str,
        event_key: &str,
        channels: &[String],
    ) -> Result<Preference, sqlx::Error> {
        let query = format!(
            "INSERT INTO notification_preferences \
                (user_id, notification_type, event_key, channels) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (user_id, notification_type, event_key) DO UPDATE SET \
                channels = EXCLUDED.channels, \
                updated_at = NOW() \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Preference>(&query)
            .bind(user_id)
            .bind(notification_type)
            .bind(event_key)
            .bind(serde_json::json!(channels))
            .fetch_one(pool)
            .await
    }
}
