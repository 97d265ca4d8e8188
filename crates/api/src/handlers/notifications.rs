//! HTTP handlers for the `/notifications` resource: the REST inbox, read
//! receipts, delivery records, and per-user channel preferences.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde_json::json;

use shopline_core::channels::is_known_channel;
use shopline_core::error::CoreError;
use shopline_core::types::DbId;
use shopline_db::models::notification::{Notification, NotificationDelivery};
use shopline_db::models::preference::{Preference, UpdatePreference};
use shopline_db::repositories::{DeliveryRepo, NotificationRepo, PreferenceRepo};

use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

#[derive(Debug, serde::Deserialize)]
pub struct ListQuery {
    /// Only return notifications with no read receipt.
    #[serde(default)]
    pub unread: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// `GET /notifications` -- the caller's inbox, newest first.
pub async fn list_notifications(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<Notification>>> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0).max(0);

    let notifications =
        NotificationRepo::list_for_user(&state.pool, user.user_id, query.unread, limit, offset)
            .await?;
    Ok(Json(notifications))
}

/// `GET /notifications/unread-count`
pub async fn unread_count(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<serde_json::Value>> {
    let count = NotificationRepo::unread_count(&state.pool, user.user_id).await?;
    Ok(Json(json!({ "count": count })))
}

/// `POST /notifications/{id}/read`
pub async fn mark_read(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<DbId>,
) -> AppResult<Json<serde_json::Value>> {
    let created = NotificationRepo::mark_seen(&state.pool, id, user.user_id).await?;
    if let Err(e) = state.presence.push_count(user.user_id).await {
        tracing::warn!(user_id = user.user_id, error = %e, "Badge refresh failed");
    }
    Ok(Json(json!({ "marked": created })))
}

/// `POST /notifications/read-all`
pub async fn mark_all_read(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<serde_json::Value>> {
    let marked = NotificationRepo::mark_all_seen(&state.pool, user.user_id).await?;
    if let Err(e) = state.presence.push_count(user.user_id).await {
        tracing::warn!(user_id = user.user_id, error = %e, "Badge refresh failed");
    }
    Ok(Json(json!({ "marked": marked })))
}

/// `GET /notifications/{id}/deliveries` -- per-channel delivery state for
/// one of the caller's notifications.
pub async fn list_deliveries(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<DbId>,
) -> AppResult<Json<Vec<NotificationDelivery>>> {
    let notification = NotificationRepo::get(&state.pool, id)
        .await?
        .ok_or(CoreError::NotFound {
            entity: "notification",
            id,
        })?;
    if notification.user_id != user.user_id {
        return Err(AppError::Core(CoreError::Forbidden(
            "Not your notification".into(),
        )));
    }

    let deliveries = DeliveryRepo::list_for_notification(&state.pool, id).await?;
    Ok(Json(deliveries))
}

/// `GET /notifications/preferences`
pub async fn get_preferences(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<Vec<Preference>>> {
    let preferences = PreferenceRepo::list_for_user(&state.pool, user.user_id).await?;
    Ok(Json(preferences))
}

/// `PUT /notifications/preferences/{notification_type}/{event_key}`
///
/// Mandatory events cannot be emptied: the update must keep at least one
/// channel enabled.
pub async fn update_preference(
    State(state): State<AppState>,
    user: AuthUser,
    Path((notification_type, event_key)): Path<(String, String)>,
    Json(update): Json<UpdatePreference>,
) -> AppResult<Json<Preference>> {
    validate_channels(&update.channels)?;

    let existing =
        PreferenceRepo::get(&state.pool, user.user_id, &notification_type, &event_key).await?;
    ensure_mandatory_keeps_a_channel(
        &update.channels,
        existing.as_ref().is_some_and(|p| p.is_mandatory),
    )?;

    let preference = PreferenceRepo::upsert_channels(
        &state.pool,
        user.user_id,
        &notification_type,
        &event_key,
        &update.channels,
    )
    .await?;
    Ok(Json(preference))
}

/// Reject channel names outside the known vocabulary.
fn validate_channels(channels: &[String]) -> Result<(), CoreError> {
    for channel in channels {
        if !is_known_channel(channel) {
            return Err(CoreError::Validation(format!("Unknown channel: {channel}")));
        }
    }
    Ok(())
}

/// A mandatory preference cannot be updated to an empty channel set.
fn ensure_mandatory_keeps_a_channel(
    channels: &[String],
    is_mandatory: bool,
) -> Result<(), CoreError> {
    if channels.is_empty() && is_mandatory {
        return Err(CoreError::Validation(
            "This notification is mandatory and requires at least one channel".into(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn known_channels_pass_validation() {
        let channels = vec!["in_app".to_string(), "email".to_string()];
        assert!(validate_channels(&channels).is_ok());
        assert!(validate_channels(&[]).is_ok());
    }

    #[test]
    fn unknown_channel_is_rejected() {
        let channels = vec!["in_app".to_string(), "carrier_pigeon".to_string()];
        assert_matches!(
            validate_channels(&channels),
            Err(CoreError::Validation(msg)) if msg.contains("carrier_pigeon")
        );
    }

    #[test]
    fn mandatory_preference_cannot_be_emptied() {
        assert_matches!(
            ensure_mandatory_keeps_a_channel(&[], true),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn mandatory_preference_accepts_a_nonempty_update() {
        let channels = vec!["sms".to_string()];
        assert!(ensure_mandatory_keeps_a_channel(&channels, true).is_ok());
    }

    #[test]
    fn optional_preference_may_disable_every_channel() {
        assert!(ensure_mandatory_keeps_a_channel(&[], false).is_ok());
    }
}
