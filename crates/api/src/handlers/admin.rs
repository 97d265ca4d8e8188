//! Operator endpoints: aggregation flushes, presence introspection, and
//! delivery statistics. All require the admin role.

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::Json;
use serde_json::json;

use shopline_core::channels::ALL_CHANNELS;
use shopline_core::types::DbId;
use shopline_db::repositories::DeliveryRepo;

use crate::auth::AuthUser;
use crate::error::AppResult;
use crate::state::AppState;

/// `POST /admin/aggregations/flush` -- flush every open buffer now.
pub async fn flush_all(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<serde_json::Value>> {
    user.require_admin()?;
    let flushed = state.dispatcher.flush_all().await;
    tracing::info!(flushed, admin = user.user_id, "Manual aggregation flush");
    Ok(Json(json!({ "flushed": flushed })))
}

/// `POST /admin/aggregations/flush/{user_id}` -- flush one user's buffers.
pub async fn flush_user(
    State(state): State<AppState>,
    user: AuthUser,
    Path(user_id): Path<DbId>,
) -> AppResult<Json<serde_json::Value>> {
    user.require_admin()?;
    let flushed = state.dispatcher.flush_user(user_id).await;
    Ok(Json(json!({ "flushed": flushed })))
}

/// `GET /admin/presence` -- live connection snapshot.
pub async fn presence_stats(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<serde_json::Value>> {
    user.require_admin()?;
    let mut online = state.presence.online_users().await;
    online.sort_unstable();
    Ok(Json(json!({
        "online_users": online,
        "devices": state.presence.device_count().await,
        "pending_aggregations": state.aggregator.pending_count(),
    })))
}

/// `GET /admin/deliveries/stats` -- per-channel delivery state counts.
pub async fn delivery_stats(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<serde_json::Value>> {
    user.require_admin()?;

    let mut stats = BTreeMap::new();
    for channel in ALL_CHANNELS {
        let counts = DeliveryRepo::state_counts_for_channel(&state.pool, channel).await?;
        let by_state: BTreeMap<String, i64> = counts.into_iter().collect();
        stats.insert(channel.to_string(), by_state);
    }
    Ok(Json(json!({ "channels": stats })))
}
