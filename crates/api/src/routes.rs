//! Route tree for the API server.
//!
//! ```text
//! GET  /health                                            liveness + db check
//!
//! GET  /api/v1/ws                                         WebSocket (token auth)
//!
//! GET  /api/v1/notifications                              inbox
//! GET  /api/v1/notifications/unread-count
//! POST /api/v1/notifications/read-all
//! POST /api/v1/notifications/{id}/read
//! GET  /api/v1/notifications/{id}/deliveries
//! GET  /api/v1/notifications/preferences
//! PUT  /api/v1/notifications/preferences/{type}/{event_key}
//!
//! POST /api/v1/admin/aggregations/flush                   (admin)
//! POST /api/v1/admin/aggregations/flush/{user_id}         (admin)
//! GET  /api/v1/admin/presence                             (admin)
//! GET  /api/v1/admin/deliveries/stats                     (admin)
//! ```

use axum::extract::State;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::json;

use crate::error::AppResult;
use crate::handlers::{admin, notifications};
use crate::state::AppState;
use crate::ws;

/// Routes mounted at the server root.
pub fn health_router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

/// Build the `/api/v1` route tree.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .nest("/notifications", notifications_router())
        .nest("/admin", admin_router())
}

fn notifications_router() -> Router<AppState> {
    Router::new()
        .route("/", get(notifications::list_notifications))
        .route("/unread-count", get(notifications::unread_count))
        .route("/read-all", post(notifications::mark_all_read))
        .route("/{id}/read", post(notifications::mark_read))
        .route("/{id}/deliveries", get(notifications::list_deliveries))
        .route("/preferences", get(notifications::get_preferences))
        .route(
            "/preferences/{notification_type}/{event_key}",
            put(notifications::update_preference),
        )
}

fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/aggregations/flush", post(admin::flush_all))
        .route("/aggregations/flush/{user_id}", post(admin::flush_user))
        .route("/presence", get(admin::presence_stats))
        .route("/deliveries/stats", get(admin::delivery_stats))
}

/// Liveness check with a database round-trip.
async fn health(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    shopline_db::health_check(&state.pool).await?;
    Ok(Json(json!({ "status": "ok" })))
}
