//! Seam between the engine and the real-time presence layer.
//!
//! The WebSocket connection manager lives in the API server; the dispatcher
//! only needs to fan a payload out to a user's live devices and ask whether
//! anyone is listening. `is_online` is a point-in-time hint: the answer may
//! be stale by the time the caller acts on it.

use async_trait::async_trait;

use shopline_core::types::DbId;

/// Real-time push surface consumed by the dispatch coordinator.
#[async_trait]
pub trait RealtimePush: Send + Sync {
    /// Fan a JSON payload out to every live device of a user.
    ///
    /// Returns the number of devices reached (0 when the user is offline).
    async fn push_to_user(&self, user_id: DbId, payload: serde_json::Value) -> usize;

    /// Whether the user currently has at least one live connection.
    async fn is_online(&self, user_id: DbId) -> bool;
}

/// Push implementation that reaches nobody.
///
/// Used by headless deployments (workers without a socket surface) and as a
/// stand-in under test; in-app content still lands in the database and is
/// replayed on the next connect.
pub struct NoRealtime;

#[async_trait]
impl RealtimePush for NoRealtime {
    async fn push_to_user(&self, _user_id: DbId, _payload: serde_json::Value) -> usize {
        0
    }

    async fn is_online(&self, _user_id: DbId) -> bool {
        false
    }
}
