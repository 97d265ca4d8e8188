//! Presence router: live-socket registry plus the in-app delivery surface.
//!
//! Wraps the pure [`PresenceMap`] in a lock and adds the IO around it:
//! unseen-notification replay on connect, badge-count pushes, client ack
//! handling, and the [`RealtimePush`] implementation the dispatch
//! coordinator fans in-app notifications through.

use async_trait::async_trait;
use axum::extract::ws::Message;
use tokio::sync::{mpsc, RwLock};

use shopline_core::channels::CHANNEL_IN_APP;
use shopline_core::types::DbId;
use shopline_db::repositories::{DeliveryRepo, NotificationRepo, UserRepo};
use shopline_db::DbPool;
use shopline_notify::RealtimePush;

use super::presence_map::{PresenceMap, Removed, WsSender};

/// Messages a client may send over the socket.
#[derive(Debug, serde::Deserialize)]
#[serde(tag = "type")]
enum ClientMessage {
    /// Mark one notification as read.
    #[serde(rename = "mark.read")]
    Read { id: DbId },
    /// Mark every notification as read.
    #[serde(rename = "mark.read_all")]
    ReadAll,
    /// Acknowledge on-device receipt of an in-app notification.
    #[serde(rename = "mark.delivered")]
    Delivered { id: DbId },
    /// Join a topic room (e.g. `"task:12"`).
    #[serde(rename = "room.join")]
    JoinRoom { room: String },
    /// Leave a topic room.
    #[serde(rename = "room.leave")]
    LeaveRoom { room: String },
}

/// Connection registry and in-app push surface.
pub struct PresenceRouter {
    pool: DbPool,
    map: RwLock<PresenceMap>,
    replay_limit: i64,
}

impl PresenceRouter {
    pub fn new(pool: DbPool, replay_limit: i64) -> Self {
        Self {
            pool,
            map: RwLock::new(PresenceMap::new()),
            replay_limit,
        }
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    /// Register an authenticated connection and replay what it missed.
    ///
    /// Returns the receiver half of the outbound message channel so the
    /// socket task can forward messages to the sink. Replay failures leave
    /// the connection registered; live pushes still work without the
    /// catch-up, and the REST inbox has everything.
    pub async fn register(
        &self,
        conn_id: String,
        user_id: DbId,
    ) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.map.write().await.add(conn_id.clone(), user_id, tx.clone());
        tracing::info!(conn_id = %conn_id, user_id, "WebSocket connected");

        if let Err(e) = self.join_directory_rooms(&conn_id, user_id).await {
            tracing::warn!(user_id, error = %e, "Room membership lookup failed");
        }
        if let Err(e) = self.replay_unseen(user_id, &tx).await {
            tracing::warn!(user_id, error = %e, "Unseen-notification replay failed");
        }
        rx
    }

    /// Join the connection to its role and sector broadcast rooms.
    async fn join_directory_rooms(&self, conn_id: &str, user_id: DbId) -> Result<(), sqlx::Error> {
        let Some(user) = UserRepo::find_by_id(&self.pool, user_id).await? else {
            return Ok(());
        };
        let mut map = self.map.write().await;
        map.join_room(conn_id, &format!("role:{}", user.role));
        if let Some(sector) = &user.sector {
            map.join_room(conn_id, &format!("sector:{sector}"));
        }
        Ok(())
    }

    /// Push the user's unseen notifications (most recent first) and the
    /// current badge count down one connection.
    async fn replay_unseen(&self, user_id: DbId, tx: &WsSender) -> Result<(), sqlx::Error> {
        let unseen =
            NotificationRepo::list_unseen_for_user(&self.pool, user_id, self.replay_limit).await?;
        let replayed = unseen.len();
        for notification in unseen {
            let _ = tx.send(json_message(&serde_json::json!({
                "type": "notification:new",
                "notification": notification,
                "replay": true,
            })));
        }

        let count = NotificationRepo::unread_count(&self.pool, user_id).await?;
        let _ = tx.send(json_message(&serde_json::json!({
            "type": "notification:count",
            "count": count,
        })));

        tracing::debug!(user_id, replayed, count, "Replayed unseen notifications");
        Ok(())
    }

    /// Remove a connection.
    pub async fn unregister(&self, conn_id: &str) {
        let removed = self.map.write().await.remove(conn_id);
        if let Some(Removed { user_id, went_offline }) = removed {
            tracing::info!(conn_id = %conn_id, user_id, went_offline, "WebSocket disconnected");
        }
    }

    // -----------------------------------------------------------------------
    // Client messages
    // -----------------------------------------------------------------------

    /// Handle one inbound text frame from an authenticated connection.
    ///
    /// Malformed frames are logged and ignored; a misbehaving client cannot
    /// break its own connection, let alone anyone else's.
    pub async fn handle_client_message(&self, conn_id: &str, user_id: DbId, text: &str) {
        let message: ClientMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "Unparseable client frame");
                return;
            }
        };

        let result = match message {
            ClientMessage::Read { id } => self.mark_read(user_id, id).await,
            ClientMessage::ReadAll => self.mark_all_read(user_id).await,
            ClientMessage::Delivered { id } => {
                // Scoped to the acking user so a socket cannot flip delivery
                // state on notifications it does not own.
                let applied =
                    DeliveryRepo::mark_delivered_for_user(&self.pool, id, CHANNEL_IN_APP, user_id)
                        .await;
                applied.map(|_| ())
            }
            ClientMessage::JoinRoom { room } => {
                self.map.write().await.join_room(conn_id, &room);
                Ok(())
            }
            ClientMessage::LeaveRoom { room } => {
                self.map.write().await.leave_room(conn_id, &room);
                Ok(())
            }
        };

        if let Err(e) = result {
            tracing::warn!(conn_id = %conn_id, user_id, error = %e, "Client frame failed");
        }
    }

    async fn mark_read(&self, user_id: DbId, notification_id: DbId) -> Result<(), sqlx::Error> {
        NotificationRepo::mark_seen(&self.pool, notification_id, user_id).await?;
        // Let the user's other devices clear the entry too.
        self.push_raw(
            user_id,
            serde_json::json!({"type": "notification:read", "id": notification_id}),
        )
        .await;
        self.push_count(user_id).await
    }

    async fn mark_all_read(&self, user_id: DbId) -> Result<(), sqlx::Error> {
        NotificationRepo::mark_all_seen(&self.pool, user_id).await?;
        self.push_count(user_id).await
    }

    /// Refresh the badge count on every live device of a user.
    pub async fn push_count(&self, user_id: DbId) -> Result<(), sqlx::Error> {
        let count = NotificationRepo::unread_count(&self.pool, user_id).await?;
        self.push_raw(
            user_id,
            serde_json::json!({"type": "notification:count", "count": count}),
        )
        .await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Outbound pushes
    // -----------------------------------------------------------------------

    async fn push_raw(&self, user_id: DbId, payload: serde_json::Value) -> usize {
        let senders = self.map.read().await.senders_for_user(user_id);
        let message = json_message(&payload);
        let mut reached = 0;
        for tx in senders {
            if tx.send(message.clone()).is_ok() {
                reached += 1;
            }
        }
        reached
    }

    /// Push a payload to every connection in a room.
    pub async fn push_to_room(&self, room: &str, payload: serde_json::Value) -> usize {
        let senders = self.map.read().await.senders_for_room(room);
        let message = json_message(&payload);
        let mut reached = 0;
        for tx in senders {
            if tx.send(message.clone()).is_ok() {
                reached += 1;
            }
        }
        reached
    }

    /// Send a Ping frame to every connected client.
    pub async fn ping_all(&self) {
        for tx in self.map.read().await.all_senders() {
            let _ = tx.send(Message::Ping(axum::body::Bytes::new()));
        }
    }

    /// Send a Close frame to every connection, then clear the registry.
    pub async fn shutdown_all(&self) {
        let mut map = self.map.write().await;
        let count = map.device_count();
        for tx in map.all_senders() {
            let _ = tx.send(Message::Close(None));
        }
        *map = PresenceMap::new();
        tracing::info!(count, "Closed all WebSocket connections");
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    pub async fn device_count(&self) -> usize {
        self.map.read().await.device_count()
    }

    pub async fn online_user_count(&self) -> usize {
        self.map.read().await.online_user_count()
    }

    pub async fn online_users(&self) -> Vec<DbId> {
        self.map.read().await.online_users()
    }
}

#[async_trait]
impl RealtimePush for PresenceRouter {
    async fn push_to_user(&self, user_id: DbId, payload: serde_json::Value) -> usize {
        self.push_raw(user_id, payload).await
    }

    async fn is_online(&self, user_id: DbId) -> bool {
        self.map.read().await.is_online(user_id)
    }
}

fn json_message(payload: &serde_json::Value) -> Message {
    Message::Text(payload.to_string().into())
}
