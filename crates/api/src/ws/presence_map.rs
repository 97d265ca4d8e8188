//! Pure connection bookkeeping for the presence layer.
//!
//! One entry per socket (a user with three tabs open has three entries).
//! All methods are synchronous over plain maps; [`super::PresenceRouter`]
//! owns the lock and the IO.

use std::collections::{HashMap, HashSet};

use axum::extract::ws::Message;
use tokio::sync::mpsc;

use shopline_core::types::{DbId, Timestamp};

/// Channel sender half for pushing messages to a WebSocket connection.
pub type WsSender = mpsc::UnboundedSender<Message>;

/// One live device connection.
pub struct DeviceEntry {
    pub user_id: DbId,
    pub sender: WsSender,
    pub rooms: HashSet<String>,
    pub connected_at: Timestamp,
}

/// Outcome of removing a connection.
#[derive(Debug, PartialEq, Eq)]
pub struct Removed {
    pub user_id: DbId,
    /// Whether this was the user's last live device.
    pub went_offline: bool,
}

/// Device/user/room indices for all live connections.
#[derive(Default)]
pub struct PresenceMap {
    devices: HashMap<String, DeviceEntry>,
    by_user: HashMap<DbId, HashSet<String>>,
    rooms: HashMap<String, HashSet<String>>,
}

impl PresenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for a user.
    pub fn add(&mut self, conn_id: String, user_id: DbId, sender: WsSender) {
        self.by_user.entry(user_id).or_default().insert(conn_id.clone());
        self.devices.insert(
            conn_id,
            DeviceEntry {
                user_id,
                sender,
                rooms: HashSet::new(),
                connected_at: chrono::Utc::now(),
            },
        );
    }

    /// Remove a connection, dropping its room memberships.
    ///
    /// Returns `None` for an unknown connection id (a double-close).
    pub fn remove(&mut self, conn_id: &str) -> Option<Removed> {
        let entry = self.devices.remove(conn_id)?;

        for room in &entry.rooms {
            if let Some(members) = self.rooms.get_mut(room) {
                members.remove(conn_id);
                if members.is_empty() {
                    self.rooms.remove(room);
                }
            }
        }

        let went_offline = match self.by_user.get_mut(&entry.user_id) {
            Some(conns) => {
                conns.remove(conn_id);
                if conns.is_empty() {
                    self.by_user.remove(&entry.user_id);
                    true
                } else {
                    false
                }
            }
            None => true,
        };

        Some(Removed {
            user_id: entry.user_id,
            went_offline,
        })
    }

    /// Whether the user has at least one live device.
    pub fn is_online(&self, user_id: DbId) -> bool {
        self.by_user.contains_key(&user_id)
    }

    /// Cloned senders for every live device of a user.
    pub fn senders_for_user(&self, user_id: DbId) -> Vec<WsSender> {
        self.by_user
            .get(&user_id)
            .into_iter()
            .flatten()
            .filter_map(|conn_id| self.devices.get(conn_id))
            .map(|entry| entry.sender.clone())
            .collect()
    }

    /// Cloned senders for every connection in a room.
    pub fn senders_for_room(&self, room: &str) -> Vec<WsSender> {
        self.rooms
            .get(room)
            .into_iter()
            .flatten()
            .filter_map(|conn_id| self.devices.get(conn_id))
            .map(|entry| entry.sender.clone())
            .collect()
    }

    /// Cloned senders for every live connection.
    pub fn all_senders(&self) -> Vec<WsSender> {
        self.devices.values().map(|e| e.sender.clone()).collect()
    }

    /// Join a connection to a room. Returns `false` for unknown connections.
    pub fn join_room(&mut self, conn_id: &str, room: &str) -> bool {
        let Some(entry) = self.devices.get_mut(conn_id) else {
            return false;
        };
        entry.rooms.insert(room.to_string());
        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(conn_id.to_string());
        true
    }

    /// Leave a room, dropping the room index entry when it empties.
    pub fn leave_room(&mut self, conn_id: &str, room: &str) {
        if let Some(entry) = self.devices.get_mut(conn_id) {
            entry.rooms.remove(room);
        }
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(conn_id);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
    }

    /// Number of live connections.
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Number of distinct online users.
    pub fn online_user_count(&self) -> usize {
        self.by_user.len()
    }

    /// Ids of all online users.
    pub fn online_users(&self) -> Vec<DbId> {
        self.by_user.keys().copied().collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> (WsSender, mpsc::UnboundedReceiver<Message>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn user_stays_online_until_last_device_disconnects() {
        let mut map = PresenceMap::new();
        let (tx1, _rx1) = sender();
        let (tx2, _rx2) = sender();

        map.add("conn-a".into(), 7, tx1);
        map.add("conn-b".into(), 7, tx2);
        assert!(map.is_online(7));
        assert_eq!(map.device_count(), 2);
        assert_eq!(map.online_user_count(), 1);

        let removed = map.remove("conn-a").unwrap();
        assert_eq!(removed.user_id, 7);
        assert!(!removed.went_offline);
        assert!(map.is_online(7));

        let removed = map.remove("conn-b").unwrap();
        assert!(removed.went_offline);
        assert!(!map.is_online(7));
    }

    #[test]
    fn double_remove_is_a_noop() {
        let mut map = PresenceMap::new();
        let (tx, _rx) = sender();
        map.add("conn-a".into(), 1, tx);

        assert!(map.remove("conn-a").is_some());
        assert!(map.remove("conn-a").is_none());
    }

    #[test]
    fn senders_fan_out_to_every_device() {
        let mut map = PresenceMap::new();
        let (tx1, mut rx1) = sender();
        let (tx2, mut rx2) = sender();
        map.add("conn-a".into(), 7, tx1);
        map.add("conn-b".into(), 7, tx2);

        for tx in map.senders_for_user(7) {
            tx.send(Message::Text("hi".into())).unwrap();
        }
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
        assert!(map.senders_for_user(8).is_empty());
    }

    #[test]
    fn room_membership_follows_connections() {
        let mut map = PresenceMap::new();
        let (tx1, _rx1) = sender();
        let (tx2, _rx2) = sender();
        map.add("conn-a".into(), 1, tx1);
        map.add("conn-b".into(), 2, tx2);

        assert!(map.join_room("conn-a", "task:12"));
        assert!(map.join_room("conn-b", "task:12"));
        assert!(!map.join_room("ghost", "task:12"));
        assert_eq!(map.senders_for_room("task:12").len(), 2);

        map.leave_room("conn-a", "task:12");
        assert_eq!(map.senders_for_room("task:12").len(), 1);

        // Disconnect drops remaining memberships.
        map.remove("conn-b");
        assert!(map.senders_for_room("task:12").is_empty());
    }

    #[test]
    fn online_users_lists_distinct_ids() {
        let mut map = PresenceMap::new();
        let (tx1, _rx1) = sender();
        let (tx2, _rx2) = sender();
        let (tx3, _rx3) = sender();
        map.add("a".into(), 1, tx1);
        map.add("b".into(), 1, tx2);
        map.add("c".into(), 2, tx3);

        let mut users = map.online_users();
        users.sort();
        assert_eq!(users, vec![1, 2]);
    }
}
