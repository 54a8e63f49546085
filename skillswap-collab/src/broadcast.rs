//! Topic fan-out for the relay.
//!
//! Each document id gets one [`RelayRoom`] holding a tokio broadcast channel.
//! Every subscriber (sender included) gets an independent receiver that
//! buffers up to `capacity` frames; slower peers lag and lose frames rather
//! than stall the room.
//!
//! The room also keeps the roster announced over the topic so late joiners
//! can be told who is already there.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::error::ProtocolError;
use crate::protocol::EditEvent;

/// A user announced on a topic via `USER_JOIN`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub user_id: String,
    pub user_name: String,
}

/// Per-room counters.
#[derive(Debug, Clone, Default)]
pub struct RoomStats {
    pub frames_sent: u64,
    pub frames_lagged: u64,
    pub subscribers: usize,
}

struct AtomicRoomStats {
    frames_sent: AtomicU64,
    frames_lagged: AtomicU64,
}

/// Subscribers of one document topic.
pub struct RelayRoom {
    sender: broadcast::Sender<Arc<String>>,

    /// connection id → user announced on that connection (if any)
    peers: RwLock<HashMap<Uuid, Option<RosterEntry>>>,

    capacity: usize,

    stats: AtomicRoomStats,
}

impl RelayRoom {
    /// Empty room buffering up to `capacity` frames per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            peers: RwLock::new(HashMap::new()),
            capacity,
            stats: AtomicRoomStats {
                frames_sent: AtomicU64::new(0),
                frames_lagged: AtomicU64::new(0),
            },
        }
    }

    /// Register a connection and hand back its receiver.
    ///
    /// Returns `None` when the room already holds `max_peers` connections.
    pub async fn add_peer(
        &self,
        connection_id: Uuid,
        max_peers: usize,
    ) -> Option<broadcast::Receiver<Arc<String>>> {
        let mut peers = self.peers.write().await;
        if peers.len() >= max_peers {
            return None;
        }
        peers.insert(connection_id, None);
        Some(self.sender.subscribe())
    }

    /// Drop a connection. Returns the user it had announced and not retired.
    pub async fn remove_peer(&self, connection_id: &Uuid) -> Option<RosterEntry> {
        self.peers.write().await.remove(connection_id).flatten()
    }

    /// Record a `USER_JOIN` seen on `connection_id`.
    pub async fn announce(&self, connection_id: Uuid, user_id: &str, user_name: &str) {
        if let Some(slot) = self.peers.write().await.get_mut(&connection_id) {
            *slot = Some(RosterEntry {
                user_id: user_id.to_string(),
                user_name: user_name.to_string(),
            });
        }
    }

    /// Record a `USER_LEAVE` seen on `connection_id`.
    pub async fn retire(&self, connection_id: &Uuid, user_id: &str) {
        if let Some(slot) = self.peers.write().await.get_mut(connection_id) {
            if slot.as_ref().is_some_and(|entry| entry.user_id == user_id) {
                *slot = None;
            }
        }
    }

    /// Announced users, one entry per user id, ordered by id.
    pub async fn roster(&self) -> Vec<RosterEntry> {
        let peers = self.peers.read().await;
        let mut unique: HashMap<&str, &RosterEntry> = HashMap::new();
        for entry in peers.values().flatten() {
            unique.insert(entry.user_id.as_str(), entry);
        }
        let mut roster: Vec<RosterEntry> = unique.into_values().cloned().collect();
        roster.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        roster
    }

    /// Whether any live connection still announces `user_id`.
    pub async fn has_user(&self, user_id: &str) -> bool {
        self.peers
            .read()
            .await
            .values()
            .flatten()
            .any(|entry| entry.user_id == user_id)
    }

    /// Encode and fan out an event to every subscriber.
    pub fn broadcast(&self, event: &EditEvent) -> Result<usize, ProtocolError> {
        Ok(self.broadcast_raw(Arc::new(event.encode()?)))
    }

    /// Fan out an already encoded frame. Returns the receiver count.
    pub fn broadcast_raw(&self, frame: Arc<String>) -> usize {
        let count = self.sender.send(frame).unwrap_or(0);
        self.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Count frames a lagging subscriber lost.
    pub fn record_lag(&self, skipped: u64) {
        self.stats.frames_lagged.fetch_add(skipped, Ordering::Relaxed);
    }

    /// Connections currently registered.
    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Snapshot of the room counters.
    pub async fn stats(&self) -> RoomStats {
        RoomStats {
            frames_sent: self.stats.frames_sent.load(Ordering::Relaxed),
            frames_lagged: self.stats.frames_lagged.load(Ordering::Relaxed),
            subscribers: self.peer_count().await,
        }
    }

    /// Per-subscriber buffer size.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Maps document ids to rooms.
pub struct RoomManager {
    rooms: RwLock<HashMap<String, Arc<RelayRoom>>>,
    default_capacity: usize,
}

impl RoomManager {
    /// Empty manager; new rooms buffer `default_capacity` frames.
    pub fn new(default_capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            default_capacity,
        }
    }

    /// Find or create the room for `document_id` and register a connection
    /// in it, all under the manager's write lock.
    ///
    /// Holding the lock across both steps keeps [`remove_if_empty`] from
    /// dropping a room between lookup and registration. Returns `None` when
    /// the room is full; a room created for a rejected connection is not kept.
    ///
    /// [`remove_if_empty`]: Self::remove_if_empty
    pub async fn join(
        &self,
        document_id: &str,
        connection_id: Uuid,
        max_peers: usize,
    ) -> Option<(Arc<RelayRoom>, broadcast::Receiver<Arc<String>>)> {
        let mut rooms = self.rooms.write().await;
        let room = match rooms.get(document_id) {
            Some(room) => room.clone(),
            None => Arc::new(RelayRoom::new(self.default_capacity)),
        };
        let rx = room.add_peer(connection_id, max_peers).await?;
        rooms
            .entry(document_id.to_string())
            .or_insert_with(|| room.clone());
        Some((room, rx))
    }

    /// Room for `document_id`, if one is live.
    pub async fn get(&self, document_id: &str) -> Option<Arc<RelayRoom>> {
        self.rooms.read().await.get(document_id).cloned()
    }

    /// Drop the room once its last subscriber is gone.
    pub async fn remove_if_empty(&self, document_id: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(document_id) {
            if room.peer_count().await == 0 {
                rooms.remove(document_id);
                return true;
            }
        }
        false
    }

    /// Number of live rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Document ids with a live room.
    pub async fn active_documents(&self) -> Vec<String> {
        self.rooms.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fan_out_includes_sender() {
        let room = RelayRoom::new(16);
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let mut rx_alice = room.add_peer(alice, 10).await.unwrap();
        let mut rx_bob = room.add_peer(bob, 10).await.unwrap();

        let event = EditEvent::update("doc-1", "alice", "Alice", "Hello", 1);
        assert_eq!(room.broadcast(&event).unwrap(), 2);

        let echoed = rx_alice.recv().await.unwrap();
        let delivered = rx_bob.recv().await.unwrap();
        assert_eq!(echoed, delivered);
        assert_eq!(EditEvent::decode(&echoed).unwrap(), event);
    }

    #[tokio::test]
    async fn test_max_peers_enforced() {
        let room = RelayRoom::new(16);
        assert!(room.add_peer(Uuid::new_v4(), 2).await.is_some());
        assert!(room.add_peer(Uuid::new_v4(), 2).await.is_some());
        assert!(room.add_peer(Uuid::new_v4(), 2).await.is_none());
        assert_eq!(room.peer_count().await, 2);
    }

    #[tokio::test]
    async fn test_roster_tracks_join_and_leave() {
        let room = RelayRoom::new(16);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let _rx1 = room.add_peer(first, 10).await;
        let _rx2 = room.add_peer(second, 10).await;

        room.announce(first, "bob", "Bob").await;
        room.announce(second, "alice", "Alice").await;
        let ids: Vec<String> = room.roster().await.into_iter().map(|e| e.user_id).collect();
        assert_eq!(ids, vec!["alice", "bob"]);

        room.retire(&first, "bob").await;
        assert!(!room.has_user("bob").await);
        // Retired users are not reported again on disconnect.
        assert!(room.remove_peer(&first).await.is_none());
    }

    #[tokio::test]
    async fn test_remove_peer_reports_unretired_user() {
        let room = RelayRoom::new(16);
        let conn = Uuid::new_v4();
        let _rx = room.add_peer(conn, 10).await;
        room.announce(conn, "bob", "Bob").await;

        let left = room.remove_peer(&conn).await.unwrap();
        assert_eq!(left.user_id, "bob");
        assert_eq!(room.peer_count().await, 0);
    }

    #[tokio::test]
    async fn test_same_user_on_two_connections() {
        let room = RelayRoom::new(16);
        let tab1 = Uuid::new_v4();
        let tab2 = Uuid::new_v4();
        let _rx1 = room.add_peer(tab1, 10).await;
        let _rx2 = room.add_peer(tab2, 10).await;
        room.announce(tab1, "bob", "Bob").await;
        room.announce(tab2, "bob", "Bob").await;

        assert_eq!(room.roster().await.len(), 1);
        room.remove_peer(&tab1).await;
        assert!(room.has_user("bob").await);
    }

    #[tokio::test]
    async fn test_room_stats() {
        let room = RelayRoom::new(16);
        let _rx = room.add_peer(Uuid::new_v4(), 10).await;
        room.broadcast_raw(Arc::new("{}".to_string()));
        room.broadcast_raw(Arc::new("{}".to_string()));
        room.record_lag(3);

        let stats = room.stats().await;
        assert_eq!(stats.frames_sent, 2);
        assert_eq!(stats.frames_lagged, 3);
        assert_eq!(stats.subscribers, 1);
        assert_eq!(room.capacity(), 16);
    }

    #[tokio::test]
    async fn test_room_manager_join_shares_room() {
        let manager = RoomManager::new(16);
        let (room1, _rx1) = manager.join("doc-1", Uuid::new_v4(), 10).await.unwrap();
        let (room2, _rx2) = manager.join("doc-1", Uuid::new_v4(), 10).await.unwrap();
        assert!(Arc::ptr_eq(&room1, &room2));
        assert_eq!(room1.peer_count().await, 2);

        let _doc2 = manager.join("doc-2", Uuid::new_v4(), 10).await.unwrap();
        assert_eq!(manager.room_count().await, 2);
        let mut docs = manager.active_documents().await;
        docs.sort();
        assert_eq!(docs, vec!["doc-1", "doc-2"]);
    }

    #[tokio::test]
    async fn test_room_manager_rejected_join_keeps_no_room() {
        let manager = RoomManager::new(16);
        assert!(manager.join("doc-1", Uuid::new_v4(), 0).await.is_none());
        assert_eq!(manager.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_room_manager_cleanup() {
        let manager = RoomManager::new(16);
        let conn = Uuid::new_v4();
        let (room, _rx) = manager.join("doc-1", conn, 10).await.unwrap();

        assert!(!manager.remove_if_empty("doc-1").await);
        room.remove_peer(&conn).await;
        assert!(manager.remove_if_empty("doc-1").await);
        assert!(manager.get("doc-1").await.is_none());
    }

    #[tokio::test]
    async fn test_join_after_cleanup_lands_in_live_room() {
        let manager = Arc::new(RoomManager::new(16));
        let first = Uuid::new_v4();
        let (old_room, _old_rx) = manager.join("doc-1", first, 10).await.unwrap();
        old_room.remove_peer(&first).await;

        // Cleanup and a new join race; whichever order they run in, the
        // joiner must end up in the room the manager hands out.
        let joiner = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.join("doc-1", Uuid::new_v4(), 10).await })
        };
        let cleaner = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.remove_if_empty("doc-1").await })
        };
        let (room, _rx) = joiner.await.unwrap().unwrap();
        cleaner.await.unwrap();

        let live = manager.get("doc-1").await.expect("joined room is registered");
        assert!(Arc::ptr_eq(&room, &live));
        assert_eq!(live.peer_count().await, 1);
    }
}
