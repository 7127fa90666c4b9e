//! Room state shared by every connection.

use dashmap::DashMap;
use quire_core::{ClientId, DocumentSnapshot, Operation, RelayEvent, Storage, WireMessage};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const CHANNEL_CAPACITY: usize = 256;

/// An event fanned out to a room, tagged with the sending connection so it
/// is not echoed back.
pub type RoomEvent = (Uuid, RelayEvent);

/// What a connection receives when it joins.
pub struct Joined {
    pub rx: broadcast::Receiver<RoomEvent>,
    pub peer_count: usize,
    pub ops: Vec<Operation>,
}

struct Room {
    tx: broadcast::Sender<RoomEvent>,
    /// Connection id to participant.
    peers: HashMap<Uuid, ClientId>,
    /// Every operation published in the room, in arrival order.
    ops: Vec<Operation>,
    seen: HashSet<(u64, ClientId)>,
}

impl Room {
    fn new(ops: Vec<Operation>) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let mut room = Self {
            tx,
            peers: HashMap::new(),
            ops: Vec::new(),
            seen: HashSet::new(),
        };
        room.record(ops);
        room
    }

    fn record(&mut self, ops: impl IntoIterator<Item = Operation>) -> usize {
        let before = self.ops.len();
        for op in ops {
            if self.seen.insert((op.seq, op.origin)) {
                self.ops.push(op);
            }
        }
        self.ops.len() - before
    }
}

/// Shared application state
pub struct AppState {
    rooms: DashMap<String, Room>,
    storage: Arc<dyn Storage>,
}

impl AppState {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            rooms: DashMap::new(),
            storage,
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn peer_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map_or(0, |room| room.peers.len())
    }

    /// Add a connection to a room, loading the room's log from storage if
    /// the room is not open yet.
    pub async fn join_room(&self, room_id: &str, conn: Uuid, participant: ClientId) -> Joined {
        if !self.rooms.contains_key(room_id) {
            let ops = match self.storage.load(room_id).await {
                Ok(snapshot) => {
                    info!("Restored room {} ({} ops)", room_id, snapshot.ops.len());
                    snapshot.ops
                }
                Err(quire_core::StorageError::NotFound(_)) => Vec::new(),
                Err(e) => {
                    warn!("Failed to load room {}: {}", room_id, e);
                    Vec::new()
                }
            };
            // Another connection may have opened the room while we loaded.
            self.rooms
                .entry(room_id.to_string())
                .or_insert_with(|| Room::new(ops));
        }

        let mut room = self
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Room::new(Vec::new()));
        room.peers.insert(conn, participant);
        Joined {
            rx: room.tx.subscribe(),
            peer_count: room.peers.len(),
            ops: room.ops.clone(),
        }
    }

    /// Remove a connection. The last one out persists the log and closes
    /// the room. Returns the participant that left.
    pub async fn leave_room(&self, room_id: &str, conn: Uuid) -> Option<ClientId> {
        let participant = {
            let mut room = self.rooms.get_mut(room_id)?;
            let participant = room.peers.remove(&conn)?;
            if !room.peers.is_empty() {
                return Some(participant);
            }
            participant
        };
        // Someone may have joined since; then the room stays open.
        let Some((_, room)) = self.rooms.remove_if(room_id, |_, room| room.peers.is_empty()) else {
            return Some(participant);
        };
        let snapshot = DocumentSnapshot::new(room_id, room.ops);

        if !snapshot.ops.is_empty() {
            match self.storage.save(&snapshot).await {
                Ok(()) => info!("Saved room {} ({} ops)", room_id, snapshot.ops.len()),
                Err(e) => warn!("Failed to save room {}: {}", room_id, e),
            }
        }
        Some(participant)
    }

    /// Keep any operations carried by `message` in the room's log.
    pub fn record(&self, room_id: &str, message: &WireMessage) {
        let ops = match message {
            WireMessage::Op(op) => vec![op.clone()],
            WireMessage::Ops { ops, .. } => ops.clone(),
            _ => return,
        };
        if let Some(mut room) = self.rooms.get_mut(room_id) {
            let added = room.record(ops);
            if added > 0 {
                debug!("Room {} log grew by {} to {}", room_id, added, room.ops.len());
            }
        }
    }

    /// Broadcast an event to the rest of a room.
    pub fn broadcast(&self, room_id: &str, from: Uuid, event: RelayEvent) {
        if let Some(room) = self.rooms.get(room_id) {
            let _ = room.tx.send((from, event));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quire_core::{FileStorage, MemoryStorage, OpAction, OpId};

    fn op(origin: u64, seq: u64) -> Operation {
        Operation {
            origin: ClientId(origin),
            seq,
            target_id: OpId::new(ClientId(origin), seq),
            action: OpAction::Delete,
            deps: Vec::new(),
        }
    }

    fn state() -> (Arc<MemoryStorage>, AppState) {
        let storage = Arc::new(MemoryStorage::new());
        (storage.clone(), AppState::new(storage))
    }

    #[tokio::test]
    async fn test_join_and_leave() {
        let (_, state) = state();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let joined = state.join_room("r", a, ClientId(1)).await;
        assert_eq!(joined.peer_count, 1);
        let joined = state.join_room("r", b, ClientId(2)).await;
        assert_eq!(joined.peer_count, 2);

        assert_eq!(state.leave_room("r", a).await, Some(ClientId(1)));
        assert_eq!(state.peer_count("r"), 1);
        assert_eq!(state.leave_room("r", a).await, None);
        assert_eq!(state.leave_room("r", b).await, Some(ClientId(2)));
        assert_eq!(state.room_count(), 0);
    }

    #[tokio::test]
    async fn test_late_joiner_gets_log_without_duplicates() {
        let (_, state) = state();
        let a = Uuid::new_v4();
        state.join_room("r", a, ClientId(1)).await;

        state.record("r", &WireMessage::Op(op(1, 1)));
        state.record(
            "r",
            &WireMessage::Ops {
                participant_id: ClientId(1),
                ops: vec![op(1, 1), op(1, 2)],
            },
        );
        state.record(
            "r",
            &WireMessage::Leave {
                participant_id: ClientId(1),
            },
        );

        let joined = state.join_room("r", Uuid::new_v4(), ClientId(2)).await;
        assert_eq!(joined.ops, vec![op(1, 1), op(1, 2)]);
    }

    #[tokio::test]
    async fn test_empty_room_is_persisted_and_restored() {
        let (storage, state) = state();
        let a = Uuid::new_v4();
        state.join_room("doc", a, ClientId(1)).await;
        state.record("doc", &WireMessage::Op(op(1, 1)));
        state.leave_room("doc", a).await;

        let saved = storage.load("doc").await.unwrap();
        assert_eq!(saved.ops, vec![op(1, 1)]);

        let joined = state.join_room("doc", Uuid::new_v4(), ClientId(3)).await;
        assert_eq!(joined.ops, vec![op(1, 1)]);
    }

    #[tokio::test]
    async fn test_rooms_survive_restart_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let conn = Uuid::new_v4();
        {
            let storage = Arc::new(FileStorage::new(dir.path().to_path_buf()).unwrap());
            let state = AppState::new(storage);
            state.join_room("team/notes", conn, ClientId(1)).await;
            state.record("team/notes", &WireMessage::Op(op(1, 4)));
            state.leave_room("team/notes", conn).await;
        }

        let storage = Arc::new(FileStorage::new(dir.path().to_path_buf()).unwrap());
        let state = AppState::new(storage);
        let joined = state.join_room("team/notes", conn, ClientId(1)).await;
        assert_eq!(joined.ops, vec![op(1, 4)]);
        let other = state.join_room("team_notes", Uuid::new_v4(), ClientId(2)).await;
        assert!(other.ops.is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers() {
        let (_, state) = state();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        state.join_room("r", a, ClientId(1)).await;
        let mut joined = state.join_room("r", b, ClientId(2)).await;

        state.broadcast(
            "r",
            a,
            RelayEvent::PeerLeft {
                participant_id: ClientId(1),
            },
        );
        let (from, event) = joined.rx.recv().await.unwrap();
        assert_eq!(from, a);
        assert_eq!(
            event,
            RelayEvent::PeerLeft {
                participant_id: ClientId(1)
            }
        );
    }
}
