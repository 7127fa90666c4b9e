//! Room logs held in process memory.

use super::{BoxFuture, DocumentSnapshot, Storage, StorageError, StorageResult};
use crate::crdt::Operation;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Keeps each room's operation log in a map. Used for ephemeral relays and
/// tests; everything is lost with the process.
#[derive(Default)]
pub struct MemoryStorage {
    logs: RwLock<HashMap<String, Vec<Operation>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: PoisonError<T>) -> StorageError {
    StorageError::Other("room log lock poisoned".to_string())
}

impl Storage for MemoryStorage {
    fn save(&self, snapshot: &DocumentSnapshot) -> BoxFuture<'_, StorageResult<()>> {
        let DocumentSnapshot { room, ops } = snapshot.clone();
        Box::pin(async move {
            self.logs.write().map_err(poisoned)?.insert(room, ops);
            Ok(())
        })
    }

    fn load(&self, room: &str) -> BoxFuture<'_, StorageResult<DocumentSnapshot>> {
        let room = room.to_string();
        Box::pin(async move {
            let ops = self.logs.read().map_err(poisoned)?.get(&room).cloned();
            match ops {
                Some(ops) => Ok(DocumentSnapshot::new(room, ops)),
                None => Err(StorageError::NotFound(room)),
            }
        })
    }

    fn list(&self) -> BoxFuture<'_, StorageResult<Vec<String>>> {
        Box::pin(async move { Ok(self.logs.read().map_err(poisoned)?.keys().cloned().collect()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::block_on;
    use crate::storage::fixtures::snapshot;

    #[test]
    fn test_save_then_load() {
        let storage = MemoryStorage::new();
        let saved = snapshot("room-a", "abc");

        block_on(storage.save(&saved)).unwrap();

        assert_eq!(block_on(storage.load("room-a")).unwrap(), saved);
    }

    #[test]
    fn test_missing_room_is_not_found() {
        let storage = MemoryStorage::new();
        let result = block_on(storage.load("nonexistent"));

        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_save_replaces_log() {
        let storage = MemoryStorage::new();

        block_on(storage.save(&snapshot("r", "first"))).unwrap();
        block_on(storage.save(&snapshot("r", "second try"))).unwrap();

        let loaded = block_on(storage.load("r")).unwrap();
        assert_eq!(loaded, snapshot("r", "second try"));
        assert_eq!(block_on(storage.list()).unwrap(), vec!["r".to_string()]);
    }

    #[test]
    fn test_similar_room_ids_stay_apart() {
        let storage = MemoryStorage::new();

        block_on(storage.save(&snapshot("team/notes", "a"))).unwrap();
        block_on(storage.save(&snapshot("team_notes", "bc"))).unwrap();

        let mut list = block_on(storage.list()).unwrap();
        list.sort();
        assert_eq!(list, vec!["team/notes".to_string(), "team_notes".to_string()]);
        assert_eq!(block_on(storage.load("team_notes")).unwrap().room, "team_notes");
    }
}
