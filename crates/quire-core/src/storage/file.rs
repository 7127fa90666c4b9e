//! Room logs kept as JSON files, one per room.

use super::{BoxFuture, DocumentSnapshot, Storage, StorageError, StorageResult};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const PREFIX: &str = "room-";
const EXTENSION: &str = "json";

/// Stores each room's snapshot in `room-<hex id>.json` under a directory.
///
/// Room ids are free-form, so the file name is the hex encoding of the id's
/// bytes. Distinct ids never share a file, and `list` can recover the ids.
pub struct FileStorage {
    base_path: PathBuf,
}

impl FileStorage {
    /// Open (and create if needed) a storage directory.
    pub fn new(base_path: PathBuf) -> StorageResult<Self> {
        fs::create_dir_all(&base_path).map_err(|e| io_error("create", &base_path, e))?;
        Ok(Self { base_path })
    }

    /// Storage under the platform data directory.
    ///
    /// On Unix: `~/.local/share/quire/rooms/`
    /// On Windows: `%LOCALAPPDATA%\quire\rooms\`
    pub fn default_location() -> StorageResult<Self> {
        let base = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| StorageError::Io("Could not determine home directory".to_string()))?;

        Self::new(base.join("quire").join("rooms"))
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn room_path(&self, room: &str) -> PathBuf {
        let name = format!("{PREFIX}{}.{EXTENSION}", encode_room(room));
        self.base_path.join(name)
    }
}

fn io_error(action: &str, path: &Path, e: io::Error) -> StorageError {
    StorageError::Io(format!("Failed to {action} {}: {e}", path.display()))
}

fn encode_room(room: &str) -> String {
    room.bytes().map(|b| format!("{b:02x}")).collect()
}

/// Inverse of `encode_room`; `None` for names this storage did not write.
fn decode_room(stem: &str) -> Option<String> {
    let hex = stem.strip_prefix(PREFIX)?;
    if hex.len() % 2 != 0 {
        return None;
    }
    let bytes = (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}

/// Write through a sibling temp file so a crash never leaves half a log.
fn write_atomic(path: &Path, contents: &str) -> StorageResult<()> {
    let tmp = path.with_extension(format!("{EXTENSION}.tmp"));
    fs::write(&tmp, contents).map_err(|e| io_error("write", &tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| io_error("replace", path, e))
}

impl Storage for FileStorage {
    fn save(&self, snapshot: &DocumentSnapshot) -> BoxFuture<'_, StorageResult<()>> {
        let path = self.room_path(&snapshot.room);
        let json = snapshot
            .to_json()
            .map_err(|e| StorageError::Serialization(e.to_string()));

        Box::pin(async move { write_atomic(&path, &json?) })
    }

    fn load(&self, room: &str) -> BoxFuture<'_, StorageResult<DocumentSnapshot>> {
        let path = self.room_path(room);
        let room = room.to_string();

        Box::pin(async move {
            let json = match fs::read_to_string(&path) {
                Ok(json) => json,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(StorageError::NotFound(room));
                }
                Err(e) => return Err(io_error("read", &path, e)),
            };
            let snapshot = DocumentSnapshot::from_json(&json).map_err(|e| {
                StorageError::Serialization(format!("Failed to parse {}: {e}", path.display()))
            })?;
            snapshot.expect_room(&room)?;
            Ok(snapshot)
        })
    }

    fn list(&self) -> BoxFuture<'_, StorageResult<Vec<String>>> {
        let base = self.base_path.clone();

        Box::pin(async move {
            let entries = fs::read_dir(&base).map_err(|e| io_error("read", &base, e))?;
            Ok(entries
                .flatten()
                .map(|entry| entry.path())
                .filter(|path| path.extension().is_some_and(|ext| ext == EXTENSION))
                .filter_map(|path| decode_room(path.file_stem()?.to_str()?))
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::MergeLimits;
    use crate::document::ClientId;
    use crate::storage::block_on;
    use crate::storage::fixtures::snapshot;
    use tempfile::tempdir;

    fn storage() -> (tempfile::TempDir, FileStorage) {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path().to_path_buf()).unwrap();
        (dir, storage)
    }

    #[test]
    fn test_save_then_load() {
        let (_dir, storage) = storage();
        let saved = snapshot("team-notes", "draft");

        block_on(storage.save(&saved)).unwrap();
        let loaded = block_on(storage.load("team-notes")).unwrap();

        assert_eq!(loaded, saved);
        let replica = loaded
            .to_replica(ClientId(2), MergeLimits::default())
            .unwrap();
        assert_eq!(replica.plain_text(), "draft");
    }

    #[test]
    fn test_missing_room_is_not_found() {
        let (_dir, storage) = storage();

        let result = block_on(storage.load("nonexistent"));
        assert!(matches!(result, Err(StorageError::NotFound(room)) if room == "nonexistent"));
    }

    #[test]
    fn test_similar_room_ids_keep_separate_files() {
        let (dir, storage) = storage();

        block_on(storage.save(&snapshot("team/notes", "slash"))).unwrap();
        block_on(storage.save(&snapshot("team_notes", "underscore"))).unwrap();
        block_on(storage.save(&snapshot("team:notes", "colon"))).unwrap();

        assert_eq!(block_on(storage.load("team/notes")).unwrap().room, "team/notes");
        assert_eq!(block_on(storage.load("team_notes")).unwrap().room, "team_notes");
        assert_eq!(block_on(storage.load("team:notes")).unwrap().room, "team:notes");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 3);
    }

    #[test]
    fn test_load_rejects_log_of_another_room() {
        let (_dir, storage) = storage();
        block_on(storage.save(&snapshot("team/notes", "x"))).unwrap();
        // A file renamed by hand still carries its own room.
        fs::rename(storage.room_path("team/notes"), storage.room_path("team_notes")).unwrap();

        let result = block_on(storage.load("team_notes"));
        assert!(matches!(result, Err(StorageError::RoomMismatch { .. })));
    }

    #[test]
    fn test_list_recovers_room_ids() {
        let (dir, storage) = storage();

        block_on(storage.save(&snapshot("doc1", "a"))).unwrap();
        block_on(storage.save(&snapshot("ünïcode room/2", "b"))).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        fs::write(dir.path().join("room-zz.json"), "{}").unwrap();
        fs::write(dir.path().join("other.json"), "{}").unwrap();

        let mut list = block_on(storage.list()).unwrap();
        list.sort();
        assert_eq!(list, vec!["doc1".to_string(), "ünïcode room/2".to_string()]);
    }

    #[test]
    fn test_save_replaces_previous_log() {
        let (dir, storage) = storage();

        block_on(storage.save(&snapshot("r", "old"))).unwrap();
        block_on(storage.save(&snapshot("r", "newer"))).unwrap();

        let loaded = block_on(storage.load("r")).unwrap();
        assert_eq!(loaded, snapshot("r", "newer"));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_room_names_round_trip() {
        for room in ["", "a", "team/notes", "日本語", "../escape"] {
            let stem = format!("{PREFIX}{}", encode_room(room));
            assert_eq!(decode_room(&stem).as_deref(), Some(room));
        }
        assert_eq!(encode_room("../x"), "2e2e2f78");
        assert_eq!(decode_room("room-abc"), None);
        assert_eq!(decode_room("room-zz"), None);
        assert_eq!(decode_room("6869"), None);
    }

    #[test]
    fn test_creates_directory() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("nested").join("rooms");
        let storage = FileStorage::new(nested.clone()).unwrap();
        assert_eq!(storage.base_path(), nested.as_path());
        assert!(nested.is_dir());
    }
}
