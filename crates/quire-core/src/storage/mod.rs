//! Storage abstraction for persisted room logs.

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

use crate::crdt::{CrdtResult, MergeLimits, Operation, Replica};
use crate::document::ClientId;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Document not found: {0}")]
    NotFound(String),
    #[error("Stored log belongs to room {found:?}, not {requested:?}")]
    RoomMismatch { requested: String, found: String },
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Storage error: {0}")]
    Other(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Boxed future for storage operations, usable from async servers.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The persisted form of a document: its room and the full operation log.
///
/// Replaying the log on a fresh replica rebuilds the document, so the
/// snapshot needs no separate tree encoding.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub room: String,
    pub ops: Vec<Operation>,
}

impl DocumentSnapshot {
    pub fn new(room: impl Into<String>, ops: Vec<Operation>) -> Self {
        Self {
            room: room.into(),
            ops,
        }
    }

    pub fn from_replica(room: impl Into<String>, replica: &Replica) -> Self {
        Self::new(room, replica.log().to_vec())
    }

    /// Rebuild a replica owned by `client` from the stored log.
    pub fn to_replica(&self, client: ClientId, limits: MergeLimits) -> CrdtResult<Replica> {
        Replica::from_ops(client, limits, self.ops.iter().cloned())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Fail unless this is the log of `room`.
    pub fn expect_room(&self, room: &str) -> StorageResult<()> {
        if self.room == room {
            Ok(())
        } else {
            Err(StorageError::RoomMismatch {
                requested: room.to_string(),
                found: self.room.clone(),
            })
        }
    }
}

/// Where room logs are kept between sessions. Snapshots are keyed by their
/// `room`, so a save can never land under another room's id.
pub trait Storage: Send + Sync {
    /// Store `snapshot`, replacing any earlier log of the same room.
    fn save(&self, snapshot: &DocumentSnapshot) -> BoxFuture<'_, StorageResult<()>>;

    /// The stored log of `room`, or `NotFound`.
    fn load(&self, room: &str) -> BoxFuture<'_, StorageResult<DocumentSnapshot>>;

    /// Every room with a stored log.
    fn list(&self) -> BoxFuture<'_, StorageResult<Vec<String>>>;
}

/// Minimal executor for driving storage futures in tests.
#[cfg(test)]
pub(crate) fn block_on<F: Future>(f: F) -> F::Output {
    use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

    fn dummy_raw_waker() -> RawWaker {
        fn no_op(_: *const ()) {}
        fn clone(_: *const ()) -> RawWaker {
            dummy_raw_waker()
        }
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, no_op, no_op, no_op);
        RawWaker::new(std::ptr::null(), &VTABLE)
    }

    let waker = unsafe { Waker::from_raw(dummy_raw_waker()) };
    let mut cx = Context::from_waker(&waker);
    let mut f = std::pin::pin!(f);

    loop {
        if let Poll::Ready(result) = f.as_mut().poll(&mut cx) {
            return result;
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::DocumentSnapshot;
    use crate::crdt::{Intent, Replica};
    use crate::document::{Alignment, BlockKind, ClientId, FormatFlags, NewNode, ROOT_ID};

    /// A replica holding one paragraph with `text`.
    pub fn replica_with(text: &str) -> Replica {
        let mut replica = Replica::new(ClientId(7));
        let block = replica
            .apply_local(Intent::Insert {
                parent: ROOT_ID,
                after: None,
                node: NewNode::Block {
                    kind: BlockKind::Paragraph,
                    align: Alignment::Left,
                },
            })
            .unwrap()
            .id();
        let mut after = None;
        for ch in text.chars() {
            after = Some(
                replica
                    .apply_local(Intent::Insert {
                        parent: block,
                        after,
                        node: NewNode::Text {
                            ch,
                            format: FormatFlags::NONE,
                        },
                    })
                    .unwrap()
                    .id(),
            );
        }
        replica
    }

    pub fn snapshot(room: &str, text: &str) -> DocumentSnapshot {
        DocumentSnapshot::from_replica(room, &replica_with(text))
    }
}
