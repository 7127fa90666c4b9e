//! Quire Core Library
//!
//! Collaborative rich-text editing: the replicated document model, the
//! toolbar and command layer on top of it, and the sessions that exchange
//! operations and presence between participants.

pub mod config;
pub mod crdt;
pub mod document;
pub mod editor;
pub mod presence;
pub mod storage;
pub mod sync;

pub use config::{CollabConfig, ConfigError};
pub use crdt::{
    ApplyOutcome, CrdtError, Intent, MergeLimits, OpAction, Operation, Replica, VersionVector,
};
pub use document::{
    Alignment, BlockKind, BlockType, ClientId, DocumentTree, FormatFlags, HeadingLevel, ListKind,
    NodeId, OpId, RenderedBlock, TextRun,
};
pub use editor::{Caret, Command, Editor, Position, Selection, TextCase, ToolbarState};
pub use presence::{PresenceRecord, PresenceTable};
pub use storage::{DocumentSnapshot, FileStorage, MemoryStorage, Storage, StorageError};
pub use sync::{
    BroadcastHub, ConnectionState, RelayEvent, RelayRequest, RelayTransport, Session,
    SessionEvent, Transport, TransportError, WireMessage,
};
