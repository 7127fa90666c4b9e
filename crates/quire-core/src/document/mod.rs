//! Structured document model.
//!
//! The document is a tree held in an arena:
//! ```text
//! Root
//! ├── Block (paragraph | heading | quote | listitem)
//! │   └── Text (one character, with format flags)
//! └── Block (list)
//!     └── Block (text-bearing)
//!         └── Text
//! ```

mod format;
mod id;
mod node;
mod tree;

pub use format::{FormatFlags, FormatRegister, Lww};
pub use id::{ClientId, NodeId, OpId, ROOT_ID, SlotId};
pub use node::{
    Alignment, BlockData, BlockKind, BlockType, HeadingLevel, ListKind, NewNode, Node, NodeData,
    Slot, TextData,
};
pub use tree::{DocumentTree, RenderedBlock, TextRun};
