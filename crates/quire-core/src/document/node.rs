//! Node kinds and the arena node record.

use super::format::{FormatFlags, FormatRegister, Lww};
use super::id::{NodeId, OpId, SlotId};
use serde::{Deserialize, Serialize};

/// Heading level (h1..h6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeadingLevel {
    H1,
    H2,
    H3,
    H4,
    H5,
    H6,
}

impl HeadingLevel {
    pub fn from_number(level: u8) -> Option<Self> {
        match level {
            1 => Some(Self::H1),
            2 => Some(Self::H2),
            3 => Some(Self::H3),
            4 => Some(Self::H4),
            5 => Some(Self::H5),
            6 => Some(Self::H6),
            _ => None,
        }
    }

    pub fn number(self) -> u8 {
        match self {
            Self::H1 => 1,
            Self::H2 => 2,
            Self::H3 => 3,
            Self::H4 => 4,
            Self::H5 => 5,
            Self::H6 => 6,
        }
    }
}

/// Kind of list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListKind {
    Bullet,
    Number,
    Check,
}

/// Block alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alignment {
    #[default]
    Left,
    Center,
    Right,
    Justify,
}

/// Stored kind of a block node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockKind {
    Paragraph,
    Heading { level: HeadingLevel },
    Quote,
    List { list: ListKind },
    ListItem,
}

impl BlockKind {
    /// Lists hold blocks; every other block holds text.
    pub fn is_container(self) -> bool {
        matches!(self, BlockKind::List { .. })
    }

    pub fn holds_text(self) -> bool {
        !self.is_container()
    }
}

/// Block type as presented to the user: a list item reports its list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockType {
    #[default]
    Paragraph,
    Heading { level: HeadingLevel },
    Quote,
    List { list: ListKind },
}

impl BlockType {
    /// Toolbar label, matching the block-format dropdown values.
    pub fn label(self) -> &'static str {
        match self {
            BlockType::Paragraph => "paragraph",
            BlockType::Heading { level } => match level {
                HeadingLevel::H1 => "h1",
                HeadingLevel::H2 => "h2",
                HeadingLevel::H3 => "h3",
                HeadingLevel::H4 => "h4",
                HeadingLevel::H5 => "h5",
                HeadingLevel::H6 => "h6",
            },
            BlockType::Quote => "quote",
            BlockType::List { list } => match list {
                ListKind::Bullet => "bullet",
                ListKind::Number => "number",
                ListKind::Check => "check",
            },
        }
    }
}

/// Payload describing a node to be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NewNode {
    Block {
        kind: BlockKind,
        #[serde(default)]
        align: Alignment,
    },
    Text {
        ch: char,
        #[serde(default)]
        format: FormatFlags,
    },
}

/// Replicated state of a block.
#[derive(Debug, Clone)]
pub struct BlockData {
    pub(crate) kind: Lww<BlockKind>,
    pub(crate) align: Lww<Alignment>,
}

impl BlockData {
    pub fn kind(&self) -> BlockKind {
        self.kind.get()
    }

    pub fn align(&self) -> Alignment {
        self.align.get()
    }
}

/// Replicated state of a character.
#[derive(Debug, Clone)]
pub struct TextData {
    pub(crate) ch: char,
    pub(crate) format: FormatRegister,
}

impl TextData {
    pub fn ch(&self) -> char {
        self.ch
    }

    pub fn format(&self) -> FormatFlags {
        self.format.flags()
    }
}

/// Node payload, matched exhaustively at merge and render sites.
#[derive(Debug, Clone)]
pub enum NodeData {
    Root,
    Block(BlockData),
    Text(TextData),
}

impl NodeData {
    pub(crate) fn from_new(node: NewNode, stamp: OpId) -> Self {
        match node {
            NewNode::Block { kind, align } => NodeData::Block(BlockData {
                kind: Lww::new(kind, stamp),
                align: Lww::new(align, stamp),
            }),
            NewNode::Text { ch, format } => NodeData::Text(TextData {
                ch,
                format: FormatRegister::new(format, stamp),
            }),
        }
    }
}

/// A position in a parent's child sequence.
///
/// Slots are never reordered once integrated; a move adds a new slot and the
/// node's old slot stays behind as an invisible anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub id: SlotId,
    pub node: NodeId,
    pub after: Option<SlotId>,
}

/// Arena record of a node.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) data: NodeData,
    /// Live parent, derived from the live slot.
    pub(crate) parent: Option<NodeId>,
    /// Live slot: the node's slot with the greatest id.
    pub(crate) slot: Option<SlotId>,
    /// Child sequence, including tombstones and superseded slots.
    pub(crate) children: Vec<Slot>,
    /// First delete applied to this node.
    pub(crate) deleted: Option<OpId>,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn data(&self) -> &NodeData {
        &self.data
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.is_some()
    }

    pub fn as_block(&self) -> Option<&BlockData> {
        match &self.data {
            NodeData::Block(block) => Some(block),
            NodeData::Root | NodeData::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&TextData> {
        match &self.data {
            NodeData::Text(text) => Some(text),
            NodeData::Root | NodeData::Block(_) => None,
        }
    }

    /// Whether this node may hold children of the given payload.
    pub fn accepts(&self, child: &NodeData) -> bool {
        match (&self.data, child) {
            (NodeData::Root, NodeData::Block(_)) => true,
            (NodeData::Block(parent), NodeData::Block(block)) => {
                parent.kind().is_container() && block.kind().holds_text()
            }
            (NodeData::Block(parent), NodeData::Text(_)) => parent.kind().holds_text(),
            (_, NodeData::Root) | (NodeData::Root, NodeData::Text(_)) | (NodeData::Text(_), _) => {
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_kind_serialization() {
        let kind = BlockKind::Heading { level: HeadingLevel::H2 };
        let json = serde_json::to_string(&kind).unwrap();
        assert_eq!(json, r#"{"type":"heading","level":"h2"}"#);
        let back: BlockKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, kind);
    }

    #[test]
    fn test_block_type_labels() {
        assert_eq!(BlockType::Heading { level: HeadingLevel::H3 }.label(), "h3");
        assert_eq!(BlockType::List { list: ListKind::Check }.label(), "check");
        assert_eq!(BlockType::default().label(), "paragraph");
    }

    #[test]
    fn test_heading_levels() {
        assert_eq!(HeadingLevel::from_number(4), Some(HeadingLevel::H4));
        assert_eq!(HeadingLevel::from_number(7), None);
        assert_eq!(HeadingLevel::H6.number(), 6);
    }
}
