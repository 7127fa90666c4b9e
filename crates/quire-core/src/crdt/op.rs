//! Replicable operations and the local intents they are built from.

use crate::document::{Alignment, BlockKind, ClientId, FormatFlags, NewNode, NodeId, OpId, SlotId};
use serde::{Deserialize, Serialize};

/// A single immutable mutation, produced by exactly one origin.
///
/// Serialized as
/// `{"origin", "seq", "targetId", "kind", "payload", "deps"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub origin: ClientId,
    pub seq: u64,
    pub target_id: NodeId,
    #[serde(flatten)]
    pub action: OpAction,
    #[serde(default)]
    pub deps: Vec<OpId>,
}

/// What an operation does to its target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum OpAction {
    /// Create a node as a child of the target, right after `after`.
    Insert { after: Option<SlotId>, node: NewNode },
    /// Tombstone the target.
    Delete,
    /// Switch flags on characters of the target block.
    Format {
        chars: Vec<NodeId>,
        #[serde(default)]
        set: FormatFlags,
        #[serde(default)]
        clear: FormatFlags,
    },
    SetBlock { kind: BlockKind },
    SetAlign { align: Alignment },
    /// Give the target a new position.
    Move { parent: NodeId, after: Option<SlotId> },
}

impl OpAction {
    /// Wire name of the action kind.
    pub fn name(&self) -> &'static str {
        match self {
            OpAction::Insert { .. } => "insert",
            OpAction::Delete => "delete",
            OpAction::Format { .. } => "format",
            OpAction::SetBlock { .. } => "set_block",
            OpAction::SetAlign { .. } => "set_align",
            OpAction::Move { .. } => "move",
        }
    }
}

impl Operation {
    pub fn id(&self) -> OpId {
        OpId::new(self.origin, self.seq)
    }

    /// Node ids the payload refers to (target included).
    pub fn node_refs(&self) -> Vec<NodeId> {
        let mut refs = vec![self.target_id];
        match &self.action {
            OpAction::Format { chars, .. } => refs.extend(chars.iter().copied()),
            OpAction::Move { parent, .. } => refs.push(*parent),
            OpAction::Insert { .. }
            | OpAction::Delete
            | OpAction::SetBlock { .. }
            | OpAction::SetAlign { .. } => {}
        }
        refs
    }

    /// Slot the payload anchors on, if any.
    pub fn slot_ref(&self) -> Option<SlotId> {
        match &self.action {
            OpAction::Insert { after, .. } | OpAction::Move { after, .. } => *after,
            OpAction::Delete
            | OpAction::Format { .. }
            | OpAction::SetBlock { .. }
            | OpAction::SetAlign { .. } => None,
        }
    }

    /// Every id this operation needs before it can apply.
    pub fn requirements(&self) -> impl Iterator<Item = OpId> + '_ {
        self.node_refs()
            .into_iter()
            .chain(self.slot_ref())
            .chain(self.deps.iter().copied())
    }
}

/// A local edit, before it is stamped with an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Insert {
        parent: NodeId,
        after: Option<SlotId>,
        node: NewNode,
    },
    Delete {
        node: NodeId,
    },
    Format {
        block: NodeId,
        chars: Vec<NodeId>,
        set: FormatFlags,
        clear: FormatFlags,
    },
    SetBlock {
        block: NodeId,
        kind: BlockKind,
    },
    SetAlign {
        block: NodeId,
        align: Alignment,
    },
    Move {
        node: NodeId,
        parent: NodeId,
        after: Option<SlotId>,
    },
}

impl Intent {
    /// Split into the operation target and action.
    pub(crate) fn into_parts(self) -> (NodeId, OpAction) {
        match self {
            Intent::Insert {
                parent,
                after,
                node,
            } => (parent, OpAction::Insert { after, node }),
            Intent::Delete { node } => (node, OpAction::Delete),
            Intent::Format {
                block,
                chars,
                set,
                clear,
            } => (block, OpAction::Format { chars, set, clear }),
            Intent::SetBlock { block, kind } => (block, OpAction::SetBlock { kind }),
            Intent::SetAlign { block, align } => (block, OpAction::SetAlign { align }),
            Intent::Move {
                node,
                parent,
                after,
            } => (node, OpAction::Move { parent, after }),
        }
    }
}
