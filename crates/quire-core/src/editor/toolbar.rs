//! Toolbar state derived from the document and the selection.

use super::selection::{Position, chars_between};
use crate::document::{Alignment, BlockType, DocumentTree, FormatFlags, NodeId};
use serde::{Deserialize, Serialize};

/// What the toolbar shows as active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ToolbarState {
    /// Flags active on the whole selection (or pending for typing).
    pub flags: FormatFlags,
    /// Type of the block holding the anchor.
    pub block_type: Option<BlockType>,
    pub alignment: Option<Alignment>,
    /// Whether the undo and redo buttons are enabled.
    pub can_undo: bool,
    pub can_redo: bool,
}

impl ToolbarState {
    pub fn is_active(&self, flag: FormatFlags) -> bool {
        self.flags.contains(flag)
    }

    pub fn is_bold(&self) -> bool {
        self.is_active(FormatFlags::BOLD)
    }

    pub fn is_italic(&self) -> bool {
        self.is_active(FormatFlags::ITALIC)
    }

    pub fn is_underline(&self) -> bool {
        self.is_active(FormatFlags::UNDERLINE)
    }

    pub fn is_strikethrough(&self) -> bool {
        self.is_active(FormatFlags::STRIKETHROUGH)
    }

    /// Dropdown label for the block type.
    pub fn block_label(&self) -> &'static str {
        self.block_type.unwrap_or_default().label()
    }
}

/// Format flags in effect at a collapsed caret: the character before it.
pub(crate) fn caret_format(tree: &DocumentTree, blocks: &[NodeId], at: Position) -> FormatFlags {
    blocks
        .get(at.block)
        .and_then(|block| tree.anchor_at(*block, at.offset))
        .and_then(|ch| tree.char_format(ch))
        .unwrap_or_default()
}

/// Flags shared by every selected character, or `None` when no characters
/// are selected.
pub(crate) fn common_format(
    tree: &DocumentTree,
    blocks: &[NodeId],
    start: Position,
    end: Position,
) -> Option<FormatFlags> {
    chars_between(tree, blocks, start, end)
        .into_iter()
        .flat_map(|(_, chars)| chars)
        .filter_map(|ch| tree.char_format(ch))
        .reduce(|common, flags| common & flags)
}

pub(crate) fn compute(
    tree: &DocumentTree,
    blocks: &[NodeId],
    anchor: Position,
    focus: Position,
    typing: Option<FormatFlags>,
) -> ToolbarState {
    let (start, end) = if anchor <= focus {
        (anchor, focus)
    } else {
        (focus, anchor)
    };
    let flags = if start == end {
        typing.unwrap_or_else(|| caret_format(tree, blocks, start))
    } else {
        common_format(tree, blocks, start, end)
            .or(typing)
            .unwrap_or_else(|| caret_format(tree, blocks, start))
    };
    let block = blocks.get(anchor.block).copied();
    ToolbarState {
        flags,
        block_type: block.and_then(|id| tree.block_type(id)),
        alignment: block.and_then(|id| tree.alignment(id)),
        can_undo: false,
        can_redo: false,
    }
}
