//! Selections expressed against node ids, and their resolution to positions.

use crate::document::{DocumentTree, NodeId, ROOT_ID};
use serde::{Deserialize, Serialize};

/// A caret: inside `block`, right after the character `after`
/// (`None` = start of the block).
///
/// Carets name characters rather than offsets, so concurrent edits
/// elsewhere in the block do not shift them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Caret {
    pub block: NodeId,
    pub after: Option<NodeId>,
}

impl Caret {
    pub fn start_of(block: NodeId) -> Self {
        Self { block, after: None }
    }

    /// Start of the document, valid even when it has no blocks yet.
    pub fn document_start() -> Self {
        Self::start_of(ROOT_ID)
    }
}

/// A range between two carets. `anchor` is where the selection started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selection {
    pub anchor: Caret,
    pub focus: Caret,
}

impl Selection {
    pub fn collapsed(caret: Caret) -> Self {
        Self {
            anchor: caret,
            focus: caret,
        }
    }

    pub fn is_collapsed(&self) -> bool {
        self.anchor == self.focus
    }
}

/// A caret resolved against the current document: block index in document
/// order and character offset within the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Position {
    pub block: usize,
    pub offset: usize,
}

/// Resolve a caret, or `None` if what it names is gone.
pub fn resolve(tree: &DocumentTree, blocks: &[NodeId], caret: Caret) -> Option<Position> {
    if caret == Caret::document_start() {
        return Some(Position::default());
    }
    let block = blocks.iter().position(|id| *id == caret.block)?;
    let offset = tree.offset_of(caret.block, caret.after)?;
    Some(Position { block, offset })
}

/// The caret at a position, clamped into the document.
pub fn caret_at(tree: &DocumentTree, blocks: &[NodeId], position: Position) -> Caret {
    let Some(last) = blocks.len().checked_sub(1) else {
        return Caret::document_start();
    };
    let index = position.block.min(last);
    let block = blocks[index];
    let len = tree.chars(block).len();
    let offset = if index < position.block {
        len
    } else {
        position.offset.min(len)
    };
    Caret {
        block,
        after: tree.anchor_at(block, offset),
    }
}

/// Characters between two ordered positions, per block.
pub fn chars_between(
    tree: &DocumentTree,
    blocks: &[NodeId],
    start: Position,
    end: Position,
) -> Vec<(NodeId, Vec<NodeId>)> {
    (start.block..=end.block)
        .filter_map(|index| {
            let block = *blocks.get(index)?;
            let chars = tree.chars(block);
            let from = if index == start.block { start.offset } else { 0 };
            let to = if index == end.block {
                end.offset.min(chars.len())
            } else {
                chars.len()
            };
            Some((block, chars.get(from..to).map(<[_]>::to_vec).unwrap_or_default()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::{Intent, Replica};
    use crate::document::{Alignment, BlockKind, ClientId, FormatFlags, NewNode, ROOT_ID};

    fn doc(lines: &[&str]) -> Replica {
        let mut replica = Replica::new(ClientId(1));
        let mut after = None;
        for line in lines {
            let block = replica
                .apply_local(Intent::Insert {
                    parent: ROOT_ID,
                    after,
                    node: NewNode::Block {
                        kind: BlockKind::Paragraph,
                        align: Alignment::Left,
                    },
                })
                .unwrap()
                .id();
            after = Some(block);
            let mut anchor = None;
            for ch in line.chars() {
                anchor = Some(
                    replica
                        .apply_local(Intent::Insert {
                            parent: block,
                            after: anchor,
                            node: NewNode::Text {
                                ch,
                                format: FormatFlags::NONE,
                            },
                        })
                        .unwrap()
                        .id(),
                );
            }
        }
        replica
    }

    #[test]
    fn test_resolve_and_back() {
        let replica = doc(&["abc", "de"]);
        let tree = replica.tree();
        let blocks = tree.blocks();
        let position = Position { block: 1, offset: 1 };
        let caret = caret_at(tree, &blocks, position);
        assert_eq!(resolve(tree, &blocks, caret), Some(position));
    }

    #[test]
    fn test_caret_at_clamps() {
        let replica = doc(&["abc"]);
        let tree = replica.tree();
        let blocks = tree.blocks();
        let caret = caret_at(tree, &blocks, Position { block: 4, offset: 0 });
        assert_eq!(resolve(tree, &blocks, caret), Some(Position { block: 0, offset: 3 }));
        assert_eq!(
            caret_at(tree, &[], Position::default()),
            Caret::document_start()
        );
    }

    #[test]
    fn test_chars_between_spans_blocks() {
        let replica = doc(&["abc", "de", "fgh"]);
        let tree = replica.tree();
        let blocks = tree.blocks();
        let spans = chars_between(
            tree,
            &blocks,
            Position { block: 0, offset: 2 },
            Position { block: 2, offset: 1 },
        );
        let counts: Vec<usize> = spans.iter().map(|(_, chars)| chars.len()).collect();
        assert_eq!(counts, vec![1, 2, 1]);
    }
}
