//! Local undo and redo.
//!
//! Every intent a command applies is paired with the steps that take the
//! document back, computed from the tree just before the intent lands.
//! Undoing replays an entry's steps in reverse as fresh operations, so the
//! peers simply see more edits. Deleted nodes cannot be revived in place;
//! they are recreated under new ids and later steps are redirected to the
//! copies.

use super::Transaction;
use crate::crdt::Intent;
use crate::document::{DocumentTree, FormatFlags, NewNode, NodeData, NodeId, SlotId};
use std::collections::{BTreeMap, HashMap};

/// Entries kept per direction; the oldest are dropped first.
const MAX_ENTRIES: usize = 256;

/// One step back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Step {
    /// Apply an intent that needs no positioning.
    Apply(Intent),
    /// Put a block back after a sibling (or first in `parent`).
    Place {
        node: NodeId,
        parent: NodeId,
        after: Option<NodeId>,
    },
    /// Recreate a deleted node with its visible content.
    Recreate(Recreate),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Recreate {
    node: NodeId,
    parent: NodeId,
    after: Option<NodeId>,
    data: NewNode,
    children: Vec<Recreate>,
}

/// Undo and redo stacks of one editor.
#[derive(Debug, Clone, Default)]
pub(crate) struct History {
    undo: Vec<Vec<Step>>,
    redo: Vec<Vec<Step>>,
    /// Deleted node to the copy that replaced it.
    recreated: HashMap<NodeId, NodeId>,
}

impl History {
    pub(crate) fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub(crate) fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    /// Record the steps undoing a new edit. A new edit ends the redo chain.
    pub(crate) fn record(&mut self, steps: Vec<Step>) {
        if steps.is_empty() {
            return;
        }
        self.redo.clear();
        push_bounded(&mut self.undo, steps);
    }

    pub(crate) fn take_undo(&mut self) -> Option<Vec<Step>> {
        self.undo.pop()
    }

    pub(crate) fn take_redo(&mut self) -> Option<Vec<Step>> {
        self.redo.pop()
    }

    /// Record what reverses an undo.
    pub(crate) fn undone(&mut self, steps: Vec<Step>) {
        if !steps.is_empty() {
            push_bounded(&mut self.redo, steps);
        }
    }

    /// Record what reverses a redo.
    pub(crate) fn redone(&mut self, steps: Vec<Step>) {
        if !steps.is_empty() {
            push_bounded(&mut self.undo, steps);
        }
    }

    /// Apply an entry's steps, last first.
    pub(crate) fn replay(&mut self, tx: &mut Transaction<'_>, steps: Vec<Step>) {
        for step in steps.into_iter().rev() {
            let applied = match step {
                Step::Apply(intent) => tx.apply(self.redirect(intent)).is_some(),
                Step::Place {
                    node,
                    parent,
                    after,
                } => {
                    let parent = self.current(parent);
                    let after = self.anchor(tx.tree(), parent, after);
                    let node = self.current(node);
                    tx.apply(Intent::Move {
                        node,
                        parent,
                        after,
                    })
                    .is_some()
                }
                Step::Recreate(recreate) => {
                    let parent = self.current(recreate.parent);
                    let after = self.anchor(tx.tree(), parent, recreate.after);
                    self.recreate(tx, recreate, parent, after).is_some()
                }
            };
            if !applied {
                break;
            }
        }
    }

    /// Follow recreations to the node that stands for `id` now.
    fn current(&self, mut id: NodeId) -> NodeId {
        while let Some(next) = self.recreated.get(&id) {
            id = *next;
        }
        id
    }

    /// Live slot of `after` if it still sits in `parent`; otherwise the
    /// node goes first.
    fn anchor(&self, tree: &DocumentTree, parent: NodeId, after: Option<NodeId>) -> Option<SlotId> {
        let after = self.current(after?);
        let node = tree.get(after)?;
        if node.parent() == Some(parent) {
            tree.live_slot(after)
        } else {
            None
        }
    }

    fn recreate(
        &mut self,
        tx: &mut Transaction<'_>,
        recreate: Recreate,
        parent: NodeId,
        after: Option<SlotId>,
    ) -> Option<NodeId> {
        let copy = tx.apply(Intent::Insert {
            parent,
            after,
            node: recreate.data,
        })?;
        self.recreated.insert(recreate.node, copy);
        let mut previous = None;
        for child in recreate.children {
            // A fresh node's slot id is its node id.
            previous = Some(self.recreate(tx, child, copy, previous)?);
        }
        Some(copy)
    }

    fn redirect(&self, intent: Intent) -> Intent {
        match intent {
            Intent::Delete { node } => Intent::Delete {
                node: self.current(node),
            },
            Intent::Format {
                block,
                chars,
                set,
                clear,
            } => Intent::Format {
                block: self.current(block),
                chars: chars.into_iter().map(|ch| self.current(ch)).collect(),
                set,
                clear,
            },
            Intent::SetBlock { block, kind } => Intent::SetBlock {
                block: self.current(block),
                kind,
            },
            Intent::SetAlign { block, align } => Intent::SetAlign {
                block: self.current(block),
                align,
            },
            other => other,
        }
    }
}

fn push_bounded(stack: &mut Vec<Vec<Step>>, steps: Vec<Step>) {
    if stack.len() >= MAX_ENTRIES {
        stack.remove(0);
    }
    stack.push(steps);
}

/// Steps reversing `intent`, read from the tree before it applies.
/// Inserts are reversed by deleting the new node once its id is known.
pub(crate) fn invert(tree: &DocumentTree, intent: &Intent) -> Vec<Step> {
    match intent {
        Intent::Insert { .. } => Vec::new(),
        Intent::Delete { node } => {
            if !tree.is_visible(*node) {
                return Vec::new();
            }
            capture(tree, *node).map(Step::Recreate).into_iter().collect()
        }
        Intent::Format {
            block,
            chars,
            set,
            clear,
        } => {
            let mask = *set | *clear;
            let mut groups: BTreeMap<u16, Vec<NodeId>> = BTreeMap::new();
            for ch in chars {
                let before = tree.char_format(*ch).unwrap_or_default() & mask;
                groups.entry(before.bits()).or_default().push(*ch);
            }
            groups
                .into_iter()
                .map(|(bits, chars)| {
                    let before = FormatFlags::from_bits_truncate(bits);
                    Step::Apply(Intent::Format {
                        block: *block,
                        chars,
                        set: before,
                        clear: mask & !before,
                    })
                })
                .collect()
        }
        Intent::SetBlock { block, .. } => tree
            .block_kind(*block)
            .map(|kind| Step::Apply(Intent::SetBlock { block: *block, kind }))
            .into_iter()
            .collect(),
        Intent::SetAlign { block, .. } => tree
            .alignment(*block)
            .map(|align| Step::Apply(Intent::SetAlign { block: *block, align }))
            .into_iter()
            .collect(),
        Intent::Move { node, .. } => {
            let Some(parent) = tree.get(*node).and_then(|n| n.parent()) else {
                return Vec::new();
            };
            vec![Step::Place {
                node: *node,
                parent,
                after: visible_before(tree, parent, *node),
            }]
        }
    }
}

/// Snapshot of a visible node and its visible subtree.
fn capture(tree: &DocumentTree, id: NodeId) -> Option<Recreate> {
    let node = tree.get(id)?;
    let parent = node.parent()?;
    let data = match node.data() {
        NodeData::Root => return None,
        NodeData::Block(block) => NewNode::Block {
            kind: block.kind(),
            align: block.align(),
        },
        NodeData::Text(text) => NewNode::Text {
            ch: text.ch(),
            format: text.format(),
        },
    };
    Some(Recreate {
        node: id,
        parent,
        after: visible_before(tree, parent, id),
        data,
        children: tree
            .children(id)
            .into_iter()
            .filter_map(|child| capture(tree, child))
            .collect(),
    })
}

fn visible_before(tree: &DocumentTree, parent: NodeId, node: NodeId) -> Option<NodeId> {
    let siblings = tree.children(parent);
    let index = siblings.iter().position(|id| *id == node)?;
    index.checked_sub(1).map(|i| siblings[i])
}
