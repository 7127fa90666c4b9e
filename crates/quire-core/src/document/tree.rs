//! Arena-backed document tree.
//!
//! Nodes live in a map keyed by id; parent/child links are ids, never
//! pointers. Child sequences are RGA sequences of [`Slot`]s: a new slot is
//! placed right after its anchor, skipping every slot with a greater id.
//! Because ids carry a Lamport counter this order is the same on every
//! replica regardless of the order operations arrived in.

use super::format::FormatFlags;
use super::id::{NodeId, OpId, ROOT_ID, SlotId};
use super::node::{Alignment, BlockKind, BlockType, Node, NodeData, Slot};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Where a slot lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlotInfo {
    pub parent: NodeId,
    pub node: NodeId,
}

/// A run of adjacent characters sharing one format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRun {
    pub text: String,
    pub format: FormatFlags,
}

/// A visible text block as rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedBlock {
    pub block_type: BlockType,
    pub align: Alignment,
    pub runs: Vec<TextRun>,
}

impl RenderedBlock {
    pub fn text(&self) -> String {
        self.runs.iter().map(|run| run.text.as_str()).collect()
    }
}

/// The document tree of one replica.
#[derive(Debug, Clone)]
pub struct DocumentTree {
    nodes: HashMap<NodeId, Node>,
    slots: HashMap<SlotId, SlotInfo>,
}

impl Default for DocumentTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentTree {
    /// Create a tree holding only the root.
    pub fn new() -> Self {
        let root = Node {
            id: ROOT_ID,
            data: NodeData::Root,
            parent: None,
            slot: None,
            children: Vec::new(),
            deleted: None,
        };
        let mut nodes = HashMap::new();
        nodes.insert(ROOT_ID, root);
        Self {
            nodes,
            slots: HashMap::new(),
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn contains_slot(&self, id: SlotId) -> bool {
        self.slots.contains_key(&id)
    }

    pub(crate) fn slot_info(&self, id: SlotId) -> Option<SlotInfo> {
        self.slots.get(&id).copied()
    }

    /// Number of nodes held in the arena, tombstones included.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of tombstoned nodes still held in the arena.
    pub fn tombstone_count(&self) -> usize {
        self.nodes.values().filter(|node| node.is_deleted()).count()
    }

    /// A node is visible if neither it nor any ancestor is deleted.
    pub fn is_visible(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node_id) = current {
            match self.nodes.get(&node_id) {
                Some(node) if !node.is_deleted() => current = node.parent,
                _ => return false,
            }
        }
        true
    }

    /// Whether `slot` is the live slot of a non-deleted node.
    fn slot_is_live(&self, slot: &Slot) -> bool {
        self.nodes
            .get(&slot.node)
            .is_some_and(|node| node.slot == Some(slot.id) && !node.is_deleted())
    }

    /// Visible children of `parent`, in sequence order.
    pub fn children(&self, parent: NodeId) -> Vec<NodeId> {
        self.nodes
            .get(&parent)
            .map(|node| {
                node.children
                    .iter()
                    .filter(|slot| self.slot_is_live(slot))
                    .map(|slot| slot.node)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Text-bearing blocks in document order, with list items flattened in.
    pub fn blocks(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        for child in self.children(ROOT_ID) {
            match self.block_kind(child) {
                Some(kind) if kind.is_container() => out.extend(self.children(child)),
                Some(_) => out.push(child),
                None => {}
            }
        }
        out
    }

    pub fn block_kind(&self, id: NodeId) -> Option<BlockKind> {
        self.nodes.get(&id)?.as_block().map(|block| block.kind())
    }

    pub fn alignment(&self, id: NodeId) -> Option<Alignment> {
        self.nodes.get(&id)?.as_block().map(|block| block.align())
    }

    /// The list containing `block`, if its live parent is a list.
    pub fn containing_list(&self, block: NodeId) -> Option<NodeId> {
        let parent = self.nodes.get(&block)?.parent?;
        self.block_kind(parent)
            .filter(|kind| kind.is_container())
            .map(|_| parent)
    }

    /// Block type as shown to the user, normalised by position: children of a
    /// list are items of that list, a stray list item at the root is a paragraph.
    pub fn block_type(&self, block: NodeId) -> Option<BlockType> {
        if let Some(list) = self.containing_list(block) {
            if let Some(BlockKind::List { list }) = self.block_kind(list) {
                return Some(BlockType::List { list });
            }
        }
        Some(match self.block_kind(block)? {
            BlockKind::Paragraph | BlockKind::ListItem => BlockType::Paragraph,
            BlockKind::Heading { level } => BlockType::Heading { level },
            BlockKind::Quote => BlockType::Quote,
            BlockKind::List { list } => BlockType::List { list },
        })
    }

    /// Visible characters of a text block.
    pub fn chars(&self, block: NodeId) -> Vec<NodeId> {
        self.children(block)
    }

    pub fn char_format(&self, ch: NodeId) -> Option<FormatFlags> {
        self.nodes.get(&ch)?.as_text().map(|text| text.format())
    }

    /// Visible text of a block.
    pub fn block_text(&self, block: NodeId) -> String {
        self.chars(block)
            .into_iter()
            .filter_map(|id| self.nodes.get(&id)?.as_text().map(|text| text.ch()))
            .collect()
    }

    /// Number of visible characters before and including `after` in `block`.
    ///
    /// `after` may be a tombstone; the offset is then the number of visible
    /// characters preceding it. Returns `None` if `after` is not in the block.
    pub fn offset_of(&self, block: NodeId, after: Option<NodeId>) -> Option<usize> {
        let Some(after) = after else {
            return Some(0);
        };
        let node = self.nodes.get(&block)?;
        let mut count = 0;
        for slot in &node.children {
            let live = self.slot_is_live(slot);
            if live {
                count += 1;
            }
            if slot.id == after {
                return Some(count);
            }
        }
        None
    }

    /// The visible character ending at `offset` (the anchor for an insert there).
    pub fn anchor_at(&self, block: NodeId, offset: usize) -> Option<NodeId> {
        if offset == 0 {
            return None;
        }
        self.chars(block).get(offset - 1).copied()
    }

    /// Live slot of a node.
    pub fn live_slot(&self, id: NodeId) -> Option<SlotId> {
        self.nodes.get(&id)?.slot
    }

    /// Render visible content deterministically.
    pub fn render(&self) -> Vec<RenderedBlock> {
        self.blocks()
            .into_iter()
            .map(|block| RenderedBlock {
                block_type: self.block_type(block).unwrap_or_default(),
                align: self.alignment(block).unwrap_or_default(),
                runs: self.runs(block),
            })
            .collect()
    }

    /// Coalesce a block's characters into format runs.
    pub fn runs(&self, block: NodeId) -> Vec<TextRun> {
        let mut runs: Vec<TextRun> = Vec::new();
        for id in self.chars(block) {
            let Some(text) = self.nodes.get(&id).and_then(Node::as_text) else {
                continue;
            };
            match runs.last_mut() {
                Some(run) if run.format == text.format() => run.text.push(text.ch()),
                _ => runs.push(TextRun {
                    text: text.ch().to_string(),
                    format: text.format(),
                }),
            }
        }
        runs
    }

    /// Visible text, one line per block.
    pub fn plain_text(&self) -> String {
        self.blocks()
            .into_iter()
            .map(|block| self.block_text(block))
            .collect::<Vec<_>>()
            .join("\n")
    }

    // --- Mutation (driven by the replica after validation) ---

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    /// Create a node and its first slot. The slot id is the node id.
    pub(crate) fn insert(
        &mut self,
        id: NodeId,
        parent: NodeId,
        after: Option<SlotId>,
        data: NodeData,
    ) {
        self.nodes.insert(
            id,
            Node {
                id,
                data,
                parent: Some(parent),
                slot: Some(id),
                children: Vec::new(),
                deleted: None,
            },
        );
        self.integrate(parent, Slot { id, node: id, after });
    }

    /// Give a node a new slot; it becomes live if it is the newest.
    pub(crate) fn relocate(
        &mut self,
        node: NodeId,
        slot: SlotId,
        parent: NodeId,
        after: Option<SlotId>,
    ) {
        self.integrate(parent, Slot { id: slot, node, after });
        if let Some(record) = self.nodes.get_mut(&node) {
            if record.slot.is_none_or(|live| slot > live) {
                record.slot = Some(slot);
                record.parent = Some(parent);
            }
        }
    }

    /// Tombstone a node. Returns false if it already was.
    pub(crate) fn mark_deleted(&mut self, id: NodeId, op: OpId) -> bool {
        match self.nodes.get_mut(&id) {
            Some(node) if node.deleted.is_none() => {
                node.deleted = Some(op);
                true
            }
            _ => false,
        }
    }

    fn integrate(&mut self, parent: NodeId, slot: Slot) {
        self.slots.insert(
            slot.id,
            SlotInfo {
                parent,
                node: slot.node,
            },
        );
        let Some(parent_node) = self.nodes.get_mut(&parent) else {
            return;
        };
        let children = &mut parent_node.children;
        let mut index = match slot.after {
            None => 0,
            Some(anchor) => children
                .iter()
                .position(|existing| existing.id == anchor)
                .map_or(children.len(), |pos| pos + 1),
        };
        while index < children.len() && children[index].id > slot.id {
            index += 1;
        }
        children.insert(index, slot);
    }

    // --- Garbage collection ---

    /// Remove causally stable tombstones and superseded slots.
    ///
    /// `is_stable` reports whether an operation is known to every peer;
    /// ids in `pinned` are still referenced by buffered operations and are
    /// kept. Returns the number of nodes removed.
    pub(crate) fn collect(
        &mut self,
        is_stable: impl Fn(OpId) -> bool,
        pinned: &HashSet<OpId>,
    ) -> usize {
        let mut doomed: HashSet<NodeId> = HashSet::new();
        let tombstones: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|node| node.deleted.is_some_and(&is_stable))
            .map(|node| node.id)
            .collect();

        for id in tombstones {
            let subtree = self.live_subtree(id);
            let slots = self.slots_of(&subtree);
            if subtree.iter().chain(slots.iter()).any(|id| pinned.contains(id)) {
                continue;
            }
            doomed.extend(subtree);
        }

        // Candidate slots: those placing doomed nodes, those superseded by a
        // stable move, and those whose node is already gone.
        let mut candidates: HashSet<SlotId> = self
            .slots
            .iter()
            .filter(|(slot_id, info)| {
                if pinned.contains(*slot_id) {
                    return false;
                }
                if doomed.contains(&info.node) {
                    return true;
                }
                match self.nodes.get(&info.node) {
                    Some(node) => node
                        .slot
                        .is_some_and(|live| live != **slot_id && is_stable(live)),
                    None => true,
                }
            })
            .map(|(slot_id, _)| *slot_id)
            .collect();

        // A slot other slots anchor on stays until they go too, otherwise a
        // later insert would integrate differently than on a replica that
        // still holds it.
        loop {
            let blocked: Vec<SlotId> = candidates
                .iter()
                .copied()
                .filter(|slot| self.is_anchor_for_survivor(*slot, &candidates, &doomed))
                .collect();
            if blocked.is_empty() {
                break;
            }
            for slot in blocked {
                candidates.remove(&slot);
            }
        }

        for slot in candidates {
            self.remove_slot(slot);
        }
        for id in &doomed {
            if let Some(node) = self.nodes.remove(id) {
                // Slots held by the removed node's sequence go with it.
                for slot in node.children {
                    self.slots.remove(&slot.id);
                }
            }
        }
        doomed.len()
    }

    /// Node plus every descendant reached through live slots.
    fn live_subtree(&self, root: NodeId) -> HashSet<NodeId> {
        let mut out = HashSet::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if !out.insert(id) {
                continue;
            }
            if let Some(node) = self.nodes.get(&id) {
                stack.extend(
                    node.children
                        .iter()
                        .filter(|slot| {
                            self.nodes
                                .get(&slot.node)
                                .is_some_and(|child| child.slot == Some(slot.id))
                        })
                        .map(|slot| slot.node),
                );
            }
        }
        out
    }

    fn is_anchor_for_survivor(
        &self,
        slot: SlotId,
        candidates: &HashSet<SlotId>,
        doomed: &HashSet<NodeId>,
    ) -> bool {
        let Some(info) = self.slots.get(&slot) else {
            return false;
        };
        if doomed.contains(&info.parent) {
            return false;
        }
        self.nodes.get(&info.parent).is_some_and(|parent| {
            parent
                .children
                .iter()
                .any(|child| child.after == Some(slot) && !candidates.contains(&child.id))
        })
    }

    /// Every slot (live or superseded) that places one of `nodes`.
    fn slots_of(&self, nodes: &HashSet<NodeId>) -> Vec<SlotId> {
        self.slots
            .iter()
            .filter(|(_, info)| nodes.contains(&info.node))
            .map(|(slot, _)| *slot)
            .collect()
    }

    fn remove_slot(&mut self, slot: SlotId) {
        if let Some(info) = self.slots.remove(&slot) {
            if let Some(parent) = self.nodes.get_mut(&info.parent) {
                parent.children.retain(|existing| existing.id != slot);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::id::ClientId;
    use crate::document::node::{ListKind, NewNode};

    fn id(client: u64, seq: u64) -> NodeId {
        OpId::new(ClientId(client), seq)
    }

    fn paragraph() -> NodeData {
        NodeData::from_new(
            NewNode::Block {
                kind: BlockKind::Paragraph,
                align: Alignment::Left,
            },
            id(0, 0),
        )
    }

    fn text(ch: char) -> NodeData {
        NodeData::from_new(
            NewNode::Text {
                ch,
                format: FormatFlags::NONE,
            },
            id(0, 0),
        )
    }

    #[test]
    fn test_new_tree_has_only_root() {
        let tree = DocumentTree::new();
        assert_eq!(tree.node_count(), 1);
        assert!(tree.blocks().is_empty());
        assert_eq!(tree.plain_text(), "");
    }

    #[test]
    fn test_concurrent_inserts_order_by_id() {
        let block = id(1, 1);
        let mut a = DocumentTree::new();
        a.insert(block, ROOT_ID, None, paragraph());
        let mut b = a.clone();

        // Both replicas insert at the start of the block.
        let x = id(1, 2);
        let y = id(2, 2);
        a.insert(x, block, None, text('x'));
        a.insert(y, block, None, text('y'));
        b.insert(y, block, None, text('y'));
        b.insert(x, block, None, text('x'));

        assert_eq!(a.block_text(block), "yx");
        assert_eq!(a.block_text(block), b.block_text(block));
    }

    #[test]
    fn test_insert_skips_newer_siblings() {
        let block = id(1, 1);
        let mut tree = DocumentTree::new();
        tree.insert(block, ROOT_ID, None, paragraph());
        tree.insert(id(1, 2), block, None, text('a'));
        tree.insert(id(1, 3), block, Some(id(1, 2)), text('c'));
        // Concurrent with 'c' (same seq, lower origin): lands after it.
        tree.insert(id(0, 3), block, Some(id(1, 2)), text('b'));
        assert_eq!(tree.block_text(block), "acb");
    }

    #[test]
    fn test_offsets_survive_tombstones() {
        let block = id(1, 1);
        let mut tree = DocumentTree::new();
        tree.insert(block, ROOT_ID, None, paragraph());
        tree.insert(id(1, 2), block, None, text('a'));
        tree.insert(id(1, 3), block, Some(id(1, 2)), text('b'));
        tree.insert(id(1, 4), block, Some(id(1, 3)), text('c'));

        assert_eq!(tree.offset_of(block, Some(id(1, 3))), Some(2));
        tree.mark_deleted(id(1, 3), id(1, 5));
        assert_eq!(tree.offset_of(block, Some(id(1, 3))), Some(1));
        assert_eq!(tree.anchor_at(block, 2), Some(id(1, 4)));
        assert_eq!(tree.block_text(block), "ac");
    }

    #[test]
    fn test_relocate_prefers_newest_slot() {
        let list = id(1, 1);
        let item = id(1, 2);
        let mut tree = DocumentTree::new();
        tree.insert(
            list,
            ROOT_ID,
            None,
            NodeData::from_new(
                NewNode::Block {
                    kind: BlockKind::List {
                        list: ListKind::Bullet,
                    },
                    align: Alignment::Left,
                },
                list,
            ),
        );
        tree.insert(item, ROOT_ID, Some(list), paragraph());
        assert_eq!(tree.children(ROOT_ID), vec![list, item]);

        tree.relocate(item, id(2, 5), list, None);
        // An older move arriving late does not win.
        tree.relocate(item, id(3, 4), ROOT_ID, None);

        assert_eq!(tree.children(ROOT_ID), vec![list]);
        assert_eq!(tree.children(list), vec![item]);
        assert_eq!(
            tree.block_type(item),
            Some(BlockType::List {
                list: ListKind::Bullet
            })
        );
    }

    #[test]
    fn test_collect_removes_stable_tombstones() {
        let block = id(1, 1);
        let mut tree = DocumentTree::new();
        tree.insert(block, ROOT_ID, None, paragraph());
        tree.insert(id(1, 2), block, None, text('a'));
        tree.insert(id(1, 3), block, Some(id(1, 2)), text('b'));
        tree.mark_deleted(id(1, 3), id(1, 4));

        // Pinned by a buffered op: kept.
        let pinned: HashSet<OpId> = [id(1, 3)].into_iter().collect();
        assert_eq!(tree.collect(|_| true, &pinned), 0);

        assert_eq!(tree.collect(|_| true, &HashSet::new()), 1);
        assert!(!tree.contains(id(1, 3)));
        assert!(!tree.contains_slot(id(1, 3)));
        assert_eq!(tree.block_text(block), "a");
    }

    #[test]
    fn test_collect_keeps_anchor_slots() {
        let block = id(1, 1);
        let mut tree = DocumentTree::new();
        tree.insert(block, ROOT_ID, None, paragraph());
        tree.insert(id(1, 2), block, None, text('a'));
        tree.insert(id(1, 3), block, Some(id(1, 2)), text('b'));
        tree.mark_deleted(id(1, 2), id(1, 4));

        assert_eq!(tree.collect(|_| true, &HashSet::new()), 1);
        assert!(!tree.contains(id(1, 2)));
        // 'b' is anchored on the removed character's slot.
        assert!(tree.contains_slot(id(1, 2)));
        assert_eq!(tree.block_text(block), "b");

        tree.mark_deleted(id(1, 3), id(1, 5));
        assert_eq!(tree.collect(|_| true, &HashSet::new()), 1);
        assert!(!tree.contains_slot(id(1, 2)));
        assert!(!tree.contains_slot(id(1, 3)));
    }

    #[test]
    fn test_collect_keeps_unstable_tombstones() {
        let block = id(1, 1);
        let mut tree = DocumentTree::new();
        tree.insert(block, ROOT_ID, None, paragraph());
        tree.mark_deleted(block, id(2, 9));
        assert_eq!(tree.collect(|op| op.seq < 9, &HashSet::new()), 0);
        assert!(tree.contains(block));
    }
}
