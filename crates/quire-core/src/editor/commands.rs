//! Toolbar commands and text editing intents.

use super::selection::{self, Caret, Position, Selection, chars_between};
use super::{Editor, Transaction};
use crate::crdt::{Intent, Operation, VersionVector};
use crate::document::{
    Alignment, BlockKind, BlockType, FormatFlags, HeadingLevel, ListKind, NewNode, NodeId,
    ROOT_ID, SlotId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Case transform offered by the text style menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextCase {
    Lowercase,
    Uppercase,
    Capitalize,
}

impl TextCase {
    pub fn flag(self) -> FormatFlags {
        match self {
            TextCase::Lowercase => FormatFlags::LOWERCASE,
            TextCase::Uppercase => FormatFlags::UPPERCASE,
            TextCase::Capitalize => FormatFlags::CAPITALIZE,
        }
    }
}

/// A queued editor command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ToggleFormat(FormatFlags),
    SetCase(TextCase),
    SetBlockType(BlockType),
    SetAlignment(Alignment),
    InsertList(ListKind),
    ClearFormatting,
    InsertText(String),
    DeleteBackward,
    InsertParagraph,
    SetSelection(Option<Selection>),
    SelectAll,
    /// Revert this editor's most recent edit that is not yet undone.
    Undo,
    /// Reapply the most recently undone edit.
    Redo,
}

/// What the previous toggle changed, so that repeating it on an unchanged
/// document and selection restores the characters exactly.
#[derive(Debug, Clone)]
pub(crate) struct ToggleMemo {
    flag: FormatFlags,
    selection: Selection,
    version: VersionVector,
    /// `(block, char, flags)` before the toggle, masked to the flags it touched.
    previous: Vec<(NodeId, NodeId, FormatFlags)>,
}

impl Editor {
    pub fn toggle_bold(&mut self) -> Vec<Operation> {
        self.toggle_format(FormatFlags::BOLD)
    }

    pub fn toggle_italic(&mut self) -> Vec<Operation> {
        self.toggle_format(FormatFlags::ITALIC)
    }

    pub fn toggle_underline(&mut self) -> Vec<Operation> {
        self.toggle_format(FormatFlags::UNDERLINE)
    }

    pub fn toggle_strikethrough(&mut self) -> Vec<Operation> {
        self.toggle_format(FormatFlags::STRIKETHROUGH)
    }

    /// Toggle one text flag over the selection.
    pub fn toggle_format(&mut self, flag: FormatFlags) -> Vec<Operation> {
        self.execute(Command::ToggleFormat(flag))
    }

    pub fn set_case(&mut self, case: TextCase) -> Vec<Operation> {
        self.execute(Command::SetCase(case))
    }

    pub fn set_heading(&mut self, level: HeadingLevel) -> Vec<Operation> {
        self.execute(Command::SetBlockType(BlockType::Heading { level }))
    }

    pub fn set_block_type(&mut self, block_type: BlockType) -> Vec<Operation> {
        self.execute(Command::SetBlockType(block_type))
    }

    pub fn set_alignment(&mut self, align: Alignment) -> Vec<Operation> {
        self.execute(Command::SetAlignment(align))
    }

    pub fn insert_list(&mut self, kind: ListKind) -> Vec<Operation> {
        self.execute(Command::InsertList(kind))
    }

    pub fn clear_formatting(&mut self) -> Vec<Operation> {
        self.execute(Command::ClearFormatting)
    }

    pub fn insert_text(&mut self, text: &str) -> Vec<Operation> {
        self.execute(Command::InsertText(text.to_string()))
    }

    pub fn delete_backward(&mut self) -> Vec<Operation> {
        self.execute(Command::DeleteBackward)
    }

    pub fn insert_paragraph(&mut self) -> Vec<Operation> {
        self.execute(Command::InsertParagraph)
    }

    pub fn set_selection(&mut self, selection: Option<Selection>) {
        self.execute(Command::SetSelection(selection));
    }

    pub fn select_all(&mut self) {
        self.execute(Command::SelectAll);
    }

    pub fn undo(&mut self) -> Vec<Operation> {
        self.execute(Command::Undo)
    }

    pub fn redo(&mut self) -> Vec<Operation> {
        self.execute(Command::Redo)
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub(super) fn run(&mut self, command: Command) -> Vec<Operation> {
        let memo = self.toggle_memo.take();
        let ops = match command {
            Command::Undo => return self.run_undo(),
            Command::Redo => return self.run_redo(),
            Command::SetSelection(selection) => {
                self.select(selection);
                Vec::new()
            }
            Command::SelectAll => {
                let tree = self.replica.tree();
                let blocks = tree.blocks();
                let selection = match (blocks.first(), blocks.last()) {
                    (Some(first), Some(last)) => Selection {
                        anchor: Caret::start_of(*first),
                        focus: Caret {
                            block: *last,
                            after: tree.chars(*last).last().copied(),
                        },
                    },
                    _ => Selection::collapsed(Caret::document_start()),
                };
                self.select(Some(selection));
                Vec::new()
            }
            Command::ToggleFormat(flag) => self.run_toggle(flag, memo),
            Command::SetCase(case) => self.run_toggle(case.flag(), memo),
            Command::ClearFormatting => self.run_clear_formatting(),
            Command::SetBlockType(block_type) => self.run_set_block_type(block_type),
            Command::SetAlignment(align) => self.run_set_alignment(align),
            Command::InsertList(kind) => self.run_insert_list(kind),
            Command::InsertText(text) => self.run_insert_text(&text),
            Command::DeleteBackward => self.run_delete_backward(),
            Command::InsertParagraph => self.run_insert_paragraph(),
        };
        let steps = std::mem::take(&mut self.recording);
        self.history.record(steps);
        ops
    }

    fn run_undo(&mut self) -> Vec<Operation> {
        let Some(steps) = self.history.take_undo() else {
            return Vec::new();
        };
        let mut redo = Vec::new();
        let mut tx = Transaction::new(&mut self.replica, &mut redo);
        self.history.replay(&mut tx, steps);
        let ops = tx.finish();
        self.history.undone(redo);
        self.typing = None;
        ops
    }

    fn run_redo(&mut self) -> Vec<Operation> {
        let Some(steps) = self.history.take_redo() else {
            return Vec::new();
        };
        let mut undo = Vec::new();
        let mut tx = Transaction::new(&mut self.replica, &mut undo);
        self.history.replay(&mut tx, steps);
        let ops = tx.finish();
        self.history.redone(undo);
        self.typing = None;
        ops
    }

    fn select(&mut self, selection: Option<Selection>) {
        if let Some(selection) = selection {
            let tree = self.replica.tree();
            let blocks = tree.blocks();
            let resolves = |caret| selection::resolve(tree, &blocks, caret).is_some();
            if !resolves(selection.anchor) || !resolves(selection.focus) {
                log::debug!("Ignoring selection that does not resolve");
                return;
            }
        }
        self.selection = selection;
        self.resolved = None;
        self.typing = None;
    }

    /// Selected blocks in document order.
    fn selected_blocks(&self) -> Vec<NodeId> {
        let Some((start, end)) = self.range() else {
            return Vec::new();
        };
        let blocks = self.replica.tree().blocks();
        blocks
            .get(start.block..=end.block.min(blocks.len().saturating_sub(1)))
            .map(<[_]>::to_vec)
            .unwrap_or_default()
    }

    fn run_toggle(&mut self, flag: FormatFlags, memo: Option<ToggleMemo>) -> Vec<Operation> {
        let (Some((start, end)), Some(selection)) = (self.range(), self.selection) else {
            return Vec::new();
        };
        let tree = self.replica.tree();
        let blocks = tree.blocks();
        let spans: Vec<(NodeId, Vec<NodeId>)> = chars_between(tree, &blocks, start, end)
            .into_iter()
            .filter(|(_, chars)| !chars.is_empty())
            .collect();

        if spans.is_empty() {
            // Nothing to format: the toggle applies to the next typed text.
            let mut next = self.toolbar.flags;
            if next.contains(flag) {
                next.remove(flag);
            } else {
                next.remove(flag.exclusive_with());
                next.insert(flag);
            }
            self.typing = Some(next);
            return Vec::new();
        }

        let mask = flag | flag.exclusive_with();
        let restore = memo.filter(|memo| {
            memo.flag == flag && memo.selection == selection && &memo.version == self.replica.version()
        });
        if let Some(memo) = restore {
            let mut tx = Transaction::new(&mut self.replica, &mut self.recording);
            // Group characters of each block by the flags they had.
            let mut groups: BTreeMap<(NodeId, u16), Vec<NodeId>> = BTreeMap::new();
            for (block, ch, flags) in memo.previous {
                groups.entry((block, flags.bits())).or_default().push(ch);
            }
            for ((block, bits), chars) in groups {
                let previous = FormatFlags::from_bits_truncate(bits);
                tx.apply(Intent::Format {
                    block,
                    chars,
                    set: previous & mask,
                    clear: mask & !previous,
                });
            }
            return tx.finish();
        }

        let formats: Vec<(NodeId, NodeId, FormatFlags)> = spans
            .iter()
            .flat_map(|(block, chars)| {
                chars
                    .iter()
                    .map(move |ch| (*block, *ch, tree.char_format(*ch).unwrap_or_default()))
            })
            .collect();
        let all_have = formats.iter().all(|(_, _, flags)| flags.contains(flag));
        let (set, clear) = if all_have {
            (FormatFlags::NONE, flag)
        } else {
            (flag, flag.exclusive_with())
        };

        let mut tx = Transaction::new(&mut self.replica, &mut self.recording);
        for (block, chars) in &spans {
            let changing: Vec<NodeId> = formats
                .iter()
                .filter(|(b, ch, flags)| {
                    b == block
                        && chars.contains(ch)
                        && (!flags.contains(set) || flags.intersects(clear))
                })
                .map(|(_, ch, _)| *ch)
                .collect();
            if changing.is_empty() {
                continue;
            }
            tx.apply(Intent::Format {
                block: *block,
                chars: changing,
                set,
                clear,
            });
        }
        let ops = tx.finish();
        self.toggle_memo = Some(ToggleMemo {
            flag,
            selection,
            version: self.replica.version().clone(),
            previous: formats
                .into_iter()
                .map(|(block, ch, flags)| (block, ch, flags & mask))
                .collect(),
        });
        ops
    }

    fn run_clear_formatting(&mut self) -> Vec<Operation> {
        let Some((start, end)) = self.range() else {
            return Vec::new();
        };
        self.typing = Some(FormatFlags::NONE);
        let tree = self.replica.tree();
        let blocks = tree.blocks();
        let spans: Vec<(NodeId, Vec<NodeId>)> = chars_between(tree, &blocks, start, end)
            .into_iter()
            .map(|(block, chars)| {
                let formatted = chars
                    .into_iter()
                    .filter(|ch| tree.char_format(*ch).is_some_and(|flags| !flags.is_empty()))
                    .collect();
                (block, formatted)
            })
            .collect();

        let mut tx = Transaction::new(&mut self.replica, &mut self.recording);
        for (block, chars) in spans {
            if chars.is_empty() {
                continue;
            }
            tx.apply(Intent::Format {
                block,
                chars,
                set: FormatFlags::NONE,
                clear: FormatFlags::ALL,
            });
        }
        tx.finish()
    }

    fn run_set_block_type(&mut self, block_type: BlockType) -> Vec<Operation> {
        let kind = match block_type {
            BlockType::List { list } => return self.run_insert_list(list),
            BlockType::Paragraph => BlockKind::Paragraph,
            BlockType::Heading { level } => BlockKind::Heading { level },
            BlockType::Quote => BlockKind::Quote,
        };
        let blocks = self.selected_blocks();
        if blocks.is_empty() {
            return Vec::new();
        }
        let mut tx = Transaction::new(&mut self.replica, &mut self.recording);
        lift_out_of_lists(&mut tx, &blocks);
        for block in blocks {
            if tx.tree().block_kind(block) != Some(kind) {
                tx.apply(Intent::SetBlock { block, kind });
            }
        }
        tx.finish()
    }

    fn run_set_alignment(&mut self, align: Alignment) -> Vec<Operation> {
        let blocks = self.selected_blocks();
        let mut tx = Transaction::new(&mut self.replica, &mut self.recording);
        for block in blocks {
            if tx.tree().alignment(block) != Some(align) {
                tx.apply(Intent::SetAlign { block, align });
            }
        }
        tx.finish()
    }

    fn run_insert_list(&mut self, kind: ListKind) -> Vec<Operation> {
        let blocks = self.selected_blocks();
        if blocks.is_empty() {
            return Vec::new();
        }
        let mut tx = Transaction::new(&mut self.replica, &mut self.recording);
        let target = BlockType::List { list: kind };
        let already = blocks
            .iter()
            .all(|block| tx.tree().block_type(*block) == Some(target));

        if already {
            // Same list again: back to paragraphs.
            lift_out_of_lists(&mut tx, &blocks);
            for block in blocks {
                if tx.tree().block_kind(block) != Some(BlockKind::Paragraph) {
                    tx.apply(Intent::SetBlock {
                        block,
                        kind: BlockKind::Paragraph,
                    });
                }
            }
            return tx.finish();
        }

        // Lists of another kind switch kind as a whole.
        let mut switched = Vec::new();
        for block in &blocks {
            if let Some(list) = tx.tree().containing_list(*block) {
                if !switched.contains(&list) {
                    switched.push(list);
                    if tx.tree().block_kind(list) != Some(BlockKind::List { list: kind }) {
                        tx.apply(Intent::SetBlock {
                            block: list,
                            kind: BlockKind::List { list: kind },
                        });
                    }
                }
            }
        }

        // Consecutive root blocks join a list.
        let mut runs: Vec<Vec<NodeId>> = Vec::new();
        let mut current = Vec::new();
        for block in blocks {
            if tx.tree().containing_list(block).is_some() {
                if !current.is_empty() {
                    runs.push(std::mem::take(&mut current));
                }
            } else {
                current.push(block);
            }
        }
        if !current.is_empty() {
            runs.push(current);
        }
        for run in runs {
            wrap_in_list(&mut tx, &run, kind);
        }
        tx.finish()
    }

    fn run_insert_text(&mut self, text: &str) -> Vec<Operation> {
        let Some((start, end)) = self.range() else {
            return Vec::new();
        };
        let typing = self.typing;
        let mut tx = Transaction::new(&mut self.replica, &mut self.recording);
        let Some(mut caret) = caret_for_edit(&mut tx, start, end) else {
            return tx.finish();
        };
        let format = typing.unwrap_or_else(|| {
            caret
                .after
                .and_then(|ch| tx.tree().char_format(ch))
                .unwrap_or_default()
        });
        for ch in text.chars() {
            match ch {
                '\r' => {}
                '\n' => caret = split_block(&mut tx, caret),
                _ => {
                    let Some(id) = tx.apply(Intent::Insert {
                        parent: caret.block,
                        after: caret.after,
                        node: NewNode::Text { ch, format },
                    }) else {
                        break;
                    };
                    caret.after = Some(id);
                }
            }
        }
        let ops = tx.finish();
        self.selection = Some(Selection::collapsed(caret));
        ops
    }

    fn run_delete_backward(&mut self) -> Vec<Operation> {
        let Some((start, end)) = self.range() else {
            return Vec::new();
        };
        let mut tx = Transaction::new(&mut self.replica, &mut self.recording);
        let blocks = tx.tree().blocks();
        let caret = if start != end {
            delete_range(&mut tx, &blocks, start, end)
        } else {
            blocks
                .get(start.block)
                .and_then(|block| delete_before(&mut tx, &blocks, *block, start))
        };
        let ops = tx.finish();
        if let Some(caret) = caret {
            self.selection = Some(Selection::collapsed(caret));
        }
        ops
    }

    fn run_insert_paragraph(&mut self) -> Vec<Operation> {
        let Some((start, end)) = self.range() else {
            return Vec::new();
        };
        let mut tx = Transaction::new(&mut self.replica, &mut self.recording);
        let Some(caret) = caret_for_edit(&mut tx, start, end) else {
            return tx.finish();
        };
        let caret = split_block(&mut tx, caret);
        let ops = tx.finish();
        self.selection = Some(Selection::collapsed(caret));
        ops
    }
}

/// Caret to edit at: the selection is deleted first, and an empty document
/// gets its first paragraph.
fn caret_for_edit(tx: &mut Transaction<'_>, start: Position, end: Position) -> Option<Caret> {
    let blocks = tx.tree().blocks();
    if blocks.is_empty() {
        let block = tx.apply(Intent::Insert {
            parent: ROOT_ID,
            after: None,
            node: NewNode::Block {
                kind: BlockKind::Paragraph,
                align: Alignment::Left,
            },
        })?;
        return Some(Caret::start_of(block));
    }
    if start != end {
        return delete_range(tx, &blocks, start, end);
    }
    Some(selection::caret_at(tx.tree(), &blocks, start))
}

/// Delete everything between two positions; the tail of the last block is
/// merged into the first. Returns the collapsed caret.
fn delete_range(
    tx: &mut Transaction<'_>,
    blocks: &[NodeId],
    start: Position,
    end: Position,
) -> Option<Caret> {
    let first = *blocks.get(start.block)?;
    let caret = Caret {
        block: first,
        after: tx.tree().anchor_at(first, start.offset),
    };
    let spans = chars_between(tx.tree(), blocks, start, end);

    if start.block == end.block {
        for (_, chars) in spans {
            for ch in chars {
                tx.apply(Intent::Delete { node: ch });
            }
        }
        return Some(caret);
    }

    let last = *blocks.get(end.block)?;
    let tail: Vec<NodeId> = tx.tree().chars(last).into_iter().skip(end.offset).collect();
    if let Some((_, chars)) = spans.first() {
        for ch in chars {
            tx.apply(Intent::Delete { node: *ch });
        }
    }
    for block in &blocks[start.block + 1..=end.block] {
        tx.apply(Intent::Delete { node: *block });
    }
    copy_chars(tx, &tail, first, caret.after);
    Some(caret)
}

/// Backspace at a collapsed caret.
fn delete_before(
    tx: &mut Transaction<'_>,
    blocks: &[NodeId],
    block: NodeId,
    at: Position,
) -> Option<Caret> {
    if at.offset > 0 {
        let chars = tx.tree().chars(block);
        let target = *chars.get(at.offset - 1)?;
        let after = tx.tree().anchor_at(block, at.offset - 1);
        tx.apply(Intent::Delete { node: target });
        return Some(Caret { block, after });
    }
    if tx.tree().containing_list(block).is_some() {
        // Start of a list item: the item leaves the list.
        lift_out_of_lists(tx, &[block]);
        if tx.tree().block_kind(block) != Some(BlockKind::Paragraph) {
            tx.apply(Intent::SetBlock {
                block,
                kind: BlockKind::Paragraph,
            });
        }
        return Some(Caret::start_of(block));
    }
    let previous = *blocks.get(at.block.checked_sub(1)?)?;
    let end_of_previous = tx.tree().chars(previous).last().copied();
    let moved = tx.tree().chars(block);
    copy_chars(tx, &moved, previous, end_of_previous);
    tx.apply(Intent::Delete { node: block });
    Some(Caret {
        block: previous,
        after: end_of_previous,
    })
}

/// Split the block at the caret. Returns the caret at the start of the new
/// block.
fn split_block(tx: &mut Transaction<'_>, caret: Caret) -> Caret {
    let tree = tx.tree();
    let block = caret.block;
    let in_list = tree.containing_list(block).is_some();
    let chars = tree.chars(block);
    if in_list && chars.is_empty() {
        // Enter on an empty list item ends the list.
        lift_out_of_lists(tx, &[block]);
        if tx.tree().block_kind(block) != Some(BlockKind::Paragraph) {
            tx.apply(Intent::SetBlock {
                block,
                kind: BlockKind::Paragraph,
            });
        }
        return caret;
    }

    let offset = tree.offset_of(block, caret.after).unwrap_or(chars.len());
    let tail: Vec<NodeId> = chars.into_iter().skip(offset).collect();
    let parent = tree.get(block).and_then(|node| node.parent()).unwrap_or(ROOT_ID);
    let after = tree.live_slot(block);
    let kind = if in_list {
        BlockKind::ListItem
    } else {
        BlockKind::Paragraph
    };
    let align = tree.alignment(block).unwrap_or_default();

    let Some(new_block) = tx.apply(Intent::Insert {
        parent,
        after,
        node: NewNode::Block { kind, align },
    }) else {
        return caret;
    };
    copy_chars(tx, &tail, new_block, None);
    for ch in tail {
        tx.apply(Intent::Delete { node: ch });
    }
    Caret::start_of(new_block)
}

/// Recreate `chars` (with their formats) in `block` after `after`.
fn copy_chars(
    tx: &mut Transaction<'_>,
    chars: &[NodeId],
    block: NodeId,
    mut after: Option<NodeId>,
) -> Option<NodeId> {
    for ch in chars {
        let Some(text) = tx.tree().get(*ch).and_then(|node| node.as_text()) else {
            continue;
        };
        let node = NewNode::Text {
            ch: text.ch(),
            format: text.format(),
        };
        after = Some(tx.apply(Intent::Insert {
            parent: block,
            after,
            node,
        })?);
    }
    after
}

/// Move the given list items to the root, splitting their lists so that the
/// remaining items keep their order.
fn lift_out_of_lists(tx: &mut Transaction<'_>, blocks: &[NodeId]) {
    let mut lists: Vec<NodeId> = Vec::new();
    for block in blocks {
        if let Some(list) = tx.tree().containing_list(*block) {
            if !lists.contains(&list) {
                lists.push(list);
            }
        }
    }
    for list in lists {
        lift_from_list(tx, list, blocks);
    }
}

fn lift_from_list(tx: &mut Transaction<'_>, list: NodeId, selected: &[NodeId]) {
    let tree = tx.tree();
    let items = tree.children(list);
    let Some(first) = items.iter().position(|id| selected.contains(id)) else {
        return;
    };
    let last = items
        .iter()
        .rposition(|id| selected.contains(id))
        .unwrap_or(first);
    let lifted = items[first..=last].to_vec();
    let tail = items[last + 1..].to_vec();
    let list_kind = tree.block_kind(list);
    let list_align = tree.alignment(list).unwrap_or_default();

    let mut anchor: Option<SlotId> = if first == 0 {
        // Lifted from the head: the items go before the list, which keeps
        // its tail.
        let root = tree.children(ROOT_ID);
        root.iter()
            .position(|id| *id == list)
            .and_then(|index| index.checked_sub(1))
            .and_then(|index| tree.live_slot(root[index]))
    } else {
        tree.live_slot(list)
    };

    for item in &lifted {
        anchor = tx
            .apply(Intent::Move {
                node: *item,
                parent: ROOT_ID,
                after: anchor,
            })
            .or(anchor);
    }

    if first == 0 {
        if tail.is_empty() {
            tx.apply(Intent::Delete { node: list });
        }
        return;
    }
    if tail.is_empty() {
        return;
    }
    let Some(kind @ BlockKind::List { .. }) = list_kind else {
        return;
    };
    let Some(split) = tx.apply(Intent::Insert {
        parent: ROOT_ID,
        after: anchor,
        node: NewNode::Block {
            kind,
            align: list_align,
        },
    }) else {
        return;
    };
    let mut after = None;
    for item in tail {
        after = tx
            .apply(Intent::Move {
                node: item,
                parent: split,
                after,
            })
            .or(after);
    }
}

/// Put consecutive root blocks into a list of `kind`, joining a list of the
/// same kind right before them.
fn wrap_in_list(tx: &mut Transaction<'_>, run: &[NodeId], kind: ListKind) {
    let Some(first) = run.first() else {
        return;
    };
    let tree = tx.tree();
    let root = tree.children(ROOT_ID);
    let previous = root
        .iter()
        .position(|id| id == first)
        .and_then(|index| index.checked_sub(1))
        .map(|index| root[index])
        .filter(|id| tree.block_kind(*id) == Some(BlockKind::List { list: kind }));

    let (list, mut after) = match previous {
        Some(list) => {
            let last_item = tree.children(list).last().copied();
            (list, last_item.and_then(|item| tree.live_slot(item)))
        }
        None => {
            let align = tree.alignment(*first).unwrap_or_default();
            let slot = tree.live_slot(*first);
            let Some(list) = tx.apply(Intent::Insert {
                parent: ROOT_ID,
                after: slot,
                node: NewNode::Block {
                    kind: BlockKind::List { list: kind },
                    align,
                },
            }) else {
                return;
            };
            (list, None)
        }
    };

    for block in run {
        after = tx
            .apply(Intent::Move {
                node: *block,
                parent: list,
                after,
            })
            .or(after);
        if tx.tree().block_kind(*block) != Some(BlockKind::ListItem) {
            tx.apply(Intent::SetBlock {
                block: *block,
                kind: BlockKind::ListItem,
            });
        }
    }
}
