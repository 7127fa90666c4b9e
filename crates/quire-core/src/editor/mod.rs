//! Toolbar and command layer.
//!
//! The [`Editor`] owns a [`Replica`] and the local selection. Local commands
//! and remote operations go through one FIFO queue, so a command never
//! observes a half-applied remote change and never interleaves with another
//! command. After every queued input the selection is repaired and the
//! toolbar state recomputed.

mod commands;
mod history;
mod selection;
mod toolbar;

pub use commands::{Command, TextCase};
pub use selection::{Caret, Position, Selection};
pub use toolbar::ToolbarState;

use crate::config::CollabConfig;
use crate::crdt::{CrdtResult, Intent, MergeLimits, OpAction, Operation, Replica, VersionVector};
use crate::document::{ClientId, DocumentTree, FormatFlags, OpId, RenderedBlock};
use commands::ToggleMemo;
use history::{History, Step};
use std::collections::VecDeque;
use std::time::Instant;

#[derive(Debug, Clone)]
enum Input {
    Command(Command),
    Remote(Operation),
}

/// The editing context of one participant.
#[derive(Debug, Clone)]
pub struct Editor {
    replica: Replica,
    selection: Option<Selection>,
    /// Positions the selection resolved to after the last input.
    resolved: Option<(Position, Position)>,
    /// Format for the next typed characters, set by toggles on a collapsed
    /// selection.
    typing: Option<FormatFlags>,
    queue: VecDeque<Input>,
    toolbar: ToolbarState,
    toggle_memo: Option<ToggleMemo>,
    history: History,
    /// Undo steps of the command being run.
    recording: Vec<Step>,
}

impl Editor {
    pub fn new(client: ClientId) -> Self {
        Self::with_replica(Replica::new(client))
    }

    pub fn with_limits(client: ClientId, limits: MergeLimits) -> Self {
        Self::with_replica(Replica::with_limits(client, limits))
    }

    /// An editor whose replica buffers remote operations as `config` says.
    pub fn from_config(client: ClientId, config: &CollabConfig) -> Self {
        Self::with_limits(client, config.merge_limits())
    }

    pub fn with_replica(replica: Replica) -> Self {
        Self {
            replica,
            selection: None,
            resolved: None,
            typing: None,
            queue: VecDeque::new(),
            toolbar: ToolbarState::default(),
            toggle_memo: None,
            history: History::default(),
            recording: Vec::new(),
        }
    }

    pub fn client(&self) -> ClientId {
        self.replica.client()
    }

    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    pub fn tree(&self) -> &DocumentTree {
        self.replica.tree()
    }

    pub fn selection(&self) -> Option<Selection> {
        self.selection
    }

    pub fn toolbar(&self) -> ToolbarState {
        self.toolbar
    }

    pub fn typing_format(&self) -> Option<FormatFlags> {
        self.typing
    }

    pub fn render(&self) -> Vec<RenderedBlock> {
        self.replica.render()
    }

    pub fn plain_text(&self) -> String {
        self.replica.plain_text()
    }

    pub fn version(&self) -> &VersionVector {
        self.replica.version()
    }

    pub fn ops_since(&self, version: &VersionVector) -> Vec<Operation> {
        self.replica.ops_since(version)
    }

    pub fn record_peer_version(&mut self, peer: ClientId, version: &VersionVector) {
        self.replica.record_peer_version(peer, version);
    }

    pub fn forget_peer(&mut self, peer: ClientId) {
        self.replica.forget_peer(peer);
    }

    /// Queue a command and process the queue. Returns the operations the
    /// command produced, to be published.
    pub fn execute(&mut self, command: Command) -> Vec<Operation> {
        self.queue.push_back(Input::Command(command));
        self.drain()
    }

    /// Queue a remote operation without processing it yet.
    pub fn enqueue_remote(&mut self, op: Operation) {
        self.queue.push_back(Input::Remote(op));
    }

    /// Queue a remote operation and process the queue.
    pub fn apply_remote(&mut self, op: Operation) {
        self.enqueue_remote(op);
        self.drain();
    }

    /// Process queued inputs in arrival order.
    pub fn drain(&mut self) -> Vec<Operation> {
        let mut produced = Vec::new();
        while let Some(input) = self.queue.pop_front() {
            match input {
                Input::Command(command) => produced.extend(self.run(command)),
                Input::Remote(op) => {
                    if let Err(err) = self.replica.apply_remote(op) {
                        log::debug!("Remote operation not applied: {err}");
                    }
                }
            }
            self.refresh();
        }
        produced
    }

    /// Periodic upkeep: expire stale buffered operations and collect
    /// tombstones every known peer has seen. Returns the nodes collected.
    pub fn maintain(&mut self, now: Instant) -> usize {
        self.drain();
        self.replica.expire_pending(now);
        let collected = self.replica.collect_garbage();
        if collected > 0 {
            self.refresh();
        }
        collected
    }

    /// Resolved `(start, end)` of the selection, in document order.
    fn range(&self) -> Option<(Position, Position)> {
        let (anchor, focus) = self.resolved?;
        Some(if anchor <= focus {
            (anchor, focus)
        } else {
            (focus, anchor)
        })
    }

    /// Re-resolve the selection and recompute the toolbar.
    fn refresh(&mut self) {
        self.refresh_selection();
        self.toolbar.can_undo = self.history.can_undo();
        self.toolbar.can_redo = self.history.can_redo();
    }

    /// Repair carets whose block or character is gone.
    fn refresh_selection(&mut self) {
        let tree = self.replica.tree();
        let blocks = tree.blocks();
        let Some(selection) = self.selection else {
            self.resolved = None;
            self.toolbar = ToolbarState::default();
            return;
        };

        let last = self.resolved.unwrap_or_default();
        let repair = |caret: Caret, fallback: Position| match selection::resolve(tree, &blocks, caret) {
            Some(_) => caret,
            None => selection::caret_at(tree, &blocks, fallback),
        };
        let repaired = Selection {
            anchor: repair(selection.anchor, last.0),
            focus: repair(selection.focus, last.1),
        };
        if repaired != selection {
            log::debug!("Selection repaired after a remote change");
        }

        let (Some(anchor_pos), Some(focus_pos)) = (
            selection::resolve(tree, &blocks, repaired.anchor),
            selection::resolve(tree, &blocks, repaired.focus),
        ) else {
            self.selection = None;
            self.resolved = None;
            self.toolbar = ToolbarState::default();
            return;
        };
        self.toolbar = toolbar::compute(tree, &blocks, anchor_pos, focus_pos, self.typing);
        self.selection = Some(repaired);
        self.resolved = Some((anchor_pos, focus_pos));
    }
}

/// One command's batch of local operations.
///
/// The first failing intent aborts the rest of the batch. Operations already
/// applied stay applied and are still returned, so peers see the same state.
/// The steps undoing each applied intent are appended to `undo`.
pub(crate) struct Transaction<'a> {
    replica: &'a mut Replica,
    undo: &'a mut Vec<Step>,
    ops: Vec<Operation>,
    failed: bool,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(replica: &'a mut Replica, undo: &'a mut Vec<Step>) -> Self {
        Self {
            replica,
            undo,
            ops: Vec::new(),
            failed: false,
        }
    }

    pub(crate) fn tree(&self) -> &DocumentTree {
        self.replica.tree()
    }

    pub(crate) fn apply(&mut self, intent: Intent) -> Option<OpId> {
        if self.failed {
            return None;
        }
        match self.try_apply(intent) {
            Ok(id) => Some(id),
            Err(err) => {
                log::warn!("Command aborted: {err}");
                self.failed = true;
                None
            }
        }
    }

    fn try_apply(&mut self, intent: Intent) -> CrdtResult<OpId> {
        let inverse = history::invert(self.replica.tree(), &intent);
        let op = self.replica.apply_local(intent)?;
        let id = op.id();
        self.undo.extend(inverse);
        if let OpAction::Insert { .. } = op.action {
            self.undo.push(Step::Apply(Intent::Delete { node: id }));
        }
        self.ops.push(op);
        Ok(id)
    }

    pub(crate) fn finish(self) -> Vec<Operation> {
        self.ops
    }
}
