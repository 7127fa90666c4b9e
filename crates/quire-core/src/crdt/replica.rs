//! A replica of the document: local intents in, remote operations merged.

use super::op::{Intent, OpAction, Operation};
use super::version::VersionVector;
use crate::document::{
    ClientId, DocumentTree, FormatFlags, Node, NodeData, NodeId, OpId, ROOT_ID, RenderedBlock,
    SlotId,
};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Reasons an operation is refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CrdtError {
    #[error("malformed operation {id}: {reason}")]
    Malformed { id: OpId, reason: String },
    #[error("operation {id} references {missing}, which has been collected")]
    Stale { id: OpId, missing: OpId },
}

pub type CrdtResult<T> = Result<T, CrdtError>;

/// Result of handing a remote operation to the replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Applied, along with `released` buffered operations it unblocked.
    Applied { released: usize },
    /// Waiting for a dependency.
    Buffered,
    /// Already applied or already buffered.
    Duplicate,
}

/// Bounds on the buffer of causally unready operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeLimits {
    pub pending_window: Duration,
    pub max_pending: usize,
}

impl Default for MergeLimits {
    fn default() -> Self {
        Self {
            pending_window: Duration::from_secs(30),
            max_pending: 1024,
        }
    }
}

#[derive(Debug, Clone)]
struct PendingOp {
    op: Operation,
    received: Instant,
}

enum Readiness {
    Ready,
    Missing(OpId),
    Stale(OpId),
}

/// One participant's copy of the document.
#[derive(Debug, Clone)]
pub struct Replica {
    client: ClientId,
    clock: u64,
    last_local: Option<OpId>,
    tree: DocumentTree,
    version: VersionVector,
    log: Vec<Operation>,
    pending: Vec<PendingOp>,
    peers: HashMap<ClientId, VersionVector>,
    limits: MergeLimits,
}

impl Replica {
    pub fn new(client: ClientId) -> Self {
        Self::with_limits(client, MergeLimits::default())
    }

    pub fn with_limits(client: ClientId, limits: MergeLimits) -> Self {
        Self {
            client,
            clock: 0,
            last_local: None,
            tree: DocumentTree::new(),
            version: VersionVector::new(),
            log: Vec::new(),
            pending: Vec::new(),
            peers: HashMap::new(),
            limits,
        }
    }

    /// Rebuild a replica from a stored operation log.
    pub fn from_ops(
        client: ClientId,
        limits: MergeLimits,
        ops: impl IntoIterator<Item = Operation>,
    ) -> CrdtResult<Self> {
        let mut replica = Self::with_limits(client, limits);
        for op in ops {
            replica.apply_remote(op)?;
        }
        Ok(replica)
    }

    pub fn client(&self) -> ClientId {
        self.client
    }

    pub fn clock(&self) -> u64 {
        self.clock
    }

    pub fn tree(&self) -> &DocumentTree {
        &self.tree
    }

    pub fn version(&self) -> &VersionVector {
        &self.version
    }

    pub fn log(&self) -> &[Operation] {
        &self.log
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn limits(&self) -> MergeLimits {
        self.limits
    }

    pub fn render(&self) -> Vec<RenderedBlock> {
        self.tree.render()
    }

    pub fn plain_text(&self) -> String {
        self.tree.plain_text()
    }

    /// Whether the operation `id` has been applied here.
    pub fn has_applied(&self, id: OpId) -> bool {
        id == ROOT_ID || self.version.covers(id)
    }

    /// Stamp a local intent, apply it and return the operation to broadcast.
    pub fn apply_local(&mut self, intent: Intent) -> CrdtResult<Operation> {
        let (target_id, action) = intent.into_parts();
        let mut op = Operation {
            origin: self.client,
            seq: self.clock + 1,
            target_id,
            action,
            deps: Vec::new(),
        };
        let mut deps: Vec<OpId> = op
            .node_refs()
            .into_iter()
            .chain(op.slot_ref())
            .chain(self.last_local)
            .filter(|id| *id != ROOT_ID)
            .collect();
        deps.sort();
        deps.dedup();
        op.deps = deps;

        match self.readiness(&op) {
            Readiness::Ready => {}
            Readiness::Missing(missing) => {
                return Err(CrdtError::Malformed {
                    id: op.id(),
                    reason: format!("unknown reference {missing}"),
                });
            }
            Readiness::Stale(missing) => {
                return Err(CrdtError::Stale {
                    id: op.id(),
                    missing,
                });
            }
        }
        self.validate(&op)?;
        self.last_local = Some(op.id());
        self.integrate(op.clone());
        Ok(op)
    }

    /// Merge an operation from a peer.
    ///
    /// Operations whose dependencies are unknown are buffered and retried
    /// after every successful application. Malformed or stale operations are
    /// rejected without touching the document.
    pub fn apply_remote(&mut self, op: Operation) -> CrdtResult<ApplyOutcome> {
        self.apply_remote_at(op, Instant::now())
    }

    pub fn apply_remote_at(&mut self, op: Operation, now: Instant) -> CrdtResult<ApplyOutcome> {
        let id = op.id();
        if self.has_applied(id) || self.pending.iter().any(|pending| pending.op.id() == id) {
            return Ok(ApplyOutcome::Duplicate);
        }

        match self.readiness(&op) {
            Readiness::Missing(missing) => {
                log::debug!("Buffering operation {id}: waiting for {missing}");
                self.buffer(op, now);
                Ok(ApplyOutcome::Buffered)
            }
            Readiness::Stale(missing) => {
                log::warn!("Rejected operation {id}: {missing} has been collected");
                Err(CrdtError::Stale { id, missing })
            }
            Readiness::Ready => {
                if let Err(err) = self.validate(&op) {
                    log::warn!("Rejected {err}");
                    return Err(err);
                }
                self.integrate(op);
                let released = self.drain_pending();
                Ok(ApplyOutcome::Applied { released })
            }
        }
    }

    /// Drop buffered operations older than the pending window.
    pub fn expire_pending(&mut self, now: Instant) -> usize {
        let window = self.limits.pending_window;
        let before = self.pending.len();
        self.pending.retain(|pending| {
            let keep = now.saturating_duration_since(pending.received) <= window;
            if !keep {
                log::warn!(
                    "Dropping operation {} after {:?} without its dependencies",
                    pending.op.id(),
                    window
                );
            }
            keep
        });
        before - self.pending.len()
    }

    /// Operations not covered by `version`, in an order that can be replayed.
    pub fn ops_since(&self, version: &VersionVector) -> Vec<Operation> {
        self.log
            .iter()
            .filter(|op| !version.covers(op.id()))
            .cloned()
            .collect()
    }

    /// Remember what a peer reported having applied.
    pub fn record_peer_version(&mut self, peer: ClientId, version: &VersionVector) {
        if peer == self.client {
            return;
        }
        self.peers.entry(peer).or_default().merge(version);
    }

    pub fn forget_peer(&mut self, peer: ClientId) {
        self.peers.remove(&peer);
    }

    pub fn known_peers(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.peers.keys().copied()
    }

    /// What this replica and every known peer have applied.
    pub fn stable_version(&self) -> VersionVector {
        self.peers
            .values()
            .fold(self.version.clone(), |stable, peer| stable.meet(peer))
    }

    /// Remove tombstones and superseded slots that every known peer has seen.
    ///
    /// Runs only once this replica has applied everything each peer reported
    /// of its own operations. Returns the number of nodes removed.
    pub fn collect_garbage(&mut self) -> usize {
        for (peer, version) in &self.peers {
            if self.version.get(*peer) < version.get(*peer) {
                log::debug!("Skipping collection: behind peer {peer}");
                return 0;
            }
        }
        let stable = self.stable_version();
        let pinned: HashSet<OpId> = self
            .pending
            .iter()
            .flat_map(|pending| pending.op.requirements())
            .collect();
        let removed = self.tree.collect(|id| stable.covers(id), &pinned);
        if removed > 0 {
            log::debug!("Collected {removed} tombstoned nodes");
        }
        removed
    }

    fn readiness(&self, op: &Operation) -> Readiness {
        if let Some(missing) = op.requirements().find(|id| !self.has_applied(*id)) {
            return Readiness::Missing(missing);
        }
        if let Some(gone) = op.node_refs().into_iter().find(|id| !self.tree.contains(*id)) {
            return Readiness::Stale(gone);
        }
        match op.slot_ref() {
            Some(slot) if !self.tree.contains_slot(slot) => Readiness::Stale(slot),
            _ => Readiness::Ready,
        }
    }

    fn validate(&self, op: &Operation) -> CrdtResult<()> {
        let id = op.id();
        let malformed = |reason: &str| CrdtError::Malformed {
            id,
            reason: reason.to_string(),
        };
        if op.origin == ClientId::ROOT || op.seq == 0 {
            return Err(malformed("reserved id"));
        }
        let target = self
            .tree
            .get(op.target_id)
            .ok_or_else(|| malformed("unknown target"))?;

        match &op.action {
            OpAction::Insert { after, node } => {
                if self.tree.contains(id) {
                    return Err(malformed("node already exists"));
                }
                if !target.accepts(&NodeData::from_new(*node, id)) {
                    return Err(malformed("parent cannot hold this node"));
                }
                if !self.anchor_in(op.target_id, *after) {
                    return Err(malformed("anchor is not in the parent"));
                }
            }
            OpAction::Delete => {
                if op.target_id == ROOT_ID {
                    return Err(malformed("root cannot be deleted"));
                }
            }
            OpAction::Format { chars, set, clear } => {
                if !target.as_block().is_some_and(|block| block.kind().holds_text()) {
                    return Err(malformed("format target is not a text block"));
                }
                if set.intersects(*clear) || !FormatFlags::ALL.contains(*set | *clear) {
                    return Err(malformed("invalid format flags"));
                }
                let all_in_block = chars.iter().all(|ch| {
                    self.tree.get(*ch).is_some_and(|node| {
                        node.as_text().is_some() && node.parent() == Some(op.target_id)
                    })
                });
                if !all_in_block {
                    return Err(malformed("format covers characters outside the block"));
                }
            }
            OpAction::SetBlock { kind } => {
                let Some(block) = target.as_block() else {
                    return Err(malformed("target is not a block"));
                };
                if block.kind().is_container() != kind.is_container() {
                    return Err(malformed("block kind would change container-ness"));
                }
            }
            OpAction::SetAlign { .. } => {
                if target.as_block().is_none() {
                    return Err(malformed("target is not a block"));
                }
            }
            OpAction::Move { parent, after } => {
                if !target.as_block().is_some_and(|block| block.kind().holds_text()) {
                    return Err(malformed("only text blocks can move"));
                }
                let parent_ok = self.tree.get(*parent).is_some_and(|node| match node.data() {
                    NodeData::Root => true,
                    NodeData::Block(block) => block.kind().is_container(),
                    NodeData::Text(_) => false,
                });
                if !parent_ok {
                    return Err(malformed("move destination cannot hold blocks"));
                }
                if !self.anchor_in(*parent, *after) {
                    return Err(malformed("anchor is not in the destination"));
                }
            }
        }
        Ok(())
    }

    fn anchor_in(&self, parent: NodeId, after: Option<SlotId>) -> bool {
        match after {
            None => true,
            Some(slot) => self
                .tree
                .slot_info(slot)
                .is_some_and(|info| info.parent == parent),
        }
    }

    /// Apply a validated operation.
    fn integrate(&mut self, op: Operation) {
        let id = op.id();
        let target = op.target_id;
        match &op.action {
            OpAction::Insert { after, node } => {
                self.tree
                    .insert(id, target, *after, NodeData::from_new(*node, id));
            }
            OpAction::Delete => {
                self.tree.mark_deleted(target, id);
            }
            OpAction::Format { chars, set, clear } => {
                for ch in chars {
                    if let Some(Node {
                        data: NodeData::Text(text),
                        ..
                    }) = self.tree.node_mut(*ch)
                    {
                        text.format.apply(id, *set, *clear);
                    }
                }
            }
            OpAction::SetBlock { kind } => {
                if let Some(Node {
                    data: NodeData::Block(block),
                    ..
                }) = self.tree.node_mut(target)
                {
                    block.kind.set(*kind, id);
                }
            }
            OpAction::SetAlign { align } => {
                if let Some(Node {
                    data: NodeData::Block(block),
                    ..
                }) = self.tree.node_mut(target)
                {
                    block.align.set(*align, id);
                }
            }
            OpAction::Move { parent, after } => {
                self.tree.relocate(target, id, *parent, *after);
            }
        }
        log::trace!("Applied {} {id}", op.action.name());
        self.clock = self.clock.max(op.seq);
        self.version.observe(id);
        self.log.push(op);
    }

    fn buffer(&mut self, op: Operation, now: Instant) {
        let capacity = self.limits.max_pending.max(1);
        while self.pending.len() >= capacity {
            let dropped = self.pending.remove(0);
            log::warn!(
                "Pending buffer full, dropping operation {}",
                dropped.op.id()
            );
        }
        self.pending.push(PendingOp { op, received: now });
    }

    /// Apply every buffered operation that has become ready.
    fn drain_pending(&mut self) -> usize {
        let mut released = 0;
        while let Some(index) = self
            .pending
            .iter()
            .position(|pending| !matches!(self.readiness(&pending.op), Readiness::Missing(_)))
        {
            let PendingOp { op, .. } = self.pending.remove(index);
            let id = op.id();
            if self.has_applied(id) {
                continue;
            }
            if let Readiness::Stale(missing) = self.readiness(&op) {
                log::warn!("Dropping buffered operation {id}: {missing} has been collected");
                continue;
            }
            match self.validate(&op) {
                Ok(()) => {
                    self.integrate(op);
                    released += 1;
                }
                Err(err) => log::warn!("Rejected buffered {err}"),
            }
        }
        released
    }
}
