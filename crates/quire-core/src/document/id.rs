//! Identifiers shared by the document tree and the replication layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a participant (a replica / editing session).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub u64);

impl ClientId {
    /// Reserved origin of the root node. Never handed out to a participant.
    pub const ROOT: ClientId = ClientId(0);

    /// Generate a fresh random client id.
    pub fn random() -> Self {
        loop {
            let (hi, _) = Uuid::new_v4().as_u64_pair();
            if hi != 0 {
                return ClientId(hi);
            }
        }
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Identifier of an operation.
///
/// `seq` is a Lamport counter, so ids compare by `seq` first and by origin
/// second. Field order matters for the derived `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpId {
    pub seq: u64,
    pub origin: ClientId,
}

impl OpId {
    pub const fn new(origin: ClientId, seq: u64) -> Self {
        Self { seq, origin }
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.origin, self.seq)
    }
}

/// A node is identified by the operation that created it.
pub type NodeId = OpId;

/// A sequence slot is identified by the insert or move that created it.
pub type SlotId = OpId;

/// Id of the root node, identical on every replica.
pub const ROOT_ID: NodeId = OpId::new(ClientId::ROOT, 0);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_id_orders_by_seq_then_origin() {
        let a = OpId::new(ClientId(9), 1);
        let b = OpId::new(ClientId(1), 2);
        let c = OpId::new(ClientId(2), 2);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_random_client_is_never_root() {
        for _ in 0..32 {
            assert_ne!(ClientId::random(), ClientId::ROOT);
        }
    }
}
