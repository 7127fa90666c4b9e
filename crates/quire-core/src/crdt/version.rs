//! Version vectors: per-origin high-water marks of applied operations.

use crate::document::{ClientId, OpId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Highest applied `seq` per origin.
///
/// Each origin's operations depend on its previous one, so they apply in
/// order and a single number per origin describes everything applied.
/// Serialized as a list of `[origin, seq]` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<(ClientId, u64)>", into = "Vec<(ClientId, u64)>")]
pub struct VersionVector(BTreeMap<ClientId, u64>);

impl VersionVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, origin: ClientId) -> u64 {
        self.0.get(&origin).copied().unwrap_or(0)
    }

    /// Whether the operation `id` is included.
    pub fn covers(&self, id: OpId) -> bool {
        self.get(id.origin) >= id.seq
    }

    /// Record that `id` has been applied.
    pub fn observe(&mut self, id: OpId) {
        let entry = self.0.entry(id.origin).or_insert(0);
        *entry = (*entry).max(id.seq);
    }

    /// Pointwise maximum.
    pub fn merge(&mut self, other: &VersionVector) {
        for (origin, seq) in &other.0 {
            let entry = self.0.entry(*origin).or_insert(0);
            *entry = (*entry).max(*seq);
        }
    }

    /// Pointwise minimum: what both sides have applied.
    pub fn meet(&self, other: &VersionVector) -> VersionVector {
        VersionVector(
            self.0
                .iter()
                .filter_map(|(origin, seq)| {
                    let common = (*seq).min(other.get(*origin));
                    (common > 0).then_some((*origin, common))
                })
                .collect(),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = (ClientId, u64)> + '_ {
        self.0.iter().map(|(origin, seq)| (*origin, *seq))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<(ClientId, u64)>> for VersionVector {
    fn from(pairs: Vec<(ClientId, u64)>) -> Self {
        let mut version = VersionVector::new();
        for (origin, seq) in pairs {
            version.observe(OpId::new(origin, seq));
        }
        version
    }
}

impl From<VersionVector> for Vec<(ClientId, u64)> {
    fn from(version: VersionVector) -> Self {
        version.0.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(client: u64, seq: u64) -> OpId {
        OpId::new(ClientId(client), seq)
    }

    #[test]
    fn test_covers_and_observe() {
        let mut v = VersionVector::new();
        assert!(!v.covers(op(1, 1)));
        v.observe(op(1, 4));
        v.observe(op(1, 2));
        assert_eq!(v.get(ClientId(1)), 4);
        assert!(v.covers(op(1, 3)));
        assert!(!v.covers(op(2, 1)));
    }

    #[test]
    fn test_meet_is_pointwise_min() {
        let a: VersionVector = vec![(ClientId(1), 5), (ClientId(2), 3)].into();
        let b: VersionVector = vec![(ClientId(1), 2), (ClientId(3), 7)].into();
        let m = a.meet(&b);
        assert_eq!(m.get(ClientId(1)), 2);
        assert_eq!(m.get(ClientId(2)), 0);
        assert_eq!(m.get(ClientId(3)), 0);
    }

    #[test]
    fn test_serializes_as_pairs() {
        let v: VersionVector = vec![(ClientId(9), 1)].into();
        assert_eq!(serde_json::to_string(&v).unwrap(), "[[9,1]]");
        let back: VersionVector = serde_json::from_str("[[9,1]]").unwrap();
        assert_eq!(back, v);
    }
}
