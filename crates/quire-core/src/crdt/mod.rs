//! Replication layer: operations, version vectors and the merging replica.
//!
//! Every local edit becomes an [`Operation`] stamped `(origin, seq)` with a
//! Lamport `seq`. Remote operations are merged so that replicas holding the
//! same set of operations render the same document, whatever order the
//! operations arrived in.

mod op;
mod replica;
mod version;

pub use op::{Intent, OpAction, Operation};
pub use replica::{ApplyOutcome, CrdtError, CrdtResult, MergeLimits, Replica};
pub use version::VersionVector;
