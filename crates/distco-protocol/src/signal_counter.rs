//! Reply aggregation across a fan-out to many nodes (spec §5 "Ordering",
//! M2 "Signal-counter waits").
//!
//! All fan-out protocols (GCP prepare/commit/save, LCP round start,
//! take-over, node inclusion, ...) enumerate the expected node set at send
//! time and wait for a reply from each. When a node fails while bits are
//! still outstanding, the counter is cleared for that node and the caller
//! treats it as a synthetic reply, so the protocol proceeds rather than
//! hanging forever.

use std::collections::BTreeSet;

use distco_types::NodeId;
use serde::{Deserialize, Serialize};

/// What a [`SignalCounter`] is waiting for — purely descriptive, used in
/// logs and for routing a completed wait back to its driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitReason {
    CopyGci,
    CopyTab,
    CreateFrag,
    DihSwitchReplica,
    EmptyLcp,
    EndTo,
    GcpCommit,
    GcpPrepare,
    GcpSave,
    InclNode,
    MasterGcp,
    MasterLcp,
    StartInfo,
    StartRec,
    StartTo,
    StopMe,
    TcClopsize,
    TcGetOpsize,
    UpdateTo,
    StartLcp,
}

/// A bitset of nodes expected to reply, with a reason tag for logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalCounter {
    reason: WaitReason,
    outstanding: BTreeSet<NodeId>,
}

impl SignalCounter {
    /// Starts waiting for a reply from every node in `expected`.
    pub fn new(reason: WaitReason, expected: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            reason,
            outstanding: expected.into_iter().collect(),
        }
    }

    pub fn reason(&self) -> WaitReason {
        self.reason
    }

    /// Records that we are now also waiting on `node` (used when a wait is
    /// widened after it started, e.g. a node joins the expected set).
    pub fn expect(&mut self, node: NodeId) {
        self.outstanding.insert(node);
    }

    /// Records a reply from `node`. Returns `true` if this reply was
    /// actually outstanding (a duplicate or unexpected reply is a no-op).
    pub fn clear(&mut self, node: NodeId) -> bool {
        self.outstanding.remove(&node)
    }

    /// Whether every expected node has replied.
    pub fn done(&self) -> bool {
        self.outstanding.is_empty()
    }

    /// The nodes still outstanding, for failure fix-ups and diagnostics.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.outstanding.iter().copied()
    }

    /// Node-failure fix-up: if `node` was outstanding, synthesize its reply
    /// so the wait can still complete (spec §5 "Cancellation/timeout").
    /// Returns `true` if this changed anything.
    pub fn fixup_failed_node(&mut self, node: NodeId) -> bool {
        self.clear(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(i: u32) -> NodeId {
        NodeId::new(i)
    }

    #[test]
    fn clears_as_replies_arrive() {
        let mut c = SignalCounter::new(WaitReason::GcpPrepare, vec![n(1), n(2), n(3)]);
        assert!(!c.done());
        assert!(c.clear(n(1)));
        assert!(!c.clear(n(1)), "duplicate clear is a no-op");
        assert!(c.clear(n(2)));
        assert!(!c.done());
        assert!(c.clear(n(3)));
        assert!(c.done());
    }

    #[test]
    fn failure_fixup_unblocks_wait() {
        let mut c = SignalCounter::new(WaitReason::GcpCommit, vec![n(1), n(2)]);
        c.clear(n(1));
        assert!(!c.done());
        assert!(c.fixup_failed_node(n(2)));
        assert!(c.done());
    }
}
