//! Node-lifecycle driver: join permission, include-node fan-out, and
//! dead-node completion aggregation (spec §4.1, component C4).

use distco_types::NodeId;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::signal_counter::{SignalCounter, WaitReason};

/// One node restart admission in flight: only one at a time is permitted
/// cluster-wide (spec §4.1 "Start permission").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum StartPermissionState {
    #[default]
    Idle,
    Requested {
        node: NodeId,
        waiting: SignalCounter,
    },
    Granted {
        node: NodeId,
    },
}

impl StartPermissionState {
    /// `INCL_NODEREQ`-equivalent admission check: refuses a second
    /// concurrent restart request.
    pub fn request(
        &mut self,
        node: NodeId,
        alive: impl IntoIterator<Item = NodeId>,
    ) -> Result<(), ProtocolError> {
        if !matches!(self, StartPermissionState::Idle) {
            return Err(ProtocolError::StartAlreadyInProgress);
        }
        *self = StartPermissionState::Requested {
            node,
            waiting: SignalCounter::new(WaitReason::StartInfo, alive),
        };
        Ok(())
    }

    /// Records one node's vote; once every alive node has voted, the
    /// restarting node is admitted.
    pub fn on_vote(&mut self, from: NodeId) -> Option<NodeId> {
        if let StartPermissionState::Requested { node, waiting } = self {
            waiting.clear(from);
            if waiting.done() {
                let node = *node;
                *self = StartPermissionState::Granted { node };
                return Some(node);
            }
        }
        None
    }

    pub fn finish(&mut self) {
        *self = StartPermissionState::Idle;
    }
}

/// Broadcasting a newly-started node's inclusion to the rest of the
/// cluster (spec §4.1 "Include node"): every alive node must `INCL_NODECONF`
/// before the new node is treated as a full participant in subsequent GCP
/// and LCP rounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncludeNodeFanout {
    node: NodeId,
    waiting: SignalCounter,
}

impl IncludeNodeFanout {
    pub fn start(node: NodeId, alive: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            node,
            waiting: SignalCounter::new(WaitReason::InclNode, alive),
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn on_conf(&mut self, from: NodeId) -> bool {
        self.waiting.clear(from);
        self.waiting.done()
    }
}

/// Aggregates `NF_COMPLETEREP` from every block that must acknowledge a
/// node's death before the distribution coordinator marks it fully gone
/// (spec §4.1 "Dead node completion"). Unlike the other fan-outs this
/// waits on block identifiers local to this node, not remote nodes; it
/// reuses [`SignalCounter`]'s bitset machinery with block ids encoded as
/// [`NodeId`] for lack of a dedicated block-id newtype.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadNodeCompletion {
    node: NodeId,
    waiting: SignalCounter,
}

impl DeadNodeCompletion {
    pub fn start(node: NodeId, reporting_blocks: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            node,
            waiting: SignalCounter::new(WaitReason::StopMe, reporting_blocks),
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn on_complete(&mut self, from_block: NodeId) -> bool {
        self.waiting.clear(from_block);
        self.waiting.done()
    }
}
