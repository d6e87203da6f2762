//! Fragment take-over and copy-fragment: master and slave state machines
//! (spec §4.5, component C3).

use distco_types::{FragmentKey, NodeId};
use serde::{Deserialize, Serialize};

use crate::signal_counter::{SignalCounter, WaitReason};

/// The master's (the node group's take-over coordinator's) view of one
/// fragment take-over, from selecting a starting node through committing
/// the new replica into `stored` (spec §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TakeoverMasterState {
    Idle,
    WaitStartTakeOver {
        fragment: FragmentKey,
        starting_node: NodeId,
    },
    StartCopy {
        fragment: FragmentKey,
        starting_node: NodeId,
        copy_node: NodeId,
        waiting: SignalCounter,
    },
    CopyFrag {
        fragment: FragmentKey,
        starting_node: NodeId,
        copy_node: NodeId,
        waiting: SignalCounter,
    },
    CommitCreate {
        fragment: FragmentKey,
        starting_node: NodeId,
        waiting: SignalCounter,
    },
    Ending {
        fragment: FragmentKey,
        starting_node: NodeId,
    },
}

impl TakeoverMasterState {
    pub fn start(fragment: FragmentKey, starting_node: NodeId) -> Self {
        TakeoverMasterState::WaitStartTakeOver {
            fragment,
            starting_node,
        }
    }

    /// Begins copying from `copy_node` once it has been selected from the
    /// fragment's surviving `stored` replicas.
    pub fn begin_copy(self, copy_node: NodeId) -> Self {
        match self {
            TakeoverMasterState::WaitStartTakeOver {
                fragment,
                starting_node,
            } => TakeoverMasterState::StartCopy {
                fragment,
                starting_node,
                copy_node,
                waiting: SignalCounter::new(WaitReason::CreateFrag, vec![copy_node, starting_node]),
            },
            other => other,
        }
    }

    pub fn on_create_frag_conf(self, from: NodeId) -> Self {
        match self {
            TakeoverMasterState::StartCopy {
                fragment,
                starting_node,
                copy_node,
                mut waiting,
            } => {
                waiting.clear(from);
                if waiting.done() {
                    TakeoverMasterState::CopyFrag {
                        fragment,
                        starting_node,
                        copy_node,
                        waiting: SignalCounter::new(WaitReason::CopyTab, vec![copy_node]),
                    }
                } else {
                    TakeoverMasterState::StartCopy {
                        fragment,
                        starting_node,
                        copy_node,
                        waiting,
                    }
                }
            }
            other => other,
        }
    }

    /// `PREPARE_COPY_FRAG_REF/CONF` completes: the copy node has sent the
    /// fragment's data to the starting node. The commit-create step is
    /// guarded so only one fragment per node group switches its primary
    /// replica set at a time (spec §4.5 "switchPrimaryMutex").
    pub fn on_copy_frag_conf(self, from: NodeId) -> Self {
        match self {
            TakeoverMasterState::CopyFrag {
                fragment,
                starting_node,
                waiting,
                ..
            } if waiting.nodes().any(|n| n == from) => TakeoverMasterState::CommitCreate {
                fragment,
                starting_node,
                waiting: SignalCounter::new(WaitReason::UpdateTo, vec![starting_node]),
            },
            other => other,
        }
    }

    pub fn on_commit_create_conf(self, from: NodeId) -> Self {
        match self {
            TakeoverMasterState::CommitCreate {
                fragment,
                starting_node,
                mut waiting,
            } => {
                waiting.clear(from);
                if waiting.done() {
                    TakeoverMasterState::Ending {
                        fragment,
                        starting_node,
                    }
                } else {
                    TakeoverMasterState::CommitCreate {
                        fragment,
                        starting_node,
                        waiting,
                    }
                }
            }
            other => other,
        }
    }

    pub fn finish(self) -> Self {
        match self {
            TakeoverMasterState::Ending { .. } => TakeoverMasterState::Idle,
            other => other,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, TakeoverMasterState::Idle)
    }

    pub fn fragment(&self) -> Option<FragmentKey> {
        match self {
            TakeoverMasterState::Idle => None,
            TakeoverMasterState::WaitStartTakeOver { fragment, .. }
            | TakeoverMasterState::StartCopy { fragment, .. }
            | TakeoverMasterState::CopyFrag { fragment, .. }
            | TakeoverMasterState::CommitCreate { fragment, .. }
            | TakeoverMasterState::Ending { fragment, .. } => Some(*fragment),
        }
    }
}

/// What an individual node (starting or copy) believes about an ongoing
/// take-over it is participating in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TakeoverSlaveState {
    Idle,
    Started,
    CreatePrepare,
    CopyFragCompleted,
    CreateCommit,
    CopyCompleted,
}

impl TakeoverSlaveState {
    pub fn advance(self) -> Self {
        use TakeoverSlaveState::*;
        match self {
            Idle => Started,
            Started => CreatePrepare,
            CreatePrepare => CopyFragCompleted,
            CopyFragCompleted => CreateCommit,
            CreateCommit => CopyCompleted,
            CopyCompleted => Idle,
        }
    }
}

/// What to do when a node fails mid-take-over (spec §4.5 "Interruption
/// policy"): the starting node failing voids the whole attempt, while the
/// copy node failing just means a different surviving replica is picked
/// for the same fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeoverInterruption {
    EndTakeOver,
    ReselectCopyNode,
    NoOp,
}

pub fn interruption_policy(
    failed: NodeId,
    starting_node: NodeId,
    copy_node: Option<NodeId>,
) -> TakeoverInterruption {
    if failed == starting_node {
        TakeoverInterruption::EndTakeOver
    } else if copy_node == Some(failed) {
        TakeoverInterruption::ReselectCopyNode
    } else {
        TakeoverInterruption::NoOp
    }
}

/// Picks a copy-source node for a take-over: the fragment's current
/// primary if alive, else any alive `stored` replica (spec §4.5 "Copy node
/// selection").
pub fn select_copy_node(primary: NodeId, stored: &[NodeId], alive: &[NodeId]) -> Option<NodeId> {
    if alive.contains(&primary) {
        return Some(primary);
    }
    stored.iter().copied().find(|n| alive.contains(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(i: u32) -> NodeId {
        NodeId::new(i)
    }

    fn key() -> FragmentKey {
        FragmentKey {
            table: distco_types::TableId::new(1),
            fragment: distco_types::FragmentId::new(0),
        }
    }

    #[test]
    fn master_state_walks_through_to_ending() {
        let state = TakeoverMasterState::start(key(), n(5));
        let state = state.begin_copy(n(2));
        let state = state.on_create_frag_conf(n(2));
        let state = state.on_create_frag_conf(n(5));
        assert!(matches!(state, TakeoverMasterState::CopyFrag { .. }));
        let state = state.on_copy_frag_conf(n(2));
        assert!(matches!(state, TakeoverMasterState::CommitCreate { .. }));
        let state = state.on_commit_create_conf(n(5));
        assert!(matches!(state, TakeoverMasterState::Ending { .. }));
        assert_eq!(state.fragment(), Some(key()));
        assert!(state.finish().is_idle());
    }

    #[test]
    fn slave_state_cycles_back_to_idle() {
        let mut s = TakeoverSlaveState::Idle;
        for expected in [
            TakeoverSlaveState::Started,
            TakeoverSlaveState::CreatePrepare,
            TakeoverSlaveState::CopyFragCompleted,
            TakeoverSlaveState::CreateCommit,
            TakeoverSlaveState::CopyCompleted,
            TakeoverSlaveState::Idle,
        ] {
            s = s.advance();
            assert_eq!(s, expected);
        }
    }

    #[test]
    fn starting_node_failure_ends_takeover_copy_node_failure_reselects() {
        assert_eq!(
            interruption_policy(n(5), n(5), Some(n(2))),
            TakeoverInterruption::EndTakeOver
        );
        assert_eq!(
            interruption_policy(n(2), n(5), Some(n(2))),
            TakeoverInterruption::ReselectCopyNode
        );
        assert_eq!(
            interruption_policy(n(9), n(5), Some(n(2))),
            TakeoverInterruption::NoOp
        );
    }

    #[test]
    fn copy_node_prefers_alive_primary_else_any_alive_stored_replica() {
        let stored = vec![n(1), n(2), n(3)];
        assert_eq!(select_copy_node(n(1), &stored, &[n(1), n(2)]), Some(n(1)));
        assert_eq!(select_copy_node(n(1), &stored, &[n(2), n(3)]), Some(n(2)));
        assert_eq!(select_copy_node(n(1), &stored, &[]), None);
    }
}
