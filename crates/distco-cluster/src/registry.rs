//! Node registry: identity, status and membership lists (spec §3 "Node",
//! §4.1).

use distco_types::{FragmentKey, GroupId, NodeId, NodeStatus, MAX_LCP_SLOTS_PER_NODE};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::group::NodeGroup;

/// Per-block completion flags for one failed node's `NF_COMPLETEREP`
/// aggregation (spec §7: LQH/TC/DICT/DIH each report independently).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureHandlingSteps {
    pub lqh: bool,
    pub tc: bool,
    pub dict: bool,
    pub dih: bool,
}

impl FailureHandlingSteps {
    pub fn all_done(self) -> bool {
        self.lqh && self.tc && self.dict && self.dih
    }
}

/// One of the four local blocks that must each separately acknowledge a
/// node's death (`NF_COMPLETEREP`) before the node is considered fully
/// gone (spec §3 "Lifecycles", §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStep {
    Lqh,
    Tc,
    Dict,
    Dih,
}

/// A node's record in the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub node_status: NodeStatus,
    pub active_status: distco_types::ActiveStatus,
    pub node_group: Option<GroupId>,
    pub use_in_transactions: bool,
    pub allow_node_start: bool,
    pub copy_completed: bool,
    pub include_in_dih_lcp: bool,
    started_chkpt: [Option<FragmentKey>; MAX_LCP_SLOTS_PER_NODE],
    queued_chkpt: [Option<FragmentKey>; MAX_LCP_SLOTS_PER_NODE],
    pub failure_steps: FailureHandlingSteps,
}

impl Node {
    pub fn new(id: NodeId, node_group: Option<GroupId>) -> Self {
        Self {
            id,
            node_status: NodeStatus::NotInCluster,
            active_status: distco_types::ActiveStatus::NotDefined,
            node_group,
            use_in_transactions: false,
            allow_node_start: true,
            copy_completed: false,
            include_in_dih_lcp: false,
            started_chkpt: [None; MAX_LCP_SLOTS_PER_NODE],
            queued_chkpt: [None; MAX_LCP_SLOTS_PER_NODE],
            failure_steps: FailureHandlingSteps::default(),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.node_status == NodeStatus::Alive
    }

    pub fn started_count(&self) -> usize {
        self.started_chkpt.iter().filter(|s| s.is_some()).count()
    }

    pub fn queued_count(&self) -> usize {
        self.queued_chkpt.iter().filter(|s| s.is_some()).count()
    }

    pub fn has_room_for_lcp_order(&self) -> bool {
        self.started_count() < MAX_LCP_SLOTS_PER_NODE || self.queued_count() < MAX_LCP_SLOTS_PER_NODE
    }

    /// Records that a fragment checkpoint order was issued to this node,
    /// filling a started slot if free, else a queued slot.
    #[must_use]
    pub fn push_lcp_order(&mut self, key: FragmentKey) -> bool {
        if let Some(slot) = self.started_chkpt.iter_mut().find(|s| s.is_none()) {
            *slot = Some(key);
            return true;
        }
        if let Some(slot) = self.queued_chkpt.iter_mut().find(|s| s.is_none()) {
            *slot = Some(key);
            return true;
        }
        false
    }

    /// Completes one fragment checkpoint, freeing its slot and promoting a
    /// queued entry into the started set, if any.
    pub fn complete_lcp_order(&mut self, key: FragmentKey) {
        if let Some(slot) = self.started_chkpt.iter_mut().find(|s| **s == Some(key)) {
            *slot = None;
        } else if let Some(slot) = self.queued_chkpt.iter_mut().find(|s| **s == Some(key)) {
            *slot = None;
        }
        if let Some(empty) = self.started_chkpt.iter_mut().find(|s| s.is_none()) {
            if let Some(queued) = self.queued_chkpt.iter_mut().find(|s| s.is_some()) {
                *empty = queued.take();
            }
        }
    }
}

/// Node registry: alive/dead/starting lists plus node groups.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeRegistry {
    nodes: std::collections::BTreeMap<u32, Node>,
    groups: Vec<NodeGroup>,
    last_failure_number: u32,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, node: Node) {
        self.nodes.insert(node.id.get(), node);
    }

    pub fn set_groups(&mut self, groups: Vec<NodeGroup>) {
        self.groups = groups;
    }

    pub fn groups(&self) -> &[NodeGroup] {
        &self.groups
    }

    pub fn groups_mut(&mut self) -> &mut [NodeGroup] {
        &mut self.groups
    }

    pub fn group_mut(&mut self, id: GroupId) -> Option<&mut NodeGroup> {
        self.groups.iter_mut().find(|g| g.id == id)
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(&id.get()).ok_or(Error::UnknownNode(id))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(&id.get()).ok_or(Error::UnknownNode(id))
    }

    pub fn alive_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| n.is_alive())
            .map(|n| n.id)
            .collect()
    }

    pub fn dead_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| n.node_status == NodeStatus::Dead)
            .map(|n| n.id)
            .collect()
    }

    /// The lowest-id alive node is always the master (spec Glossary).
    pub fn master(&self) -> Option<NodeId> {
        self.alive_nodes().into_iter().min()
    }

    /// Designates one alive node per group beyond the replica count as a
    /// hot spare (spec §4.1). `spares` are the nodes left over by
    /// [`crate::group::form_node_groups`].
    pub fn designate_hot_spares(&mut self, spares: &[NodeId]) -> Result<()> {
        for &id in spares {
            let node = self.node_mut(id)?;
            node.active_status = distco_types::ActiveStatus::HotSpare;
        }
        Ok(())
    }

    /// Alive nodes still carrying the `HotSpare` designation — candidate
    /// starting nodes for a fragment take-over (spec §4.5 "starting node
    /// selection").
    pub fn alive_hot_spares(&self) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| n.is_alive() && n.active_status == distco_types::ActiveStatus::HotSpare)
            .map(|n| n.id)
            .collect()
    }

    /// Applies a `NODE_FAILREP`: marks the failed nodes `DiedNow`, clears
    /// their transaction/LCP participation flags, and resets their
    /// per-block failure-handling steps. Returns [`Error::NodeGroupExtinct`]
    /// if any node group is left with zero live members — the cluster must
    /// fail, not limp on with an ambiguous partition (spec §4.1, §7.3).
    /// The node only reaches `Dead` once every local block has
    /// acknowledged via [`Self::record_failure_step`].
    pub fn apply_node_failure(&mut self, failure_number: u32, failed: &[NodeId]) -> Result<()> {
        if failure_number <= self.last_failure_number && self.last_failure_number != 0 {
            return Err(Error::StaleFailureNumber {
                node: failed.first().copied().unwrap_or(NodeId::new(0)),
                stale: failure_number,
                current: self.last_failure_number,
            });
        }
        for &id in failed {
            let node = self.node_mut(id)?;
            node.use_in_transactions = false;
            node.include_in_dih_lcp = false;
            node.node_status = NodeStatus::DiedNow;
            node.failure_steps = FailureHandlingSteps::default();
        }
        self.last_failure_number = failure_number;

        for group in &self.groups {
            let any_alive = group
                .nodes
                .iter()
                .any(|&n| self.nodes.get(&n.get()).is_some_and(Node::is_alive));
            if !any_alive {
                return Err(Error::NodeGroupExtinct(group.id));
            }
        }
        Ok(())
    }

    /// Records one local block's `NF_COMPLETEREP` for a node already marked
    /// `DiedNow`/`Dying`. The node moves to `Dying` on the first step
    /// recorded and to `Dead` once every step has reported, following
    /// `Alive -> DiedNow -> Dying -> Dead` (spec §3 "Lifecycles"). Returns
    /// whether the node just became fully `Dead`.
    pub fn record_failure_step(&mut self, id: NodeId, step: FailureStep) -> Result<bool> {
        let node = self.node_mut(id)?;
        match step {
            FailureStep::Lqh => node.failure_steps.lqh = true,
            FailureStep::Tc => node.failure_steps.tc = true,
            FailureStep::Dict => node.failure_steps.dict = true,
            FailureStep::Dih => node.failure_steps.dih = true,
        }
        if node.node_status == NodeStatus::DiedNow {
            node.node_status = NodeStatus::Dying;
        }
        if node.failure_steps.all_done() {
            node.node_status = NodeStatus::Dead;
            return Ok(true);
        }
        Ok(false)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
