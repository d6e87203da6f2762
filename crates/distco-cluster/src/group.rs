//! Node groups: the replica-count-sized sets of nodes that together hold
//! the replicas of every fragment assigned to the group (spec §3 "NodeGroup").

use distco_types::{GroupId, NodeId};
use serde::{Deserialize, Serialize};

/// An ordered set of nodes holding one replica set, plus the round-robin
/// cursor used to pick the next preferred primary and the take-over
/// throttle (spec §4.5: "at most one active take-over per node group").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeGroup {
    pub id: GroupId,
    pub nodes: Vec<NodeId>,
    primary_cursor: usize,
    active_take_over: bool,
}

impl NodeGroup {
    pub fn new(id: GroupId, nodes: Vec<NodeId>) -> Self {
        Self {
            id,
            nodes,
            primary_cursor: 0,
            active_take_over: false,
        }
    }

    /// Picks the next preferred-primary node in round-robin order and
    /// advances the cursor.
    pub fn next_preferred_primary(&mut self) -> Option<NodeId> {
        if self.nodes.is_empty() {
            return None;
        }
        let node = self.nodes[self.primary_cursor % self.nodes.len()];
        self.primary_cursor = (self.primary_cursor + 1) % self.nodes.len();
        Some(node)
    }

    pub fn has_active_take_over(&self) -> bool {
        self.active_take_over
    }

    /// Claims the group's single take-over slot. Returns `false` if one is
    /// already in progress — the caller must retry later (spec §4.5: 5s retry).
    #[must_use]
    pub fn begin_take_over(&mut self) -> bool {
        if self.active_take_over {
            false
        } else {
            self.active_take_over = true;
            true
        }
    }

    pub fn end_take_over(&mut self) {
        self.active_take_over = false;
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }
}

/// Packs a flat node list into node groups of `replica_count` nodes each;
/// any remainder becomes hot spares. Used once at initial cluster start
/// (spec §4.1); at every subsequent restart, groups are loaded from the
/// sysfile instead.
pub fn form_node_groups(nodes: &[NodeId], replica_count: usize) -> (Vec<NodeGroup>, Vec<NodeId>) {
    assert!(replica_count > 0, "replica count must be positive");
    let mut groups = Vec::new();
    let mut chunks = nodes.chunks(replica_count);
    let mut spares = Vec::new();
    let mut next_id = 0u32;
    for chunk in &mut chunks {
        if chunk.len() == replica_count {
            groups.push(NodeGroup::new(GroupId::new(next_id), chunk.to_vec()));
            next_id += 1;
        } else {
            spares.extend_from_slice(chunk);
        }
    }
    (groups, spares)
}
