//! Error types for node registry and membership operations.

use distco_types::NodeId;
use thiserror::Error;

/// Cluster membership errors.
#[derive(Error, Debug)]
pub enum Error {
    /// Referenced a node that was never configured.
    #[error("node {0} is not a configured member of this cluster")]
    UnknownNode(NodeId),

    /// A node group lost every live member — the whole cluster must fail
    /// (spec §4.1, `EXIT_LOST_NODE_GROUP`).
    #[error("node group {0} has no surviving members, cluster failure")]
    NodeGroupExtinct(distco_types::GroupId),

    /// A `failureNumber` arrived out of order.
    #[error("stale failure number {stale} for node {node} (current {current})")]
    StaleFailureNumber {
        node: NodeId,
        stale: u32,
        current: u32,
    },
}

/// Result type for cluster operations.
pub type Result<T> = std::result::Result<T, Error>;
