//! Error types for the control protocols.

use distco_types::{FragmentKey, NodeId};
use thiserror::Error;

/// Protocol errors — expected and recoverable. Callers retry after the
/// configured delay (spec §7.1).
#[derive(Error, Debug, PartialEq, Eq, Clone)]
pub enum ProtocolError {
    /// Target node is not alive.
    #[error("node {0} is not alive")]
    NodeNotAlive(NodeId),

    /// A take-over is already active in this node's group.
    #[error("a take-over is already active in this node group, retry later")]
    TakeOverAlreadyActive,

    /// A start (node-restart admission) is already in progress.
    #[error("a start is already in progress")]
    StartAlreadyInProgress,

    /// The verify/commit gate is blocked and the request was queued.
    #[error("commit is blocked, request queued")]
    CommitBlocked,

    /// No chain of log intervals covers the requested GCI range.
    #[error("no restorable log chain covers fragment {0} up to the requested GCI")]
    NoRestorableChain(FragmentKey),
}

/// Cluster-invariant violations — unrecoverable, escalate to `SYSTEM_ERROR`
/// (spec §7.3).
#[derive(Error, Debug, PartialEq, Eq, Clone)]
pub enum SystemError {
    #[error("node group {0} has no surviving members")]
    NodeGroupExtinct(distco_types::GroupId),

    #[error("fragment {0} has no restorable replica")]
    NoRestorableReplica(FragmentKey),

    #[error("master failure during node restart while being copied (node {0})")]
    MasterFailureDuringNodeRestart(NodeId),

    #[error("GCP stuck for more than the stuck threshold, cluster is declared stuck")]
    GcpStopped,

    #[error("replica crash-interval history overflowed on node {0}")]
    MaxCrashedReplicas(NodeId),
}

/// Top-level error for the control-protocol crate.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    System(#[from] SystemError),

    #[error(transparent)]
    Store(#[from] distco_store::Error),

    #[error(transparent)]
    Cluster(#[from] distco_cluster::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
