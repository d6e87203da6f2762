//! Error types for table/fragment/replica storage and sysfile persistence.

use distco_types::{FragmentKey, TableId};
use thiserror::Error;

/// Storage errors.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error while reading or writing a persisted record.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A sysfile copy failed to decode.
    #[error("sysfile copy is corrupt: {0}")]
    CorruptSysfile(String),

    /// Both sysfile copies are unreadable — restart is impossible
    /// (spec §6, `EXIT_SR_FAILURE`).
    #[error("both sysfile copies are unreadable, restart impossible")]
    RestartImpossible,

    /// No table with this id exists.
    #[error("table {0} not found")]
    TableNotFound(TableId),

    /// No fragment with this key exists.
    #[error("fragment {0} not found")]
    FragmentNotFound(FragmentKey),

    /// A replica's crashed-interval history overflowed
    /// (spec §6, `EXIT_MAX_CRASHED_REPLICAS`).
    #[error("replica on node {0} exceeded the maximum tracked crashed-replica intervals")]
    MaxCrashedReplicas(distco_types::NodeId),

    /// No restorable replica could be found for a fragment
    /// (spec §6, `EXIT_NO_RESTORABLE_REPLICA`).
    #[error("fragment {0} has no restorable replica")]
    NoRestorableReplica(FragmentKey),

    /// A table file page failed to decode.
    #[error("table file is corrupt: {0}")]
    CorruptTableFile(String),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, Error>;
