//! # distco-protocol
//!
//! The control protocols that drive cluster-wide coordination (spec §2,
//! components C1-C5, M2):
//!
//! - [`gcp`] — the Global Checkpoint protocol: prepare/commit/save, the
//!   stuck-GCP monitor, and master-takeover merge (C1).
//! - [`lcp`] — the Local Checkpoint protocol: round scheduling, per-node
//!   throttling, completion handling, and the two-stage master-takeover
//!   merge (C2).
//! - [`takeover`] — fragment take-over and copy-fragment, master and slave
//!   state machines (C3).
//! - [`node_lifecycle`] — join permission, include-node fan-out, and
//!   dead-node completion aggregation (C4).
//! - [`verify_gate`] — the commit-admission queue (C5).
//! - [`recovery`] — replica/LCP/log-chain selection at system restart
//!   (spec §4.6).
//! - [`signal_counter`] — reply aggregation shared by every fan-out above
//!   (M2).

pub mod error;
pub mod gcp;
pub mod lcp;
pub mod node_lifecycle;
pub mod recovery;
pub mod signal_counter;
pub mod takeover;
pub mod verify_gate;

pub use error::{Error, ProtocolError, Result, SystemError};
pub use signal_counter::{SignalCounter, WaitReason};
pub use verify_gate::{RequestId, VerifyGate, VerifyOutcome};
