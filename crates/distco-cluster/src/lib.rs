//! # distco-cluster
//!
//! Node registry and membership for the distribution coordinator (spec §2,
//! M1 "Node registry"): node status, alive/dead/starting lists, node
//! groups, and hot-spare designation.
//!
//! The signal-driven parts of node lifecycle (join-permission fan-out,
//! include-node broadcast, dead-node `NF_COMPLETEREP` aggregation) live in
//! `distco-protocol`'s node-lifecycle driver (C4), which depends on this
//! crate for the underlying registry.

pub mod error;
pub mod group;
pub mod registry;

pub use error::{Error, Result};
pub use group::{form_node_groups, NodeGroup};
pub use registry::{FailureHandlingSteps, FailureStep, Node, NodeRegistry};
