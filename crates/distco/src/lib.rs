//! # distco
//!
//! The distribution coordinator: cluster metadata and the control
//! protocols that keep a shared-nothing data node's fragment replicas,
//! checkpoints, and restart record consistent across the cluster
//! (spec §1, §2, §9).
//!
//! This crate wires together the leaf data components in `distco-store`,
//! membership in `distco-cluster`, and the protocol drivers in
//! `distco-protocol` into one [`Coordinator`], loaded from a
//! [`ClusterConfig`].

pub mod config;
pub mod coordinator;
pub mod error;

pub use config::ClusterConfig;
pub use coordinator::{Coordinator, Outbound, Signal};
pub use error::{Error, Result};
