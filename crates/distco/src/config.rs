//! Cluster configuration: node list, replica factor, and the GCP/LCP
//! timer deltas (spec §9 "Configuration").

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The whole cluster's static configuration, loaded once at start-up from
/// a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub nodes: NodesConfig,
    pub checkpoint: CheckpointConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodesConfig {
    /// Cluster-wide node ids, 1-based (spec §3 "NodeId").
    pub ids: Vec<u32>,
    /// Number of replicas per fragment; also the node-group size
    /// (spec §4.1 "Node groups").
    pub replica_count: u8,
}

impl Default for NodesConfig {
    fn default() -> Self {
        Self {
            ids: vec![1, 2],
            replica_count: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// `clcpDelay`: an LCP round starts once the soft timer reaches
    /// `2^clcp_delay` milliseconds (spec §4.4 "Trigger").
    pub clcp_delay: u32,
    /// Consecutive unchanged 100ms samples before a stalled GCP is
    /// declared stuck (spec §4.3 "Monitor").
    pub gcp_stuck_samples: u32,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            clcp_delay: 16,
            gcp_stuck_samples: distco_protocol::gcp::GCP_STUCK_SAMPLE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl ClusterConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|source| Error::ConfigParse {
            path: PathBuf::from("<string>"),
            source,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.nodes.ids.is_empty() {
            return Err(Error::InvalidConfig("nodes.ids must not be empty".into()));
        }
        if self.nodes.replica_count == 0 {
            return Err(Error::InvalidConfig(
                "nodes.replica_count must be at least 1".into(),
            ));
        }
        if (self.nodes.ids.len() as u64) < self.nodes.replica_count as u64 {
            return Err(Error::InvalidConfig(
                "fewer nodes than the configured replica count".into(),
            ));
        }
        Ok(())
    }
}
