//! Top-level error type for the distribution coordinator.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to read cluster config at {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse cluster config at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid cluster config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Store(#[from] distco_store::Error),

    #[error(transparent)]
    Cluster(#[from] distco_cluster::Error),

    #[error(transparent)]
    Protocol(#[from] distco_protocol::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
