use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DhtError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("routing table {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("routing table {path} is {found} bytes, expected {expected}; migrate it manually")]
    SizeMismatch {
        path: PathBuf,
        found: u64,
        expected: u64,
    },

    #[error("routing table depth must be 2 or 3, got {0}")]
    InvalidDepth(usize),

    #[error("invalid node id length")]
    InvalidNodeId,

    #[error("ipv6 is not supported")]
    Ipv6Unsupported,
}

/// Why a pursuit could not be started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PursuitError {
    #[error("every pursuit slot is in use")]
    Full,
}
