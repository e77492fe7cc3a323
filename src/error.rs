use crate::types::Rank;

pub type Result<T> = std::result::Result<T, CommError>;

#[derive(Debug, thiserror::Error)]
pub enum CommError {
    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    #[error("{algorithm} requires a power-of-2 number of processes, got {nprocs}")]
    NotPowerOfTwo {
        algorithm: &'static str,
        nprocs: usize,
    },

    #[error("invalid rank {rank}: communicator size is {size}")]
    InvalidRank { rank: Rank, size: u32 },

    #[error("invalid model {model}: there are {num_models} models")]
    InvalidModel { model: usize, num_models: usize },

    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("peer {rank} disconnected unexpectedly")]
    PeerDisconnected { rank: Rank },

    #[error("{operation} failed at rank {rank}: {reason}")]
    CollectiveFailed {
        operation: &'static str,
        rank: Rank,
        reason: String,
    },

    #[error("message truncated: receive buffer holds {capacity} bytes, message has {actual}")]
    Truncated { capacity: usize, actual: usize },

    #[error(
        "collective buffer slot {slot} requested for size {size} but only {available} slots exist"
    )]
    BufferSlotOutOfOrder {
        size: usize,
        slot: usize,
        available: usize,
    },

    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("message decode failed: {0}")]
    DecodeFailed(String),

    #[error("topology discovery failed: {reason}")]
    Topology { reason: String },
}

impl CommError {
    /// Create a `Config` error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Create a `Transport` error with just a message.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a `Transport` error with a message and a source error.
    pub fn transport_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }
}
