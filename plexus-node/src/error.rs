use std::path::PathBuf;

use plexus_core::{Register, RegisterError};
use thiserror::Error;

/// Error surface for the register store, the access service and the socket
/// protocol.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The durable register file exists but cannot be decoded.
    #[error("failed to parse register file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("register error: {0}")]
    Register(#[from] RegisterError),

    /// The node answered, but refused the access. `current` is the register
    /// as it stands after the refusal, when it exists.
    #[error("register access rejected: {error}")]
    Rejected {
        error: RegisterError,
        current: Option<Box<Register>>,
    },

    #[error("node protocol error: {0}")]
    Protocol(String),

    #[error("node is not running (socket missing: {socket})")]
    NodeNotRunning { socket: PathBuf },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> NodeError {
    NodeError::Io {
        path: path.into(),
        source,
    }
}
