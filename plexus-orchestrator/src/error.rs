use std::path::PathBuf;

use plexus_core::RegisterError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("invalid group specification: {0}")]
    InvalidSpec(String),

    #[error("failed to parse group specification at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A register literal in `scope` (a process name, or `group`) is malformed.
    #[error("invalid register assignment in '{scope}': {source}")]
    Assignment {
        scope: String,
        #[source]
        source: RegisterError,
    },

    #[error("failed to launch process '{process}': {source}")]
    ProcessLaunchFailure {
        process: String,
        #[source]
        source: std::io::Error,
    },

    #[error("process '{process}' crashed: {status}")]
    ProcessCrash { process: String, status: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("group controller exited unexpectedly: {0}")]
    ChannelClosed(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> OrchestratorError {
    OrchestratorError::Io {
        path: path.into(),
        source,
    }
}
