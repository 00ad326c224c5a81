use std::path::PathBuf;
use thiserror::Error;

use crate::codec::CodecError;

#[derive(Error, Debug)]
pub enum SweepError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to run depot client '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to parse P4 tagged output! Expected {expected} tagged values, but received {received} values.")]
    Protocol { expected: usize, received: usize },

    #[error("Unable to get client root from Perforce! Open P4V and click on Connection -> Environment Settings, enable \"Use current connection for environment settings\" and click OK.")]
    Workspace,

    #[error("Unable to sweep path '{path}' because the directory '{}' was not found. Specify a path relative to the client root, e.g. 'Engine/Binaries'.", .local.display())]
    SubpathNotFound { path: String, local: PathBuf },

    #[error("Failed to list local files under {}: {message}", .root.display())]
    Scan { root: PathBuf, message: String },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for SweepError {
    fn from(err: tokio::task::JoinError) -> Self {
        SweepError::Task(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SweepError>;
