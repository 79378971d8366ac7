//! Error types for scorch

use std::path::PathBuf;
use thiserror::Error;

/// Failures of the collation algorithm.
///
/// `path` locates the offending element inside a sample, e.g. `.image`,
/// `[1].label` or `<root>`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollateError {
    #[error("batch is empty: every sample was missing")]
    EmptyBatch,

    #[error("structural mismatch at {path}: {reason}")]
    StructuralMismatch { path: String, reason: String },

    #[error("unsupported type at {path}: cannot collate {type_name}")]
    UnsupportedType { path: String, type_name: String },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("batch {batch}: {source}")]
    Collate {
        batch: usize,
        #[source]
        source: CollateError,
    },

    #[error("failed to load sample {index}: {reason}")]
    Sample { index: usize, reason: String },

    #[error("cannot load checkpoint {}: {reason}", path.display())]
    CheckpointLoad { path: PathBuf, reason: String },

    #[error("gradient synchronization failed: {0}")]
    DistributedSync(String),

    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("no {kind} registered under '{name}'")]
    UnknownPlugin { kind: &'static str, name: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Attach the batch index to a collation failure.
    pub fn collate(batch: usize, source: CollateError) -> Self {
        Self::Collate { batch, source }
    }

    pub fn checkpoint(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CheckpointLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
