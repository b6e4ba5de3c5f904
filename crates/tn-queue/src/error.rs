//! Error types for the queue, codec and counter.

use std::path::PathBuf;
use thiserror::Error;
use tn_common::{Classify, FailureClass};

/// Errors from durable storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The volume was not mounted when the store was opened. Permanent for
    /// the lifetime of the process.
    #[error("storage volume {volume} is not mounted")]
    Unavailable { volume: PathBuf },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("lifetime counter at {path} is corrupt: {content:?}")]
    CounterCorrupt { path: PathBuf, content: String },

    #[error("lifetime counter exhausted")]
    CounterExhausted,
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the medium is permanently unavailable.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable { .. })
    }
}

impl Classify for StoreError {
    fn class(&self) -> FailureClass {
        match self {
            StoreError::Unavailable { .. } => FailureClass::StorageUnavailable,
            StoreError::Io { .. } | StoreError::CounterCorrupt { .. } | StoreError::CounterExhausted => {
                FailureClass::Storage
            }
        }
    }
}

/// Errors from encoding a record into a line.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("field {index} contains the reserved delimiter ';': {value:?}")]
    ReservedDelimiter { index: usize, value: String },

    #[error("field {index} contains a line break")]
    LineBreak { index: usize },

    #[error("encoded record is {len} bytes, limit is {max}")]
    TooLong { len: usize, max: usize },
}

impl Classify for EncodeError {
    fn class(&self) -> FailureClass {
        FailureClass::Encoding
    }
}

/// Errors from decoding a persisted line.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("expected at least {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("field {field} is not numeric: {value:?}")]
    Numeric { field: String, value: String },

    /// Longer than any line `encode` writes; the tail scan used during
    /// recovery could not see it.
    #[error("line is {len} bytes, limit is {max}")]
    TooLong { len: usize, max: usize },
}

impl Classify for DecodeError {
    fn class(&self) -> FailureClass {
        FailureClass::Decode
    }
}
