//! Error types for the sift-stat crate.
//!
//! Covers statfile storage, encoding of statfiles on disk, and failures
//! reported by tokenizers and classifiers.

use std::{io, path::PathBuf};

use thiserror::Error;

/// Top-level statistics error type.
#[derive(Debug, Error)]
pub enum StatError {
    /// I/O operation failed (statfile read/write/create).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Statfile does not exist on disk.
    #[error("Statfile not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Statfile was not opened in the pool before use.
    #[error("Statfile is not open: {}", .0.display())]
    NotOpen(PathBuf),

    /// Encoding or decoding a statfile failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// A tokenizer could not process its input.
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// A classifier failed to train.
    #[error("Classifier error: {0}")]
    Classifier(String),

    /// A statfile path expanded to something unsafe.
    #[error("Invalid statfile path: {0}")]
    InvalidPath(String),
}

/// Statfile serialization errors.
#[derive(Debug, Error)]
pub enum SerializationError {
    /// Bincode serialization failed.
    #[error("Bincode encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    /// Bincode deserialization failed.
    #[error("Bincode decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    /// The file decoded but is not a statfile we understand.
    #[error("Unsupported statfile version {0}")]
    Version(u32),
}

impl From<bincode::error::EncodeError> for StatError {
    fn from(err: bincode::error::EncodeError) -> Self {
        Self::Serialization(err.into())
    }
}

impl From<bincode::error::DecodeError> for StatError {
    fn from(err: bincode::error::DecodeError) -> Self {
        Self::Serialization(err.into())
    }
}

/// Specialized `Result` type for statistics operations.
pub type Result<T> = std::result::Result<T, StatError>;
