//! Error types for control operations

use std::path::PathBuf;

use sift_common::error::SessionError;
use thiserror::Error;

/// Transport failures while talking to a control client
///
/// Every one of these ends the session.
#[derive(Debug, Error)]
pub enum ControlError {
    /// I/O error on the client connection
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A command line exceeded the line limit
    #[error("Line exceeds {0} bytes")]
    LineTooLong(usize),

    /// The client closed the connection
    #[error("Connection closed")]
    Closed,

    /// The client was idle for too long
    #[error("Timed out after {0} seconds")]
    Timeout(u64),
}

impl From<ControlError> for SessionError {
    fn from(err: ControlError) -> Self {
        match err {
            ControlError::Io(err) => Self::Connection(err),
            ControlError::Timeout(secs) => Self::Timeout(secs),
            err @ (ControlError::LineTooLong(_) | ControlError::Closed) => {
                Self::Protocol(err.to_string())
            }
        }
    }
}

/// Reasons a `learn` command is refused before any payload is read
///
/// The display form of each variant is the line sent back to the client.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LearnRejection {
    #[error("learn command requires at least two arguments: stat filename and its size")]
    MissingArguments,

    #[error("learn size is invalid")]
    InvalidSize,

    #[error("learn size is too large")]
    TooLarge,

    #[error("statfile {0} is not defined")]
    UnknownStatfile(String),

    #[error("tokenizer is not defined")]
    UnknownTokenizer,

    #[error("recipient is not defined")]
    MissingRecipient,

    #[error("from is not defined")]
    MissingFrom,

    #[error("unknown learn flag {0}")]
    UnknownFlag(String),

    #[error("invalid statfile path {0}")]
    InvalidPath(String),

    #[error("cannot create statfile {}", .0.display())]
    CannotCreate(PathBuf),

    #[error("cannot open statfile {}", .0.display())]
    CannotOpen(PathBuf),
}

/// Reasons a received learn payload could not be trained on
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LearnFailure {
    #[error("learn fail, tokenizer error")]
    Tokenizer,

    #[error("learn fail, classifier error")]
    Classifier,
}

/// Result type for control operations
pub type Result<T> = std::result::Result<T, ControlError>;
