//! Errors shared by every protocol sift serves

use std::io;

use thiserror::Error;

/// A protocol refused the arguments it was configured with
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfiguration { field: String, reason: String },
}

/// Why a session ended abnormally
#[derive(Debug, Error)]
pub enum SessionError {
    /// The client broke the protocol badly enough to be disconnected
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection error: {0}")]
    Connection(#[from] io::Error),

    #[error("Session timed out after {0} seconds")]
    Timeout(u64),
}

impl SessionError {
    /// The client, not the connection or the daemon, caused the failure
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::Timeout(_))
    }
}

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Failed to bind to {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: io::Error,
    },

    /// A live process is still accepting on the unix socket path
    #[error("Socket already in use by running instance: {0}")]
    InUse(String),

    #[error("Failed to accept connection: {0}")]
    AcceptFailed(#[from] io::Error),
}
