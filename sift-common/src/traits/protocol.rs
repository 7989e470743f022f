use std::{
    fmt::{self, Debug, Display, Formatter},
    net::SocketAddr,
    path::PathBuf,
};

use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    Signal,
    error::{ProtocolError, SessionError},
    listener::ListenAddr,
};

/// Anything a session can be run over: TCP streams, unix streams, or an
/// in-memory duplex in tests.
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static> Connection for T {}

/// Who is on the other end of a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Peer {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

impl Display for Peer {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(address) => write!(f, "{address}"),
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

pub trait SessionHandler {
    fn run(
        self,
        signal: tokio::sync::broadcast::Receiver<Signal>,
    ) -> impl std::future::Future<Output = Result<(), SessionError>> + Send;
}

pub trait Protocol: Default + Send + Sync + 'static {
    type Session<S: Connection>: SessionHandler + Send + 'static;
    type Args: Default + Clone + Debug + Send + Sync + for<'a> Deserialize<'a>;

    fn handle<S: Connection>(&self, stream: S, peer: Peer, args: Self::Args)
    -> Self::Session<S>;

    ///
    /// Validate the arguments being provided to the protocol
    ///
    /// # Errors
    /// This really depends on what needs to be done in order to validate the protocols arguments.
    ///
    fn validate(&mut self, args: &mut Self::Args) -> Result<(), ProtocolError>;

    /// Called once a listener for this protocol is bound and accepting
    fn bound(&self, _socket: &ListenAddr, _args: &Self::Args) {}

    fn ty() -> &'static str;
}
