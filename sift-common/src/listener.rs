#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::{
    fmt::{self, Display, Formatter},
    path::{Path, PathBuf},
    time::Duration,
};

use futures_util::future::join_all;
use serde::Deserialize;
use tokio::{
    net::{TcpListener, TcpStream, UnixListener, UnixStream},
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};

use crate::{
    Signal,
    error::{ListenerError, ProtocolError},
    internal,
    traits::protocol::{Connection, Peer, Protocol, SessionHandler},
};

/// How long in-flight sessions get to finish once shutdown is requested
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Pause after `failures` consecutive accept errors, doubling up to a second
fn accept_backoff(failures: u32) -> Duration {
    ACCEPT_BACKOFF_MIN
        .saturating_mul(1 << failures.saturating_sub(1).min(16))
        .min(ACCEPT_BACKOFF_MAX)
}

/// Where a listener accepts connections
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum ListenAddr {
    /// `host:port`
    Tcp(String),
    /// Path of a unix domain socket
    Unix(PathBuf),
}

impl Display for ListenAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(address) => f.write_str(address),
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// A bound, listening socket
#[derive(Debug)]
pub enum Bound {
    Tcp(TcpListener),
    Unix(UnixListener, PathBuf),
}

enum Accepted {
    Tcp(TcpStream, Peer),
    Unix(UnixStream, Peer),
}

impl Bound {
    async fn accept(&self) -> Result<Accepted, ListenerError> {
        Ok(match self {
            Self::Tcp(listener) => {
                let (stream, address) = listener.accept().await?;
                Accepted::Tcp(stream, Peer::Tcp(address))
            }
            Self::Unix(listener, path) => {
                let (stream, _) = listener.accept().await?;
                Accepted::Unix(stream, Peer::Unix(path.clone()))
            }
        })
    }

    /// The local TCP address, if this is a TCP listener
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        match self {
            Self::Tcp(listener) => listener.local_addr().ok(),
            Self::Unix(..) => None,
        }
    }

    async fn close(self) {
        if let Self::Unix(listener, path) = self {
            drop(listener);
            if path.exists() {
                tracing::debug!("Removing socket file: {}", path.display());
                let _ = tokio::fs::remove_file(&path).await;
            }
        }
    }
}

#[derive(Deserialize)]
pub struct Listener<Proto: Protocol> {
    #[serde(skip)]
    handler: Proto,
    socket: ListenAddr,
}

impl<Proto: Protocol> Listener<Proto> {
    pub fn new(socket: ListenAddr) -> Self {
        Self {
            handler: Proto::default(),
            socket,
        }
    }

    pub const fn socket(&self) -> &ListenAddr {
        &self.socket
    }

    ///
    /// Validate the protocol arguments this listener will hand to its sessions
    ///
    /// # Errors
    /// If the protocol rejects the arguments
    ///
    #[tracing::instrument(level = "trace", skip_all, fields(socket = %self.socket))]
    pub fn init(&mut self, args: &mut Proto::Args) -> Result<(), ProtocolError> {
        self.handler.validate(args)
    }

    ///
    /// Bind the configured socket
    ///
    /// # Errors
    /// If the socket cannot be bound, or a unix socket path is held by a live process
    ///
    pub async fn bind(&self) -> Result<Bound, ListenerError> {
        match &self.socket {
            ListenAddr::Tcp(address) => TcpListener::bind(address.as_str())
                .await
                .map(Bound::Tcp)
                .map_err(|source| ListenerError::BindFailed {
                    address: address.clone(),
                    source,
                }),
            ListenAddr::Unix(path) => Self::bind_unix(path).await,
        }
    }

    async fn bind_unix(path: &Path) -> Result<Bound, ListenerError> {
        let bind_failed = |source| ListenerError::BindFailed {
            address: path.display().to_string(),
            source,
        };

        if path.exists() {
            if UnixStream::connect(path).await.is_ok() {
                return Err(ListenerError::InUse(path.display().to_string()));
            }

            internal!(level = INFO, "Removing stale socket file: {}", path.display());
            tokio::fs::remove_file(path).await.map_err(bind_failed)?;
        }

        let listener = UnixListener::bind(path).map_err(bind_failed)?;

        // Owner read/write only
        #[cfg(unix)]
        {
            let mut perms = tokio::fs::metadata(path)
                .await
                .map_err(bind_failed)?
                .permissions();
            perms.set_mode(0o600);
            tokio::fs::set_permissions(path, perms)
                .await
                .map_err(bind_failed)?;
        }

        Ok(Bound::Unix(listener, path.to_path_buf()))
    }

    ///
    /// Accept connections on an already bound socket until shutdown is signalled
    ///
    /// # Errors
    /// Currently only fails if the shutdown channel is misused; accept failures are logged
    ///
    #[tracing::instrument(level = "trace", skip_all, fields(socket = %self.socket))]
    pub async fn serve_bound(
        &self,
        bound: Bound,
        args: Proto::Args,
        mut shutdown: broadcast::Receiver<Signal>,
    ) -> anyhow::Result<()> {
        self.handler.bound(&self.socket, &args);
        internal!(level = INFO, "{} Listener serving {}", Proto::ty(), self.socket);

        let mut sessions: Vec<JoinHandle<()>> = Vec::default();
        let mut failures = 0;

        loop {
            tokio::select! {
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown) | Err(RecvError::Closed) => {
                            internal!(
                                level = INFO,
                                "{} Listener {} shutdown is pending in {} sec",
                                Proto::ty(),
                                self.socket,
                                SHUTDOWN_GRACE.as_secs()
                            );
                            break;
                        }
                        Ok(sig) => tracing::debug!("Listener ignoring {sig:?}"),
                        Err(RecvError::Lagged(missed)) => {
                            tracing::debug!("Listener lagged behind by {missed} signals");
                        }
                    }
                }

                connection = bound.accept() => {
                    sessions.retain(|session| !session.is_finished());

                    match connection {
                        Ok(Accepted::Tcp(stream, peer)) => {
                            failures = 0;
                            sessions.push(self.spawn(stream, peer, args.clone(), &shutdown));
                        }
                        Ok(Accepted::Unix(stream, peer)) => {
                            failures = 0;
                            sessions.push(self.spawn(stream, peer, args.clone(), &shutdown));
                        }
                        Err(err) => {
                            failures += 1;
                            let pause = accept_backoff(failures);
                            internal!(
                                level = WARN,
                                "Accept failed: {err}, retrying in {}ms",
                                pause.as_millis()
                            );
                            tokio::time::sleep(pause).await;
                        }
                    }
                }
            }
        }

        if tokio::time::timeout(SHUTDOWN_GRACE, join_all(sessions.iter_mut()))
            .await
            .is_err()
        {
            internal!(
                level = INFO,
                "Grace period elapsed, dropping remaining sessions"
            );
            sessions.iter().for_each(JoinHandle::abort);
        }

        bound.close().await;

        Ok(())
    }

    ///
    /// Bind and serve
    ///
    /// # Errors
    /// If the socket cannot be bound
    ///
    pub async fn serve(
        &self,
        args: Proto::Args,
        shutdown: broadcast::Receiver<Signal>,
    ) -> anyhow::Result<()> {
        let bound = self.bind().await?;
        self.serve_bound(bound, args, shutdown).await
    }

    fn spawn<S: Connection>(
        &self,
        stream: S,
        peer: Peer,
        args: Proto::Args,
        shutdown: &broadcast::Receiver<Signal>,
    ) -> JoinHandle<()> {
        tracing::debug!("Connection received on {} from {peer}", self.socket);

        let session = self.handler.handle(stream, peer, args);
        let signal = shutdown.resubscribe();

        tokio::spawn(async move {
            match session.run(signal).await {
                Err(err) if err.is_client_error() => tracing::debug!("Session ended: {err}"),
                Err(err) => internal!(level = ERROR, "Error: {err}"),
                Ok(()) => {}
            }
        })
    }
}
