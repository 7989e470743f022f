//! Whoever is responsible for reloading or stopping the daemon.
//!
//! Control sessions never act on `reload` or `shutdown` themselves; they ask
//! a [`Supervisor`] to.

use std::{fmt::Debug, sync::Arc};

use serde::Deserialize;
use sift_common::{Signal, internal};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorRequest {
    Reload,
    Shutdown,
}

pub trait Supervisor: Send + Sync + Debug {
    /// The control listener is bound and accepting connections
    fn ready(&self);

    fn request(&self, request: SupervisorRequest);
}

/// Which supervisor the daemon runs under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum SupervisorKind {
    /// Requests are broadcast to the rest of this process
    #[default]
    Broadcast,
    /// Requests are signalled to the parent process
    Parent,
}

impl SupervisorKind {
    pub fn build(self, signal: broadcast::Sender<Signal>) -> Arc<dyn Supervisor> {
        match self {
            Self::Broadcast => Arc::new(BroadcastSupervisor::new(signal)),
            Self::Parent => Arc::new(ParentSupervisor),
        }
    }
}

#[derive(Debug)]
pub struct BroadcastSupervisor {
    signal: broadcast::Sender<Signal>,
}

impl BroadcastSupervisor {
    pub const fn new(signal: broadcast::Sender<Signal>) -> Self {
        Self { signal }
    }
}

impl Supervisor for BroadcastSupervisor {
    fn ready(&self) {
        internal!(level = INFO, "Control listener ready");
    }

    fn request(&self, request: SupervisorRequest) {
        let signal = match request {
            SupervisorRequest::Reload => Signal::Reload,
            SupervisorRequest::Shutdown => Signal::Shutdown,
        };

        if let Err(err) = self.signal.send(signal) {
            internal!(level = WARN, "Nobody is listening for {:?}: {err}", err.0);
        }
    }
}

/// Signals the parent process, the way a forked worker reports to its master
#[derive(Debug)]
pub struct ParentSupervisor;

impl ParentSupervisor {
    fn signal(sig: libc::c_int) {
        // SAFETY: getppid cannot fail, and kill only reads its arguments
        let rc = unsafe { libc::kill(libc::getppid(), sig) };
        if rc != 0 {
            internal!(
                level = WARN,
                "Failed to signal parent process: {}",
                std::io::Error::last_os_error()
            );
        }
    }
}

impl Supervisor for ParentSupervisor {
    fn ready(&self) {
        Self::signal(libc::SIGUSR2);
    }

    fn request(&self, request: SupervisorRequest) {
        Self::signal(match request {
            SupervisorRequest::Reload => libc::SIGHUP,
            SupervisorRequest::Shutdown => libc::SIGTERM,
        });
    }
}
