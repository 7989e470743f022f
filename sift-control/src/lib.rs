//! Administrative control protocol for a running sift instance
//!
//! Operators connect over TCP or a unix socket and issue line-based
//! commands: `password`, `quit`, `reload`, `stat`, `shutdown`, `uptime`,
//! `learn` and `help`. `learn` is followed by a raw message payload, which
//! is tokenized and used to train a statfile.

pub mod command;
pub mod dispatcher;
pub mod error;
pub mod session;
pub mod supervisor;

use std::{
    fmt::{self, Debug, Formatter},
    sync::{Arc, Mutex},
    time::Instant,
};

use serde::Deserialize;
use sift_common::{
    Signal,
    error::ProtocolError,
    internal,
    listener::ListenAddr,
    stats::Stats,
    traits::protocol::{Connection, Peer, Protocol, SessionHandler},
};
use sift_stat::{StatConfig, StatfilePool, classifier, tokenizer};
use tokio::sync::broadcast;

pub use command::{Command, CommandKind, REGISTRY, Registry, Resolution};
pub use dispatcher::{Dispatcher, Frame, Framing};
pub use error::{ControlError, LearnFailure, LearnRejection, Result};
pub use session::Session;
pub use supervisor::{Supervisor, SupervisorKind, SupervisorRequest};

/// Default idle timeout for a control session
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Default upper bound on a `learn` payload
pub const DEFAULT_MAX_LEARN_SIZE: usize = 16 * 1024 * 1024;

/// The shared state every control session works against
#[derive(Clone)]
pub struct Services {
    pub stat: Arc<StatConfig>,
    pub stats: Arc<Stats>,
    pub pool: Arc<Mutex<StatfilePool>>,
    pub supervisor: Arc<dyn Supervisor>,
    pub start_time: Instant,
    /// Sent to every client on connect, without the line terminator
    pub greeting: Arc<str>,
}

impl Services {
    pub fn new(
        stat: Arc<StatConfig>,
        stats: Arc<Stats>,
        supervisor: Arc<dyn Supervisor>,
    ) -> Self {
        Self {
            stat,
            stats,
            supervisor,
            ..Self::default()
        }
    }
}

impl Default for Services {
    fn default() -> Self {
        let (signal, _) = broadcast::channel(1);

        Self {
            stat: Arc::default(),
            stats: Arc::default(),
            pool: Arc::default(),
            supervisor: SupervisorKind::default().build(signal),
            start_time: Instant::now(),
            greeting: format!(
                "Sift version {} is running on {}",
                env!("CARGO_PKG_VERSION"),
                sift_common::hostname()
            )
            .into(),
        }
    }
}

impl Debug for Services {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("statfiles", &self.stat.statfiles.len())
            .field("supervisor", &self.supervisor)
            .field("greeting", &self.greeting)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Deserialize)]
pub struct ControlArgs {
    /// Unlocks privileged commands; privileged commands are unavailable when empty
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_learn_size")]
    pub max_learn_size: usize,
    #[serde(default)]
    pub supervisor: SupervisorKind,
    #[serde(skip)]
    pub services: Services,
}

const fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

const fn default_max_learn_size() -> usize {
    DEFAULT_MAX_LEARN_SIZE
}

impl Default for ControlArgs {
    fn default() -> Self {
        Self {
            password: String::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_learn_size: DEFAULT_MAX_LEARN_SIZE,
            supervisor: SupervisorKind::default(),
            services: Services::default(),
        }
    }
}

impl Debug for ControlArgs {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlArgs")
            .field("password", &"<redacted>")
            .field("timeout_secs", &self.timeout_secs)
            .field("max_learn_size", &self.max_learn_size)
            .field("supervisor", &self.supervisor)
            .field("services", &self.services)
            .finish()
    }
}

impl ControlArgs {
    /// Set the control password
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Set the shared services sessions run against
    #[must_use]
    pub fn with_services(mut self, services: Services) -> Self {
        self.services = services;
        self
    }

    /// Set the idle timeout
    #[must_use]
    pub const fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set the largest `learn` payload accepted
    #[must_use]
    pub const fn with_max_learn_size(mut self, size: usize) -> Self {
        self.max_learn_size = size;
        self
    }
}

#[derive(Default, Deserialize)]
pub struct Control;

impl Protocol for Control {
    type Session<S: Connection> = Session<S>;
    type Args = ControlArgs;

    fn ty() -> &'static str {
        "Control"
    }

    #[tracing::instrument(level = "trace", skip(self, stream, args), fields(%peer))]
    fn handle<S: Connection>(&self, stream: S, peer: Peer, args: Self::Args) -> Self::Session<S> {
        args.services.stats.record_control_connection();
        Session::create(stream, peer, args)
    }

    #[tracing::instrument(level = "trace", skip_all)]
    fn validate(&mut self, args: &mut Self::Args) -> std::result::Result<(), ProtocolError> {
        if args.timeout_secs == 0 {
            return Err(ProtocolError::InvalidConfiguration {
                field: "timeout_secs".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        if args.max_learn_size == 0 {
            return Err(ProtocolError::InvalidConfiguration {
                field: "max_learn_size".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        if args.password.is_empty() {
            internal!(
                level = WARN,
                "No control password configured, privileged commands are disabled"
            );
        }

        let stat = &args.services.stat;
        for (name, statfile) in &stat.statfiles {
            if tokenizer::get(&statfile.tokenizer).is_none() {
                internal!(
                    level = WARN,
                    "Statfile {name} uses unknown tokenizer {}",
                    statfile.tokenizer
                );
            }

            let classifier = stat.classifier_for(statfile);
            if classifier::get(classifier).is_none() {
                internal!(
                    level = WARN,
                    "Statfile {name} uses unknown classifier {classifier}, {} will be used",
                    classifier::DEFAULT_CLASSIFIER
                );
            }
        }

        Ok(())
    }

    fn bound(&self, socket: &ListenAddr, args: &Self::Args) {
        tracing::debug!("Control listener bound to {socket}");
        args.services.supervisor.ready();
    }
}

impl<S: Connection> SessionHandler for Session<S> {
    async fn run(
        self,
        signal: broadcast::Receiver<Signal>,
    ) -> std::result::Result<(), sift_common::error::SessionError> {
        Self::run(self, signal).await
    }
}
