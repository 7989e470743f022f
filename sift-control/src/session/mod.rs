//! Control sessions: one per client connection.
//!
//! [`Context`] holds the protocol state and reacts to events synchronously;
//! [`Session`] owns the connection and feeds the context one frame at a
//! time, writing out whatever it queued before reading the next frame.

mod handlers;
pub mod learn;
pub mod state;

use std::{
    fmt::{Display, Write},
    time::Duration,
};

use sift_common::{
    Signal,
    error::SessionError,
    incoming, internal, outgoing,
    scratch::Scratch,
    traits::{fsm::FiniteStateMachine, protocol::{Connection, Peer}},
};
use sift_stat::MimePart;
use tokio::sync::broadcast::{self, error::RecvError};

pub use handlers::format_uptime;
use learn::LearnRequest;
use state::{Event, State};

use crate::{
    ControlArgs,
    command::{REGISTRY, Resolution},
    dispatcher::{Dispatcher, Frame, Framing},
    error::ControlError,
};

const END: &str = "END";

/// What the session should do once queued output has been written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

pub struct Context {
    state: State,
    framing: Framing,
    authorized: bool,
    /// `None` once the session has been torn down
    scratch: Option<Scratch>,
    parts: Vec<MimePart>,
    learn: Option<LearnRequest>,
    output: String,
    args: ControlArgs,
}

impl Context {
    pub fn new(args: ControlArgs) -> Self {
        let scratch = Scratch::new(std::sync::Arc::clone(&args.services.stats));

        Self {
            state: State::default(),
            framing: Framing::Line,
            authorized: false,
            scratch: Some(scratch),
            parts: Vec::new(),
            learn: None,
            output: String::new(),
            args,
        }
    }

    pub const fn state(&self) -> State {
        self.state
    }

    pub const fn framing(&self) -> Framing {
        self.framing
    }

    pub const fn authorized(&self) -> bool {
        self.authorized
    }

    pub const fn pending_learn(&self) -> Option<&LearnRequest> {
        self.learn.as_ref()
    }

    pub const fn is_torn_down(&self) -> bool {
        self.scratch.is_none()
    }

    fn transition(&mut self, event: Event) {
        self.state = self.state.transition(event, &mut self.framing);
    }

    fn reply(&mut self, line: impl Display) {
        // Writing into a String cannot fail
        let _ = write!(self.output, "{line}\r\n");
    }

    /// Queue the greeting sent to a newly connected client
    pub fn greet(&mut self) {
        let greeting = std::sync::Arc::clone(&self.args.services.greeting);
        self.reply(greeting);
    }

    /// Take everything queued for the client
    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }

    /// A command line arrived
    pub fn on_line(&mut self, line: &str) {
        if self.state != State::Command {
            tracing::debug!("Ignoring line received in {:?}", self.state);
            return;
        }

        let Some(scratch) = self.scratch.as_mut() else {
            return;
        };
        let line = scratch.strdup(line);

        let mut tokens = line.split_whitespace();
        if let Some(name) = tokens.next() {
            let args = tokens.collect::<Vec<_>>();

            match REGISTRY.resolve(name.trim()) {
                Resolution::None => {
                    tracing::debug!("Unknown command: '{name}'");
                    self.reply("Unknown command");
                }
                Resolution::Ambiguous => {
                    tracing::debug!("Ambiguous command: '{name}'");
                    self.reply("Ambigious command");
                }
                Resolution::Unique(command) => self.dispatch(command, &args),
            }
        }

        if self.state == State::Command {
            self.transition(Event::Replied);
        }

        if self.state != State::Learn {
            self.reply(END);
        }
    }

    /// The learn payload arrived
    pub fn on_payload(&mut self, payload: Vec<u8>) {
        if self.state != State::Learn {
            tracing::debug!("Ignoring payload received in {:?}", self.state);
            return;
        }

        let (Some(request), Some(scratch)) = (self.learn.take(), self.scratch.as_mut()) else {
            return;
        };

        let payload = scratch.adopt(payload);
        let outcome = learn::train(
            &request,
            &payload,
            &mut self.parts,
            scratch,
            &self.args.services,
        );

        match outcome {
            Ok(()) => {
                self.args.services.stats.record_learned();
                self.reply("learn ok");
            }
            Err(failure) => self.reply(failure),
        }

        self.parts.clear();
        self.transition(Event::Learned);
        // Unlike the entry into learn mode, the outcome is a complete reply
        self.reply(END);
    }

    /// Everything queued has been written to the client
    pub fn on_write_done(&mut self) -> Flow {
        if self.state.is_terminal() {
            return Flow::Close;
        }

        self.transition(Event::WriteDone);
        Flow::Continue
    }

    /// The connection failed; the session is over and [`Session::close`] tears it down
    pub fn on_error(&mut self, err: &ControlError) {
        match err {
            ControlError::Closed => internal!(level = INFO, "Client closed control connection"),
            err => internal!(
                level = INFO,
                "Abnormally closing control connection: {err}"
            ),
        }
    }

    /// Release everything the session holds; calling this again does nothing
    pub fn teardown(&mut self) {
        self.learn = None;
        self.parts.clear();

        if let Some(scratch) = self.scratch.take() {
            scratch.release();
        }
    }
}

pub struct Session<S: Connection> {
    peer: Peer,
    /// `None` once the connection has been closed
    dispatcher: Option<Dispatcher<S>>,
    context: Context,
}

impl<S: Connection> Session<S> {
    pub fn create(stream: S, peer: Peer, args: ControlArgs) -> Self {
        let timeout = Duration::from_secs(args.timeout_secs);

        Self {
            peer,
            dispatcher: Some(Dispatcher::new(stream, timeout)),
            context: Context::new(args),
        }
    }

    pub const fn context(&self) -> &Context {
        &self.context
    }

    ///
    /// Serve the client until it quits, the connection fails, or shutdown is signalled
    ///
    /// # Errors
    /// Any transport failure other than the client closing the connection
    ///
    #[tracing::instrument(level = "trace", skip_all, fields(peer = %self.peer))]
    pub async fn run(mut self, mut signal: broadcast::Receiver<Signal>) -> Result<(), SessionError> {
        internal!(level = INFO, "Accepted control connection from {}", self.peer);

        self.context.greet();
        let result = self.serve(&mut signal).await;

        if let Err(err) = &result {
            self.context.on_error(err);
        }

        self.close().await;

        match result {
            Ok(()) | Err(ControlError::Closed) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn serve(&mut self, signal: &mut broadcast::Receiver<Signal>) -> Result<(), ControlError> {
        let Some(dispatcher) = self.dispatcher.as_mut() else {
            return Ok(());
        };

        loop {
            let output = self.context.take_output();
            if !output.is_empty() {
                for line in output.lines() {
                    outgoing!("{line}");
                }
                dispatcher.write(output.as_bytes()).await?;
            }

            if self.context.on_write_done() == Flow::Close {
                internal!("Closing control connection");
                return Ok(());
            }

            dispatcher.set_framing(self.context.framing());

            tokio::select! {
                sig = signal.recv() => match sig {
                    Ok(Signal::Shutdown) | Err(RecvError::Closed) => {
                        internal!("Shutdown requested, closing control connection");
                        return Ok(());
                    }
                    Ok(sig) => tracing::debug!("Session ignoring {sig:?}"),
                    Err(RecvError::Lagged(missed)) => {
                        tracing::debug!("Session lagged behind by {missed} signals");
                    }
                },

                frame = dispatcher.read_frame() => match frame? {
                    Frame::Line(line) => {
                        incoming!("{line}");
                        self.context.on_line(&line);
                    }
                    Frame::Payload(payload) => {
                        incoming!("<{} byte payload>", payload.len());
                        self.context.on_payload(payload);
                    }
                },
            }
        }
    }

    /// Close the connection and tear the session down; idempotent
    pub async fn close(&mut self) {
        if let Some(mut dispatcher) = self.dispatcher.take() {
            dispatcher.shutdown().await;
        }

        self.context.teardown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use sift_common::stats::Stats;
    use sift_stat::{StatConfig, StatfileConfig};
    use tempfile::TempDir;

    use super::*;
    use crate::{Services, supervisor::SupervisorKind};

    struct Harness {
        context: Context,
        stats: Arc<Stats>,
        signals: broadcast::Receiver<Signal>,
        _dir: TempDir,
    }

    impl Harness {
        fn new(password: &str) -> Self {
            let dir = TempDir::new().unwrap();

            let mut stat = StatConfig::default();
            stat.statfiles.insert(
                "spam".to_string(),
                StatfileConfig {
                    pattern: dir.path().join("%r.spam").display().to_string(),
                    size: 4096,
                    tokenizer: "osb".to_string(),
                    metric: None,
                },
            );

            let (sender, signals) = broadcast::channel(4);
            let stats = Arc::new(Stats::default());
            let services = Services::new(
                Arc::new(stat),
                Arc::clone(&stats),
                SupervisorKind::Broadcast.build(sender),
            );

            let args = ControlArgs::default()
                .with_password(password)
                .with_services(services);

            Self {
                context: Context::new(args),
                stats,
                signals,
                _dir: dir,
            }
        }

        fn authorized(password: &str) -> Self {
            let mut harness = Self::new(password);
            harness.send(&format!("password {password}"));
            harness
        }

        /// Feed a line and return the reply, completing the write
        fn send(&mut self, line: &str) -> String {
            self.context.on_line(line);
            let output = self.context.take_output();
            self.context.on_write_done();
            output
        }
    }

    #[test]
    fn greeting() {
        let mut harness = Harness::new("secret");
        harness.context.greet();

        let greeting = harness.context.take_output();
        assert!(greeting.starts_with("Sift version "));
        assert!(greeting.ends_with("\r\n"));
    }

    #[test]
    fn empty_line_only_terminates() {
        let mut harness = Harness::new("secret");

        harness.context.on_line("   ");
        assert_eq!(harness.context.state(), State::Reply);
        assert_eq!(harness.context.take_output(), "END\r\n");
    }

    #[test]
    fn unknown_and_ambiguous_commands() {
        let mut harness = Harness::new("secret");

        assert_eq!(harness.send("frobnicate now"), "Unknown command\r\nEND\r\n");
        assert_eq!(harness.send("s"), "Ambigious command\r\nEND\r\n");
        assert_eq!(harness.context.state(), State::Command);
    }

    #[test]
    fn reply_waits_for_write_completion() {
        let mut harness = Harness::new("secret");

        harness.context.on_line("uptime");
        assert_eq!(harness.context.state(), State::Reply);

        // Lines are only read in the command state
        harness.context.on_line("help");
        assert!(!harness.context.take_output().contains("Sift CLI"));

        assert_eq!(harness.context.on_write_done(), Flow::Continue);
        assert_eq!(harness.context.state(), State::Command);
    }

    #[test]
    fn stat_needs_no_password() {
        let mut harness = Harness::new("secret");
        harness.stats.record_learned();

        let reply = harness.send("stat");
        let lines = reply.split("\r\n").collect::<Vec<_>>();

        assert_eq!(lines.len(), 12);
        assert_eq!(lines[0], "Messages scanned: 0");
        assert_eq!(lines[1], "Messages learned: 1");
        assert_eq!(lines[4], "Pools allocated: 1");
        assert_eq!(lines[9], "Chunks freed: 0");
        assert_eq!(lines[10], "END");
        assert_eq!(lines[11], "");
    }

    #[test]
    fn privileged_commands_need_password() {
        let mut harness = Harness::new("secret");

        for command in ["shutdown", "reload", "learn spam 10"] {
            assert_eq!(harness.send(command), "not authorized\r\nEND\r\n");
        }

        assert_eq!(harness.context.state(), State::Command);
        assert_eq!(harness.context.framing(), Framing::Line);
        assert!(harness.signals.try_recv().is_err());
    }

    #[test]
    fn password_checks() {
        let mut harness = Harness::new("secret");

        assert_eq!(
            harness.send("password"),
            "password command requires one argument\r\nEND\r\n"
        );

        assert_eq!(harness.send("password secret"), "password accepted\r\nEND\r\n");
        assert!(harness.context.authorized());

        assert_eq!(harness.send("password wrong"), "password NOT accepted\r\nEND\r\n");
        assert!(!harness.context.authorized());

        harness.send("password secret");
        assert_eq!(harness.send("pass sec"), "password NOT accepted\r\nEND\r\n");
        assert!(!harness.context.authorized());

        assert_eq!(
            harness.send("password secrets"),
            "password NOT accepted\r\nEND\r\n"
        );
    }

    #[test]
    fn empty_configured_password_never_matches() {
        let mut harness = Harness::new("");

        assert_eq!(harness.send("password x"), "password NOT accepted\r\nEND\r\n");
        assert!(!harness.context.authorized());
    }

    #[test]
    fn supervisor_requests() {
        let mut harness = Harness::authorized("secret");

        assert_eq!(harness.send("reload"), "reload request sent\r\nEND\r\n");
        assert_eq!(harness.signals.try_recv().unwrap(), Signal::Reload);

        assert_eq!(harness.send("shutdown"), "shutdown request sent\r\nEND\r\n");
        assert_eq!(harness.signals.try_recv().unwrap(), Signal::Shutdown);
    }

    #[test]
    fn quit_closes_after_reply() {
        let mut harness = Harness::new("secret");

        harness.context.on_line("quit");
        assert_eq!(harness.context.take_output(), "END\r\n");
        assert_eq!(harness.context.state(), State::Quit);
        assert_eq!(harness.context.on_write_done(), Flow::Close);
    }

    #[test]
    fn help_text() {
        let mut harness = Harness::new("secret");

        let reply = harness.send("help");
        assert!(reply.starts_with("Sift CLI commands (* - privileged command):\r\n"));
        assert!(reply.ends_with("    uptime - sift uptime\r\nEND\r\n"));
        assert_eq!(reply.lines().count(), 9);
    }

    #[test]
    fn learn_round_trip() {
        let mut harness = Harness::authorized("secret");
        let payload = b"Subject: offer\r\n\r\ncheap watches for sale today\r\n".to_vec();

        harness
            .context
            .on_line(&format!("learn spam {} -r user@example.com", payload.len()));

        assert_eq!(harness.context.take_output(), "");
        assert_eq!(harness.context.state(), State::Learn);
        assert_eq!(harness.context.framing(), Framing::Fixed(payload.len()));
        assert!(harness.context.pending_learn().is_some());

        // Nothing was written, so nothing changes
        assert_eq!(harness.context.on_write_done(), Flow::Continue);
        assert_eq!(harness.context.state(), State::Learn);

        harness.context.on_payload(payload);

        assert_eq!(harness.context.take_output(), "learn ok\r\nEND\r\n");
        assert_eq!(harness.context.state(), State::Reply);
        assert_eq!(harness.context.framing(), Framing::Line);
        assert!(harness.context.pending_learn().is_none());
        assert!(harness.context.parts.is_empty());
        assert_eq!(harness.stats.snapshot().messages_learned, 1);

        harness.context.on_write_done();
        assert_eq!(harness.context.state(), State::Command);
    }

    #[test]
    fn learn_rejections_keep_line_framing() {
        let mut harness = Harness::authorized("secret");

        assert_eq!(harness.send("learn spam ten"), "learn size is invalid\r\nEND\r\n");
        assert_eq!(
            harness.send("learn ham 10"),
            "statfile ham is not defined\r\nEND\r\n"
        );
        assert_eq!(
            harness.send("learn spam"),
            "learn command requires at least two arguments: stat filename and its size\r\nEND\r\n"
        );
        assert_eq!(
            harness.send("learn spam 99999999999"),
            "learn size is too large\r\nEND\r\n"
        );

        assert_eq!(harness.context.framing(), Framing::Line);
        assert!(harness.context.pending_learn().is_none());
    }

    #[test]
    fn tokenizer_failure_is_reported() {
        let mut harness = Harness::authorized("secret");
        let payload = b"Subject: x\r\n\r\nbinary\0body\r\n".to_vec();

        harness
            .context
            .on_line(&format!("learn spam {}", payload.len()));
        harness.context.on_payload(payload);

        assert_eq!(
            harness.context.take_output(),
            "learn fail, tokenizer error\r\nEND\r\n"
        );
        assert_eq!(harness.context.state(), State::Reply);
        assert!(harness.context.parts.is_empty());
        assert_eq!(harness.stats.snapshot().messages_learned, 0);
    }

    #[test]
    fn errors_leave_teardown_to_close() {
        let mut harness = Harness::authorized("secret");
        harness.context.on_line("learn spam 10");

        harness.context.on_error(&ControlError::Closed);
        assert!(!harness.context.is_torn_down());
        assert_eq!(harness.stats.snapshot().pools_freed, 0);

        harness.context.teardown();
        assert!(harness.context.is_torn_down());
        assert_eq!(harness.stats.snapshot().pools_freed, 1);
    }

    #[tokio::test]
    async fn session_releases_scratch_after_client_disconnects() {
        let args = ControlArgs::default();
        let stats = Arc::clone(&args.services.stats);
        let (client, server) = tokio::io::duplex(1024);
        let (_signal, receiver) = broadcast::channel(1);

        let session = Session::create(server, Peer::Tcp(([127, 0, 0, 1], 1).into()), args);
        drop(client);

        // Writing the greeting fails, the client is already gone
        let _ = session.run(receiver).await;

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.pools_freed, 1);
        assert_eq!(snapshot.chunks_freed, snapshot.chunks_allocated);
    }

    #[test]
    fn teardown_is_idempotent() {
        let mut harness = Harness::authorized("secret");
        harness.context.on_line("learn spam 10");

        harness.context.teardown();
        harness.context.teardown();

        assert!(harness.context.is_torn_down());
        assert!(harness.context.pending_learn().is_none());

        let snapshot = harness.stats.snapshot();
        assert_eq!(snapshot.pools_allocated, 1);
        assert_eq!(snapshot.pools_freed, 1);
        assert_eq!(snapshot.chunks_freed, snapshot.chunks_allocated);

        // Nothing is processed after teardown
        harness.context.on_payload(vec![0; 10]);
        assert_eq!(harness.context.take_output(), "");
    }
}
