use futures_util::future::join_all;
use serde::Deserialize;
use tokio::sync::broadcast::Receiver;

use crate::{Signal, internal, listener::Listener, traits::Protocol};

#[derive(Default, Deserialize)]
pub struct Controller<Proto: Protocol> {
    #[serde(alias = "listener")]
    listeners: Vec<Listener<Proto>>,
    /// Arguments shared by every session of every listener
    #[serde(default)]
    args: Proto::Args,
}

impl<Proto: Protocol> Controller<Proto> {
    pub fn new(listeners: Vec<Listener<Proto>>, args: Proto::Args) -> Self {
        Self { listeners, args }
    }

    /// Map over the protocol args, allowing modification before initialization
    ///
    /// This is useful for injecting dependencies that cannot be deserialized,
    /// such as shared counters or storage handles.
    pub fn map_args<F>(&mut self, f: F)
    where
        F: FnOnce(Proto::Args) -> Proto::Args,
    {
        self.args = f(std::mem::take(&mut self.args));
    }

    pub fn listeners(&self) -> &[Listener<Proto>] {
        &self.listeners
    }

    pub const fn args(&self) -> &Proto::Args {
        &self.args
    }

    ///
    /// Initialise this controller
    ///
    /// # Errors
    /// Any errors initialising this controller
    ///
    pub fn init(&mut self) -> anyhow::Result<()> {
        internal!("Initialising Controller for {}", Proto::ty());

        if self.listeners.is_empty() {
            internal!(level = WARN, "No {} listeners configured", Proto::ty());
        }

        let args = &mut self.args;
        self.listeners
            .iter_mut()
            .try_for_each(|listener| listener.init(args))?;

        Ok(())
    }

    ///
    /// # Errors
    /// If any of the listeners have a failure
    ///
    #[tracing::instrument(level = "trace", skip_all)]
    pub async fn control(self, signal: Receiver<Signal>) -> anyhow::Result<()> {
        join_all(
            self.listeners
                .iter()
                .map(|l| l.serve(self.args.clone(), signal.resubscribe())),
        )
        .await
        .into_iter()
        .try_for_each(|a| a)
    }
}
