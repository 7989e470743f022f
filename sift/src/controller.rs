use std::{
    path::{Path, PathBuf},
    sync::{Arc, LazyLock},
};

use serde::Deserialize;
use sift_common::{Signal, controller::Controller, internal, logging, stats::Stats};
use sift_control::{Control, Services};
use sift_stat::StatConfig;
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::broadcast::{self, error::RecvError},
};

#[derive(Default, Deserialize)]
pub struct Sift {
    #[serde(alias = "control")]
    control_controller: Controller<Control>,
    #[serde(default)]
    stat: StatConfig,
}

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "SIFT_CONFIG";

/// Searched in order when no configuration file is named
pub const CONFIG_SEARCH_PATH: [&str; 2] = ["./sift.config.ron", "/etc/sift/sift.config.ron"];

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

/// Turn process signals into broadcast signals until the controller is finalised
#[tracing::instrument(level = "trace")]
async fn signals() -> anyhow::Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;
    let mut pending = signal(SignalKind::user_defined2())?;
    let mut receiver = SHUTDOWN_BROADCAST.subscribe();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                internal!(level = INFO, "CTRL+C entered, shutting down");
            }
            _ = terminate.recv() => {
                internal!(level = INFO, "Terminate Signal received, shutting down");
            }
            _ = pending.recv() => {
                internal!(level = INFO, "Pending shutdown requested");
            }
            _ = hangup.recv() => {
                internal!(level = INFO, "Hangup received, configuration is only read at startup");
                continue;
            }
            sig = receiver.recv() => {
                match sig {
                    Ok(Signal::Reload) => internal!(
                        level = INFO,
                        "Reload requested, configuration is only read at startup"
                    ),
                    Ok(Signal::Shutdown) => tracing::debug!("Shutdown in progress"),
                    Ok(Signal::Finalised) | Err(RecvError::Closed) => return Ok(()),
                    Err(RecvError::Lagged(missed)) => {
                        tracing::debug!("Signal watcher lagged behind by {missed} signals");
                    }
                }
                continue;
            }
        };

        SHUTDOWN_BROADCAST
            .send(Signal::Shutdown)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;
    }
}

impl Sift {
    ///
    /// Load the configuration at `explicit`, or the first file on the search path
    ///
    /// # Errors
    /// If the named file is missing, nothing on the search path exists, or the
    /// file cannot be read or parsed
    ///
    pub fn load(explicit: Option<&Path>, search: &[&str]) -> anyhow::Result<Self> {
        let path = match explicit {
            Some(path) if path.exists() => path.to_path_buf(),
            Some(path) => anyhow::bail!("{CONFIG_ENV} names a missing file: {}", path.display()),
            None => search
                .iter()
                .map(PathBuf::from)
                .find(|path| path.exists())
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "No configuration file found; set {CONFIG_ENV} or create one of {}",
                        search.join(", ")
                    )
                })?,
        };

        internal!("Loading configuration from {}", path.display());

        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Failed to read config from {}: {e}", path.display()))?;

        ron::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config in {}: {e}", path.display()))
    }

    pub const fn stat(&self) -> &StatConfig {
        &self.stat
    }

    pub const fn control(&self) -> &Controller<Control> {
        &self.control_controller
    }

    /// Hand the shared services to the control protocol and validate it
    ///
    /// # Errors
    /// If the control listeners reject their configuration
    pub fn init(&mut self, stats: Arc<Stats>) -> anyhow::Result<()> {
        let stat = Arc::new(self.stat.clone());

        self.control_controller.map_args(|args| {
            let supervisor = args.supervisor.build(SHUTDOWN_BROADCAST.clone());
            args.with_services(Services::new(stat, stats, supervisor))
        });

        self.control_controller.init()
    }

    /// Run this controller, and everything it controls
    ///
    /// # Errors
    ///
    /// This function will return an error if the control listeners fail to
    /// initialise or bind.
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub async fn run(mut self) -> anyhow::Result<()> {
        logging::init();

        internal!("Controller running");

        self.init(Arc::default())?;

        let watcher = tokio::spawn(signals());
        let ret = self
            .control_controller
            .control(SHUTDOWN_BROADCAST.subscribe())
            .await;

        internal!("Shutting down...");

        let _ = SHUTDOWN_BROADCAST.send(Signal::Finalised);
        match watcher.await {
            Ok(Err(err)) => internal!(level = WARN, "Signal handling failed: {err}"),
            Err(err) => internal!(level = WARN, "Signal watcher did not finish: {err}"),
            Ok(Ok(())) => {}
        }

        ret
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use sift_common::{Signal, listener::ListenAddr, stats::Stats};
    use sift_control::SupervisorKind;

    use super::{SHUTDOWN_BROADCAST, Sift, signals};

    const EXAMPLE: &str = include_str!("../../sift.config.ron");

    #[test]
    fn load_prefers_explicit_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("sift.config.ron");
        std::fs::write(&path, EXAMPLE).unwrap();

        let sift = Sift::load(Some(path.as_path()), &[]).unwrap();
        assert_eq!(sift.control().args().password, "secret");

        let missing = dir.path().join("missing.ron");
        let err = Sift::load(Some(missing.as_path()), &[path.to_str().unwrap()]).err().unwrap();
        assert!(err.to_string().contains("missing.ron"));
    }

    #[test]
    fn load_searches_in_order() {
        let dir = tempfile::TempDir::new().unwrap();
        let first = dir.path().join("first.ron");
        let second = dir.path().join("second.ron");
        std::fs::write(&second, EXAMPLE).unwrap();

        let search = [first.to_str().unwrap(), second.to_str().unwrap()];
        let sift = Sift::load(None, &search).unwrap();
        assert!(sift.stat().statfile("spam").is_some());

        std::fs::write(&first, "(control: (").unwrap();
        let err = Sift::load(None, &search).err().unwrap();
        assert!(err.to_string().starts_with("Invalid config in"));

        let err = Sift::load(None, &[]).err().unwrap();
        assert!(err.to_string().contains("SIFT_CONFIG"));
    }

    #[test]
    fn example_config_parses() {
        let sift: Sift = ron::from_str(EXAMPLE).unwrap();

        let args = sift.control().args();
        assert_eq!(args.password, "secret");
        assert_eq!(args.timeout_secs, 120);
        assert_eq!(args.supervisor, SupervisorKind::Broadcast);

        let spam = sift.stat().statfile("spam").unwrap();
        assert_eq!(spam.tokenizer, "osb");
        assert_eq!(sift.stat().classifier_for(spam), "winnow");
    }

    #[test]
    fn init_shares_stats_with_sessions() {
        let mut sift: Sift = ron::from_str(EXAMPLE).unwrap();
        let stats = Arc::new(Stats::default());

        sift.init(Arc::clone(&stats)).unwrap();

        let services = &sift.control().args().services;
        assert!(Arc::ptr_eq(&services.stats, &stats));
        assert!(services.stat.statfile("spam").is_some());
    }

    #[test]
    fn init_rejects_zero_timeout() {
        let mut sift: Sift = ron::from_str(
            r#"(
                control: (
                    listeners: [ (socket: Tcp("127.0.0.1:0")) ],
                    args: (timeout_secs: 0),
                ),
            )"#,
        )
        .unwrap();

        assert!(sift.init(Arc::default()).is_err());
    }

    #[test]
    fn listeners_accept_unix_sockets() {
        let sift: Sift = ron::from_str(
            r#"(
                control: (
                    listeners: [ (socket: Unix("/run/sift/control.sock")) ],
                ),
            )"#,
        )
        .unwrap();

        assert_eq!(
            sift.control().listeners()[0].socket(),
            &ListenAddr::Unix("/run/sift/control.sock".into())
        );
        assert!(sift.control().args().password.is_empty());
        assert!(sift.stat().statfiles.is_empty());
    }

    #[tokio::test]
    async fn signal_watcher_stops_when_finalised() {
        let watcher = tokio::spawn(signals());

        // The watcher may not have subscribed yet
        tokio::time::timeout(Duration::from_secs(5), async {
            while !watcher.is_finished() {
                let _ = SHUTDOWN_BROADCAST.send(Signal::Finalised);
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();

        watcher.await.unwrap().unwrap();
    }
}
