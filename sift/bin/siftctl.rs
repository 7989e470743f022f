//! Command-line client for the sift control protocol
//!
//! Connects to a running daemon's control socket, authenticates when a
//! password is given, issues one command and prints the reply.

use std::{path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpStream, UnixStream},
};

/// How long to wait for a `learn` to be rejected before sending the payload
const LEARN_REJECT_WINDOW: Duration = Duration::from_millis(500);

const END: &str = "END";

/// Command-line client for a running sift daemon
#[derive(Parser, Debug)]
#[command(name = "siftctl")]
#[command(about = "Control a running sift daemon", long_about = None)]
#[command(version)]
struct Cli {
    /// Control socket: `host:port`, or the path of a unix socket
    #[arg(short, long, default_value = "127.0.0.1:11334")]
    socket: String,

    /// Control password, required for privileged commands
    #[arg(short, long, env = "SIFT_PASSWORD")]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show daemon statistics
    Stat,
    /// Show how long the daemon has been running
    Uptime,
    /// Show the commands the daemon understands
    Help,
    /// Ask the daemon to reload
    Reload,
    /// Ask the daemon to shut down
    Shutdown,
    /// Train a statfile with a message
    Learn {
        /// Statfile to train
        statfile: String,
        /// File containing the raw message
        file: PathBuf,
        /// Recipient used to locate the statfile
        #[arg(long)]
        rcpt: Option<String>,
        /// Sender used to locate the statfile
        #[arg(long)]
        from: Option<String>,
        /// Learn the message as a negative example
        #[arg(long)]
        negative: bool,
    },
}

trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

struct Client {
    stream: BufReader<Box<dyn Stream>>,
}

impl Client {
    async fn connect(socket: &str) -> anyhow::Result<Self> {
        let stream: Box<dyn Stream> = if let Some(path) = unix_path(socket) {
            Box::new(UnixStream::connect(path).await.map_err(|e| {
                anyhow::anyhow!("Cannot connect to sift control socket at {socket}: {e}")
            })?)
        } else {
            Box::new(TcpStream::connect(socket).await.map_err(|e| {
                anyhow::anyhow!("Cannot connect to sift control socket at {socket}: {e}")
            })?)
        };

        let mut client = Self {
            stream: BufReader::new(stream),
        };

        let greeting = client
            .line()
            .await?
            .ok_or_else(|| anyhow::anyhow!("Connection closed before greeting"))?;
        tracing::debug!("{greeting}");

        Ok(client)
    }

    async fn line(&mut self) -> anyhow::Result<Option<String>> {
        let mut line = String::new();
        if self.stream.read_line(&mut line).await? == 0 {
            return Ok(None);
        }

        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    async fn send(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        self.stream.get_mut().write_all(bytes).await?;
        Ok(())
    }

    /// Lines of the reply up to, not including, `END`
    async fn reply(&mut self) -> anyhow::Result<Vec<String>> {
        let mut lines = Vec::new();

        while let Some(line) = self.line().await? {
            if line == END {
                return Ok(lines);
            }
            lines.push(line);
        }

        anyhow::bail!("Connection closed mid-reply")
    }

    async fn command(&mut self, command: &str) -> anyhow::Result<Vec<String>> {
        tracing::debug!("Sending {command}");
        self.send(format!("{command}\r\n").as_bytes()).await?;
        self.reply().await
    }

    async fn authenticate(&mut self, password: &str) -> anyhow::Result<()> {
        let reply = self.command(&format!("password {password}")).await?;

        match reply.first().map(String::as_str) {
            Some("password accepted") => Ok(()),
            _ => anyhow::bail!("Authentication failed: {}", reply.join(" ")),
        }
    }

    async fn learn(&mut self, request: &str, payload: &[u8]) -> anyhow::Result<Vec<String>> {
        // An empty payload is complete as soon as the command line is read
        if payload.is_empty() {
            return self.command(request).await;
        }

        tracing::debug!("Sending {request}");
        self.send(format!("{request}\r\n").as_bytes()).await?;

        // An accepted learn is silent until its payload arrives
        if let Ok(reply) = tokio::time::timeout(LEARN_REJECT_WINDOW, self.reply()).await {
            let reply = reply?;
            if is_learn_outcome(&reply) {
                return Ok(reply);
            }
            anyhow::bail!("Learn rejected: {}", reply.join(" "));
        }

        self.send(payload).await?;
        self.reply().await
    }
}

fn is_learn_outcome(reply: &[String]) -> bool {
    reply
        .first()
        .is_some_and(|line| line == "learn ok" || line.starts_with("learn fail"))
}

fn unix_path(socket: &str) -> Option<&str> {
    socket
        .strip_prefix("unix:")
        .or_else(|| socket.starts_with('/').then_some(socket))
}

fn learn_request(
    statfile: &str,
    size: usize,
    rcpt: Option<&str>,
    from: Option<&str>,
    negative: bool,
) -> String {
    let mut request = format!("learn {statfile} {size}");

    if let Some(rcpt) = rcpt {
        request.push_str(&format!(" -r {rcpt}"));
    }
    if let Some(from) = from {
        request.push_str(&format!(" -f {from}"));
    }
    if negative {
        request.push_str(" -n");
    }

    request
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut client = Client::connect(&cli.socket).await?;

    if let Some(password) = &cli.password {
        client.authenticate(password).await?;
    }

    let reply = match cli.command {
        Commands::Stat => client.command("stat").await?,
        Commands::Uptime => client.command("uptime").await?,
        Commands::Help => client.command("help").await?,
        Commands::Reload => client.command("reload").await?,
        Commands::Shutdown => client.command("shutdown").await?,
        Commands::Learn {
            statfile,
            file,
            rcpt,
            from,
            negative,
        } => {
            let payload = tokio::fs::read(&file)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", file.display()))?;
            let request = learn_request(
                &statfile,
                payload.len(),
                rcpt.as_deref(),
                from.as_deref(),
                negative,
            );

            client.learn(&request, &payload).await?
        }
    };

    let _ = client.command("quit").await;

    for line in &reply {
        println!("{line}");
    }

    match reply.first().map(String::as_str) {
        Some("not authorized") => anyhow::bail!("Command requires a valid --password"),
        Some(line) if line.starts_with("learn fail") => anyhow::bail!("{line}"),
        _ => Ok(()),
    }
}
