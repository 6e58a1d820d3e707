//! Argument parsing, config assembly, and the demo responder.

use std::future::Future;
use std::io;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use molt::{Application, Conn, Server, ServerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "moltd", version, about = "Zero-downtime demo HTTP server")]
struct Cli {
    /// Listen address (host:port).
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: String,

    /// Pid file path.
    #[arg(long, default_value = "/tmp/moltd.pid")]
    pid_file: String,

    /// JSON file with a full server configuration; takes precedence
    /// over the individual flags.
    #[arg(long)]
    config: Option<String>,

    /// TLS certificate chain (PEM).
    #[arg(long, requires = "tls_key")]
    tls_cert: Option<String>,

    /// TLS private key (PEM).
    #[arg(long, requires = "tls_cert")]
    tls_key: Option<String>,

    /// Set automatically on a process spawned during a handoff.
    #[arg(long, hide = true)]
    upgrade: bool,
}

/// Minimal HTTP/1.0 responder: reads the request head, answers 200 with
/// the serving pid so a handoff is observable from the outside.
struct Greeter {
    /// Per-read timeout from the validated config.
    read_timeout: Duration,
    /// Request head size limit from the validated config.
    max_header_bytes: usize,
}

impl Application for Greeter {
    fn handle(&self, mut conn: Conn) -> impl Future<Output = io::Result<()>> + Send {
        let read_timeout = self.read_timeout;
        let max_header_bytes = self.max_header_bytes;
        async move {
            let mut head = Vec::with_capacity(1024);
            let mut buf = [0u8; 1024];
            loop {
                let n = tokio::time::timeout(read_timeout, conn.read(&mut buf))
                    .await
                    .map_err(|_| {
                        io::Error::new(io::ErrorKind::TimedOut, "request head read timed out")
                    })??;
                if n == 0 {
                    return Ok(());
                }
                head.extend_from_slice(&buf[..n]);
                if head.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
                if head.len() > max_header_bytes {
                    conn.write_all(b"HTTP/1.0 431 Request Header Fields Too Large\r\n\r\n")
                        .await?;
                    return conn.shutdown().await;
                }
            }

            let body = format!("hello from pid {}\n", std::process::id());
            let resp = format!(
                "HTTP/1.0 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n{body}",
                body.len()
            );
            conn.write_all(resp.as_bytes()).await?;
            conn.shutdown().await
        }
    }
}

/// Parses arguments, builds the server, and runs it to completion.
pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?
        .validate()
        .context("invalid server configuration")?;

    let app = Greeter {
        read_timeout: config.read_timeout(),
        max_header_bytes: usize::try_from(config.max_header_bytes).unwrap_or(1 << 20),
    };

    let server = Server::new(config, app).context("server construction failed")?;
    if cli.upgrade && !server.is_successor() {
        warn!("--upgrade set but no inherited listener; performed a cold bind");
    }
    info!(addr = %server.local_addr()?, upgrade = cli.upgrade, "moltd starting");

    server.run().await.context("server terminated with error")?;
    Ok(())
}

/// Builds the [`ServerConfig`] from a JSON file or from flags.
fn load_config(cli: &Cli) -> anyhow::Result<ServerConfig> {
    if let Some(path) = &cli.config {
        let data =
            std::fs::read_to_string(path).with_context(|| format!("reading config {path}"))?;
        let config: ServerConfig =
            serde_json::from_str(&data).with_context(|| format!("parsing config {path}"))?;
        return Ok(config);
    }
    Ok(ServerConfig {
        addr: cli.addr.clone(),
        pid_file: cli.pid_file.clone(),
        tls_on: cli.tls_cert.is_some(),
        tls_cert: cli.tls_cert.clone().unwrap_or_default(),
        tls_key: cli.tls_key.clone().unwrap_or_default(),
        ..ServerConfig::default()
    })
}
