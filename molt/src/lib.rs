//! Zero-downtime HTTP(S) serving core.
//!
//! `molt` owns the hard part of running a long-lived network server on
//! Unix: binding one listening socket, handing it to a freshly spawned
//! successor process on a restart signal without refusing a single
//! connection attempt, and draining in-flight connections within a
//! bounded grace period on shutdown. Request handling is supplied by the
//! caller through the [`Application`] trait and is opaque to the core.
//!
//! # Quick start
//!
//! ```no_run
//! use std::future::Future;
//! use std::io;
//!
//! use molt::{Application, Conn, Server, ServerConfig};
//! use tokio::io::AsyncWriteExt;
//!
//! struct Hello;
//!
//! impl Application for Hello {
//!     fn handle(&self, mut conn: Conn) -> impl Future<Output = io::Result<()>> + Send {
//!         async move { conn.write_all(b"HTTP/1.0 200 OK\r\n\r\nhi\n").await }
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> molt::Result<()> {
//!     let config = ServerConfig {
//!         addr: "127.0.0.1:8080".into(),
//!         pid_file: "/tmp/hello.pid".into(),
//!         ..ServerConfig::default()
//!     };
//!     // SIGHUP re-executes the binary with the socket inherited;
//!     // SIGINT/SIGTERM/SIGQUIT drain and shut down.
//!     Server::new(config, Hello)?.run().await
//! }
//! ```
//!
//! # Lifecycle
//!
//! `Init → Running → ShuttingDown → Terminate`, strictly forward. A
//! restart signal spawns a successor that adopts the exported listening
//! descriptor (no second bind) and, once running, signals this process
//! to terminate — the parent never tears itself down proactively.

mod config;
mod error;
#[cfg(unix)]
mod handoff;
#[cfg(unix)]
mod listener;
mod pidfile;
#[cfg(unix)]
mod server;
#[cfg(unix)]
mod signal;
mod state;
#[cfg(unix)]
mod tls;
#[cfg(unix)]
mod tracker;

pub use config::{
    COMPRESS_DEFAULT, COMPRESS_DISABLED, COMPRESS_FLATE, COMPRESS_GZIP, CompressMode,
    ServerConfig,
};
pub use error::{Error, Result};
#[cfg(unix)]
pub use handoff::{RestartGuard, UPGRADE_FLAG};
#[cfg(unix)]
pub use listener::{ENV_LISTEN_FD, Listener};
#[cfg(unix)]
pub use server::{Application, Conn, DRAIN_GRACE, Server, ServerHandle};
#[cfg(unix)]
pub use signal::Event;
pub use state::{Lifecycle, State};
#[cfg(unix)]
pub use tls::TlsDecorator;
#[cfg(unix)]
pub use tracker::{ConnGuard, ConnTracker};
