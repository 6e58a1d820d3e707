//! Error types for molt operations.

use std::io;

/// Alias for `Result<T, molt::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by server construction and lifecycle operations.
///
/// Construction-time failures (`Config`, `Bind`, `TlsLoad`) are returned
/// synchronously from [`crate::Server::new`] and never produce a partially
/// initialized server. Runtime failures are logged and handled locally,
/// with two exceptions surfaced through [`crate::Server::run`]: a pid file
/// that cannot be verified after writing, and a failed signal registration.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A configuration field failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The `host:port` address that was requested.
        addr: String,
        /// The underlying socket error.
        #[source]
        source: io::Error,
    },

    /// TLS certificate or key material could not be loaded.
    #[error("failed to load TLS material from {path}: {reason}")]
    TlsLoad {
        /// The PEM file that was being read.
        path: String,
        /// What went wrong while reading or parsing it.
        reason: String,
    },

    /// The pid file did not exist after being written.
    #[error("pid file {0} missing after write")]
    PidFile(String),

    /// Spawning the successor process failed.
    #[error("failed to spawn successor: {0}")]
    Handoff(#[source] io::Error),

    /// A Unix signal stream could not be registered.
    #[error("signal registration failed: {0}")]
    Signal(#[source] io::Error),

    /// An I/O error from listener or handoff operations.
    #[error(transparent)]
    Io(#[from] io::Error),
}
