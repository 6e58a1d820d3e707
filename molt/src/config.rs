//! Server configuration and construction-time validation.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Compression disabled.
pub const COMPRESS_DISABLED: i32 = -1;
/// Compression unset; resolves to gzip.
pub const COMPRESS_DEFAULT: i32 = 0;
/// gzip compression.
pub const COMPRESS_GZIP: i32 = 1;
/// DEFLATE compression.
pub const COMPRESS_FLATE: i32 = 2;

/// Resolved compression mode, consumed by the application collaborator.
///
/// The core never compresses anything itself; it only validates the
/// configured mode and threshold and hands them to the request handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum CompressMode {
    /// No response compression.
    Disabled,
    /// gzip response compression.
    Gzip,
    /// DEFLATE response compression.
    Flate,
}

/// Configuration for a [`crate::Server`].
///
/// Immutable after validation: [`ServerConfig::validate`] is called exactly
/// once by [`crate::Server::new`] and returns a copy with defaults resolved.
/// Invalid values fail construction synchronously.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address in `host:port` form. Required.
    pub addr: String,
    /// Free-form run mode label (e.g. `product`, `dev`), exposed to the
    /// application collaborator and otherwise opaque to the core.
    #[serde(default)]
    pub run_mod: String,
    /// Read timeout in seconds. Values `<= 0` default to 30.
    #[serde(default)]
    pub read_timeout_secs: i64,
    /// Write timeout in seconds. Values `<= 0` default to 30.
    #[serde(default)]
    pub write_timeout_secs: i64,
    /// Maximum request header size in bytes. Values `<= 0` default to 1 MiB.
    #[serde(default)]
    pub max_header_bytes: i64,
    /// Compression mode: one of [`COMPRESS_DISABLED`], [`COMPRESS_DEFAULT`],
    /// [`COMPRESS_GZIP`], [`COMPRESS_FLATE`]. Anything else fails validation.
    #[serde(default)]
    pub compress: i32,
    /// Minimum response size in bytes before compression applies.
    /// Zero defaults to 200.
    #[serde(default)]
    pub compress_min: i64,
    /// Enables TLS. Only effective when both `tls_cert` and `tls_key`
    /// are set; otherwise the server listens in plaintext.
    #[serde(default)]
    pub tls_on: bool,
    /// Path to the PEM certificate chain.
    #[serde(default)]
    pub tls_cert: String,
    /// Path to the PEM private key.
    #[serde(default)]
    pub tls_key: String,
    /// Path the current process id is written to on start. Required.
    pub pid_file: String,
}

impl ServerConfig {
    /// Validates the configuration and resolves defaults.
    ///
    /// Returns a copy with timeouts, header limit, and compression
    /// threshold filled in, or [`Error::Config`] naming the offending
    /// field. No partial resolution: the input is untouched on failure.
    pub fn validate(mut self) -> Result<Self> {
        if self.addr.is_empty() {
            return Err(Error::Config(
                "server addr can't be empty [host:port]".into(),
            ));
        }
        if self.pid_file.is_empty() {
            return Err(Error::Config("pid_file can't be empty".into()));
        }
        if !(COMPRESS_DISABLED..=COMPRESS_FLATE).contains(&self.compress) {
            return Err(Error::Config(format!(
                "compress must be one of -1 (disabled), 0 (default), 1 (gzip), 2 (flate); got {}",
                self.compress
            )));
        }
        if self.read_timeout_secs <= 0 {
            self.read_timeout_secs = 30;
        }
        if self.write_timeout_secs <= 0 {
            self.write_timeout_secs = 30;
        }
        if self.max_header_bytes <= 0 {
            self.max_header_bytes = 1 << 20;
        }
        if self.compress == COMPRESS_DEFAULT {
            self.compress = COMPRESS_GZIP;
        }
        if self.compress_min == 0 {
            self.compress_min = 200;
        }
        Ok(self)
    }

    /// Resolved read timeout.
    #[allow(clippy::cast_sign_loss)]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs.max(0) as u64)
    }

    /// Resolved write timeout.
    #[allow(clippy::cast_sign_loss)]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs.max(0) as u64)
    }

    /// Resolved compression mode.
    pub fn compress_mode(&self) -> CompressMode {
        match self.compress {
            COMPRESS_DISABLED => CompressMode::Disabled,
            COMPRESS_FLATE => CompressMode::Flate,
            _ => CompressMode::Gzip,
        }
    }

    /// Whether TLS is effective: enabled and both PEM paths present.
    pub fn tls_enabled(&self) -> bool {
        self.tls_on && !self.tls_cert.is_empty() && !self.tls_key.is_empty()
    }
}
