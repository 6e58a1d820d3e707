//! Pid file recording.
//!
//! Every process start — cold start or successor — overwrites the
//! configured path with the current pid. The error policy is
//! deliberately asymmetric and preserved from the original design: a
//! failed write is logged and tolerated, but a failed existence check on
//! the same path immediately afterwards is fatal.

use std::fs;
use std::path::Path;

use tracing::warn;

use crate::error::{Error, Result};

/// Overwrites `path` with the current process id as a decimal string.
///
/// A write failure is logged and non-fatal. If the file does not exist
/// after the write, [`Error::PidFile`] is returned; callers treat this
/// as fatal and the process exits non-zero.
pub fn record(path: &str) -> Result<()> {
    write_pid(path, std::process::id())
}

/// Inner worker, parameterized over the pid for tests.
fn write_pid(path: &str, pid: u32) -> Result<()> {
    if let Err(e) = fs::write(path, pid.to_string()) {
        warn!(path, error = %e, "failed to write pid file");
    }
    if !Path::new(path).exists() {
        return Err(Error::PidFile(path.to_owned()));
    }
    Ok(())
}
