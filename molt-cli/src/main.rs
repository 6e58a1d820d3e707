//! moltd — demo HTTP server built on the molt zero-downtime core.
//!
//! SIGHUP re-executes the binary and hands it the listening socket;
//! SIGINT, SIGTERM, and SIGQUIT drain in-flight connections and exit.

// Standalone binary — stderr is the correct channel before logging is up.
#![allow(clippy::print_stderr)]

#[cfg(unix)]
mod serve;

#[cfg(unix)]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    serve::run().await
}

#[cfg(not(unix))]
fn main() {
    eprintln!("[moltd] only supported on Unix");
    std::process::exit(1);
}
