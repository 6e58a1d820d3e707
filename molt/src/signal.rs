//! Signal registration and the single-consumer event queue.
//!
//! External signals are converted into [`Event`]s on a bounded channel
//! that the supervisor loop drains strictly one at a time, in arrival
//! order — two signal-triggered actions never run concurrently.

use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// A lifecycle trigger derived from an external signal (or injected
/// directly by a supervisor or test through
/// [`crate::Server::run_with_events`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Event {
    /// Spawn a successor and hand off the listening socket (SIGHUP).
    Restart,
    /// Stop accepting, drain, terminate (SIGINT, SIGTERM, SIGQUIT).
    Shutdown,
}

/// Registers the recognized signals and returns the event queue.
///
/// SIGHUP maps to [`Event::Restart`]; SIGINT, SIGTERM, and SIGQUIT all
/// map to [`Event::Shutdown`]. Registration failure is a startup error.
/// The forwarding task exits when the receiver is dropped.
pub fn listen() -> Result<mpsc::Receiver<Event>> {
    let mut hangup = signal(SignalKind::hangup()).map_err(Error::Signal)?;
    let mut interrupt = signal(SignalKind::interrupt()).map_err(Error::Signal)?;
    let mut terminate = signal(SignalKind::terminate()).map_err(Error::Signal)?;
    let mut quit = signal(SignalKind::quit()).map_err(Error::Signal)?;

    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = hangup.recv() => Event::Restart,
                _ = interrupt.recv() => Event::Shutdown,
                _ = terminate.recv() => Event::Shutdown,
                _ = quit.recv() => Event::Shutdown,
            };
            if tx.send(event).await.is_err() {
                // Supervisor gone; stop forwarding.
                return;
            }
        }
    });
    Ok(rx)
}
