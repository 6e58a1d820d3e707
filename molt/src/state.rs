//! Server lifecycle state machine.

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a server instance.
///
/// Transitions are strictly monotonic: `Init` → `Running` →
/// `ShuttingDown` → `Terminate`, never backwards. `ShuttingDown` is
/// never followed by `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
#[non_exhaustive]
pub enum State {
    /// Constructed but not yet serving.
    Init = 0,
    /// Accepting connections.
    Running = 1,
    /// Listener closed; draining in-flight connections.
    ShuttingDown = 2,
    /// Drain complete (or forced); the server has returned.
    Terminate = 3,
}

impl State {
    /// Decodes the atomic representation.
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Init,
            1 => Self::Running,
            2 => Self::ShuttingDown,
            _ => Self::Terminate,
        }
    }
}

/// Atomic holder of the current [`State`], shared between the supervisor
/// loop, the signal dispatcher, and external observers.
#[derive(Debug)]
pub struct Lifecycle(AtomicU8);

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// Creates a lifecycle in [`State::Init`].
    pub fn new() -> Self {
        Self(AtomicU8::new(State::Init as u8))
    }

    /// Returns the current state.
    pub fn current(&self) -> State {
        State::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Attempts to advance to `to`.
    ///
    /// Returns `true` if the transition was performed. A request to move
    /// to the current or an earlier state is a no-op returning `false`,
    /// which makes repeated shutdown triggers idempotent.
    pub fn advance(&self, to: State) -> bool {
        let mut cur = self.0.load(Ordering::SeqCst);
        loop {
            if cur >= to as u8 {
                return false;
            }
            match self
                .0
                .compare_exchange(cur, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
    }

    /// Whether the current state equals `s`.
    pub fn is(&self, s: State) -> bool {
        self.current() == s
    }
}
