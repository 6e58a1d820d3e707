//! In-flight connection counting and drain support.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::warn;

/// Shared counter of in-flight connections.
///
/// The accept loop takes a [`ConnGuard`] per accepted connection; the
/// shutdown path blocks on [`ConnTracker::drain`] until the count reaches
/// zero or the grace period elapses. The counter saturates at zero: a
/// [`done`](ConnTracker::done) without a matching
/// [`add`](ConnTracker::add) is logged and clamped, never a panic.
#[derive(Debug, Default)]
pub struct ConnTracker {
    /// Current number of in-flight connections.
    count: AtomicUsize,
    /// Woken whenever the count drops to zero.
    idle: Notify,
}

impl ConnTracker {
    /// Creates a tracker with zero in-flight connections.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one more in-flight connection.
    pub fn add(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    /// Records the completion of one connection.
    ///
    /// Saturates at zero; an unmatched call is a recoverable condition.
    pub fn done(&self) {
        let prev = self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match prev {
            Ok(1) => self.idle.notify_waiters(),
            Ok(_) => {}
            Err(_) => warn!("connection counter decremented below zero; clamped"),
        }
    }

    /// Current in-flight connection count.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Returns an RAII guard covering one connection.
    pub fn guard(self: &Arc<Self>) -> ConnGuard {
        self.add();
        ConnGuard {
            tracker: Arc::clone(self),
        }
    }

    /// Resolves once the count reaches zero; immediately if already zero.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Waits for the count to reach zero, bounded by `grace`.
    ///
    /// Returns `true` if the tracker drained cleanly, `false` if the
    /// grace period elapsed with connections still outstanding.
    pub async fn drain(&self, grace: Duration) -> bool {
        tokio::select! {
            () = self.wait_idle() => true,
            () = tokio::time::sleep(grace) => false,
        }
    }
}

/// RAII handle for one in-flight connection.
///
/// Dropping the guard records completion, including on panic of the
/// connection task.
#[derive(Debug)]
pub struct ConnGuard {
    /// Tracker the guard reports back to.
    tracker: Arc<ConnTracker>,
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        self.tracker.done();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_done_counts() {
        let t = ConnTracker::new();
        assert_eq!(t.count(), 0);
        t.add();
        t.add();
        assert_eq!(t.count(), 2);
        t.done();
        assert_eq!(t.count(), 1);
        t.done();
        assert_eq!(t.count(), 0);
    }

    #[test]
    fn underflow_clamps_at_zero() {
        let t = ConnTracker::new();
        t.done();
        t.done();
        assert_eq!(t.count(), 0);
        t.add();
        assert_eq!(t.count(), 1);
    }

    #[test]
    fn guard_decrements_on_drop() {
        let t = Arc::new(ConnTracker::new());
        let g1 = t.guard();
        let g2 = t.guard();
        assert_eq!(t.count(), 2);
        drop(g1);
        assert_eq!(t.count(), 1);
        drop(g2);
        assert_eq!(t.count(), 0);
    }

    #[tokio::test]
    async fn wait_idle_returns_immediately_when_zero() {
        let t = ConnTracker::new();
        tokio::time::timeout(Duration::from_millis(50), t.wait_idle())
            .await
            .expect("wait_idle should resolve with count 0");
    }

    #[tokio::test]
    async fn drain_blocks_until_completions() {
        let t = Arc::new(ConnTracker::new());
        let guards: Vec<_> = (0..3).map(|_| t.guard()).collect();

        let waiter = Arc::clone(&t);
        let drained = tokio::spawn(async move { waiter.drain(Duration::from_secs(5)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!drained.is_finished());

        drop(guards);
        assert!(drained.await.unwrap(), "drain should report clean");
    }

    #[tokio::test]
    async fn drain_unblocks_after_grace_with_outstanding() {
        let t = Arc::new(ConnTracker::new());
        let _held = t.guard();
        let clean = t.drain(Duration::from_millis(30)).await;
        assert!(!clean, "drain should report forced after grace");
        assert_eq!(t.count(), 1, "outstanding connection still counted");
    }
}
