//! Frame-availability notifier.
//!
//! A counting signal with cooperative cancellation, shared between the
//! capture provider's producer thread (which calls [`signal`]) and the
//! session loop (which calls [`wait`]). It is also the process-wide
//! cancellation flag: once [`stop`] is called every current and future
//! wait returns [`WaitResult::Cancelled`], and stopping cannot be undone.
//!
//! [`signal`]: FrameNotifier::signal
//! [`wait`]: FrameNotifier::wait
//! [`stop`]: FrameNotifier::stop

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Upper bound on how long a waiter sleeps before re-checking the
/// cancellation flag.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Outcome of [`FrameNotifier::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// A frame is available. Carries the pending count *before* this
    /// wait consumed one, so `Frames(n)` with `n > 1` means backlog.
    Frames(u32),
    /// [`FrameNotifier::stop`] was called.
    Cancelled,
}

#[derive(Debug, Default)]
struct PendingFrames {
    pending: u32,
    stopped: bool,
}

/// Counting frame signal with cancellation. See the module docs.
#[derive(Debug, Default)]
pub struct FrameNotifier {
    state: Mutex<PendingFrames>,
    available: Condvar,
}

impl FrameNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one new frame and wake a waiter. Never blocks beyond the
    /// O(1) critical section.
    pub fn signal(&self) {
        let mut state = self.state.lock();
        state.pending = state.pending.saturating_add(1);
        drop(state);
        self.available.notify_one();
    }

    /// Block until a frame is pending or the notifier is stopped.
    ///
    /// The condition variable is re-armed every [`POLL_INTERVAL`] so a
    /// stop issued without a matching notification is still observed.
    pub fn wait(&self) -> WaitResult {
        let mut state = self.state.lock();
        loop {
            if state.stopped {
                return WaitResult::Cancelled;
            }
            if state.pending > 0 {
                let count = state.pending;
                state.pending -= 1;
                return WaitResult::Frames(count);
            }
            self.available.wait_for(&mut state, POLL_INTERVAL);
        }
    }

    /// Account for `n` frames the consumer discarded itself. Clamps at 0.
    pub fn report_extra_consumption(&self, n: u32) {
        let mut state = self.state.lock();
        state.pending = state.pending.saturating_sub(n);
    }

    /// Cancel all current and future waits. Idempotent.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        drop(state);
        self.available.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Frames signalled but not yet consumed.
    pub fn pending(&self) -> u32 {
        self.state.lock().pending
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn waits_return_descending_counts() {
        let n = FrameNotifier::new();
        for _ in 0..5 {
            n.signal();
        }
        for expected in (1..=5).rev() {
            assert_eq!(n.wait(), WaitResult::Frames(expected));
        }
        assert_eq!(n.pending(), 0);
    }

    #[test]
    fn stop_cancels_future_waits_without_consuming() {
        let n = FrameNotifier::new();
        n.signal();
        n.stop();
        assert_eq!(n.wait(), WaitResult::Cancelled);
        assert_eq!(n.wait(), WaitResult::Cancelled);
        assert_eq!(n.pending(), 1);
        n.stop();
        assert!(n.is_stopped());
    }

    #[test]
    fn stop_unblocks_outstanding_wait() {
        let n = Arc::new(FrameNotifier::new());
        let waiter = {
            let n = Arc::clone(&n);
            thread::spawn(move || n.wait())
        };
        thread::sleep(Duration::from_millis(20));
        let start = Instant::now();
        n.stop();
        assert_eq!(waiter.join().unwrap(), WaitResult::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn signal_from_other_thread_wakes_waiter() {
        let n = Arc::new(FrameNotifier::new());
        let producer = {
            let n = Arc::clone(&n);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                n.signal();
            })
        };
        assert_eq!(n.wait(), WaitResult::Frames(1));
        producer.join().unwrap();
    }

    #[test]
    fn extra_consumption_clamps_at_zero() {
        let n = FrameNotifier::new();
        n.signal();
        n.signal();
        n.report_extra_consumption(5);
        assert_eq!(n.pending(), 0);

        n.signal();
        n.signal();
        n.signal();
        n.report_extra_consumption(2);
        assert_eq!(n.pending(), 1);
        assert_eq!(n.wait(), WaitResult::Frames(1));
    }

    #[test]
    fn every_signal_matched_once() {
        let n = Arc::new(FrameNotifier::new());
        let producer = {
            let n = Arc::clone(&n);
            thread::spawn(move || {
                for _ in 0..1000 {
                    n.signal();
                }
            })
        };
        let mut consumed = 0u32;
        while consumed < 1000 {
            match n.wait() {
                WaitResult::Frames(c) if c > 1 && consumed % 3 == 0 => {
                    n.report_extra_consumption(c - 1);
                    consumed += c;
                }
                WaitResult::Frames(_) => consumed += 1,
                WaitResult::Cancelled => unreachable!(),
            }
        }
        producer.join().unwrap();
        assert_eq!(consumed, 1000);
        assert_eq!(n.pending(), 0);
    }
}
