use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// The longest a [`WakeSignal::wait`] call sleeps without being woken.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

/// A bounded sleep/wake primitive.
///
/// Waiters are released either by [`WakeSignal::wake`] or by the wait timeout, whichever comes
/// first. Callers always re-check their condition in a loop: a wake-up carries no information
/// besides "something may have changed", and spurious or periodic wake-ups are expected.
///
/// To avoid losing a wake that happens between checking the condition and going to sleep, read
/// the [`generation`](Self::generation) before checking and hand it to
/// [`wait_since`](Self::wait_since).
#[derive(Debug)]
pub struct WakeSignal {
    generation: Mutex<u64>,
    cvar: Condvar,
    timeout: Duration,
}

impl Default for WakeSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl WakeSignal {
    /// Creates a signal with the [`DEFAULT_WAIT_TIMEOUT`].
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_WAIT_TIMEOUT)
    }

    /// Creates a signal whose waits return after at most `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { generation: Mutex::new(0), cvar: Condvar::new(), timeout }
    }

    /// Returns the current wake generation.
    #[inline]
    pub fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    /// Wakes every thread currently waiting on this signal.
    pub fn wake(&self) {
        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        self.cvar.notify_all();
    }

    /// Blocks until the next [`wake`](Self::wake) or the timeout.
    pub fn wait(&self) {
        let mut generation = self.generation.lock();
        let _ = self.cvar.wait_for(&mut generation, self.timeout);
    }

    /// Blocks until the generation moves past `seen` or the timeout elapses. Returns immediately
    /// if a wake already happened after `seen` was read.
    pub fn wait_since(&self, seen: u64) {
        let mut generation = self.generation.lock();
        if *generation != seen {
            return;
        }

        let _ = self.cvar.wait_for(&mut generation, self.timeout);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Arc,
        thread,
        time::{Duration, Instant},
    };

    use super::*;

    #[test]
    fn test_wait_times_out() {
        let signal = WakeSignal::with_timeout(Duration::from_millis(20));

        let start = Instant::now();
        signal.wait();
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_wait_since_returns_after_missed_wake() {
        let signal = WakeSignal::with_timeout(Duration::from_secs(30));

        let seen = signal.generation();
        signal.wake();

        let start = Instant::now();
        signal.wait_since(seen);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_wake_releases_waiter() {
        let signal = Arc::new(WakeSignal::with_timeout(Duration::from_secs(30)));

        let waiter = {
            let signal = Arc::clone(&signal);
            let seen = signal.generation();
            thread::spawn(move || {
                let start = Instant::now();
                signal.wait_since(seen);
                start.elapsed()
            })
        };

        thread::sleep(Duration::from_millis(20));
        signal.wake();

        assert!(waiter.join().unwrap() < Duration::from_secs(10));
    }
}
