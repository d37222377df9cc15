use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::{Dispatcher, ListenerId, Tick, TickListener, TickSource};

/// Intervals below this many nanoseconds are generated by spinning.
pub const BUSY_WAIT_THRESHOLD_NS: u64 = 10_000_000;
/// Intervals at or above this many nanoseconds are generated with millisecond sleeps.
pub const MILLISECOND_THRESHOLD_NS: u64 = 50_000_000;

const PERIODIC_MAX_SLICE: Duration = Duration::from_millis(10);
const PERIODIC_MIN_SLICE: Duration = Duration::from_millis(1);
const MILLISECOND_MAX_SLICE_MS: u64 = 100;
const MILLISECOND_MIN_SLICE_MS: u64 = 5;

#[derive(Debug, Error)]
pub enum ClockError {
    #[error("Clock already running")]
    AlreadyRunning,
    #[error("Failed to spawn tick thread: {0:?}")]
    Spawn(#[from] io::Error),
}

/// How the tick thread waits for the next deadline. Shorter intervals trade CPU for precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingStrategy {
    /// Spin until the deadline.
    BusyWait,
    /// Sleep a quarter of the remaining time, at most 10ms, spinning once less than 1ms is left.
    Periodic,
    /// Like [`TimingStrategy::Periodic`] in whole milliseconds: slices of at most 100ms, spinning
    /// once a slice would be 5ms or less.
    Millisecond,
}

impl TimingStrategy {
    /// Picks the strategy for the given tick interval.
    pub const fn for_interval(interval_ns: u64) -> Self {
        if interval_ns < BUSY_WAIT_THRESHOLD_NS {
            Self::BusyWait
        } else if interval_ns < MILLISECOND_THRESHOLD_NS {
            Self::Periodic
        } else {
            Self::Millisecond
        }
    }

    /// Waits for part of `remaining`. Callers re-check the deadline after every pause.
    fn pause(self, remaining: Duration) {
        match self {
            Self::BusyWait => std::hint::spin_loop(),
            Self::Periodic => {
                let slice = (remaining / 4).min(PERIODIC_MAX_SLICE);
                if slice > PERIODIC_MIN_SLICE {
                    thread::sleep(slice);
                } else {
                    std::hint::spin_loop();
                }
            }
            Self::Millisecond => {
                let slice = (remaining.as_millis() as u64 / 4).min(MILLISECOND_MAX_SLICE_MS);
                if slice > MILLISECOND_MIN_SLICE_MS {
                    thread::sleep(Duration::from_millis(slice));
                } else {
                    std::hint::spin_loop();
                }
            }
        }
    }
}

/// A clock that dispatches one tick per interval of wall time on a dedicated thread.
///
/// The clock is created stopped. [`RealTimeClock::start`] spawns the tick thread and
/// [`RealTimeClock::stop`] asks it to exit. Ticks fire as soon as possible at or after their
/// deadline; when the thread falls behind, overdue ticks are dispatched back to back so that no
/// tick is skipped.
///
/// Removing the last listener stops the clock, unless keep-alive is set.
#[derive(Debug)]
pub struct RealTimeClock {
    dispatcher: Arc<Dispatcher>,
    interval_ns: u64,
    strategy: TimingStrategy,
    keep_alive: AtomicBool,
    /// Cancellation flag of the running tick thread, if any.
    running: Mutex<Option<Arc<AtomicBool>>>,
}

impl RealTimeClock {
    /// Creates a stopped clock ticking every `interval_ns` nanoseconds.
    pub fn new(interval_ns: u64) -> Self {
        let interval_ns = interval_ns.max(1);

        Self {
            dispatcher: Arc::new(Dispatcher::new()),
            interval_ns,
            strategy: TimingStrategy::for_interval(interval_ns),
            keep_alive: AtomicBool::new(false),
            running: Mutex::new(None),
        }
    }

    /// Overrides the timing strategy picked from the interval. Takes effect on the next start.
    pub fn with_strategy(mut self, strategy: TimingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn interval_ns(&self) -> u64 {
        self.interval_ns
    }

    pub fn strategy(&self) -> TimingStrategy {
        self.strategy
    }

    /// When set, the clock keeps running after its last listener is removed.
    pub fn set_keep_alive(&self, keep_alive: bool) {
        self.keep_alive.store(keep_alive, Ordering::Relaxed);
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().as_ref().is_some_and(|cancel| !cancel.load(Ordering::Acquire))
    }

    /// Starts the tick thread. Counting resumes from the current tick, so wrappers registered
    /// across a stop keep their schedule; use [`TickSource::reset`] to count from 0 again.
    pub fn start(&self) -> Result<(), ClockError> {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|cancel| !cancel.load(Ordering::Acquire)) {
            return Err(ClockError::AlreadyRunning);
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let ticker = Ticker {
            dispatcher: Arc::clone(&self.dispatcher),
            cancel: Arc::clone(&cancel),
            interval: Duration::from_nanos(self.interval_ns),
            strategy: self.strategy,
        };

        thread::Builder::new().name("shaper-clock".to_string()).spawn(move || ticker.run())?;
        *running = Some(cancel);

        debug!(interval_ns = self.interval_ns, strategy = ?self.strategy, "Clock started");

        Ok(())
    }

    /// Asks the tick thread to exit. Does not wait for it, so it is safe to call from a listener.
    /// A tick that is already being dispatched completes.
    pub fn stop(&self) {
        if let Some(cancel) = self.running.lock().take() {
            cancel.store(true, Ordering::Release);
            debug!(tick = self.dispatcher.current_tick(), "Clock stopped");
        }
    }
}

impl Drop for RealTimeClock {
    fn drop(&mut self) {
        self.stop();
    }
}

impl TickSource for RealTimeClock {
    fn add_listener(&self, listener: Arc<dyn TickListener>) -> ListenerId {
        self.dispatcher.add_listener(listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        let removed = self.dispatcher.remove_listener(id);

        if removed && self.dispatcher.is_empty() && !self.keep_alive() && self.is_running() {
            debug!("Last listener removed, stopping clock");
            self.stop();
        }

        removed
    }

    /// Stops the clock. The next [`RealTimeClock::start`] counts from 0 again.
    fn reset(&self) {
        self.stop();
        self.dispatcher.reset();
    }

    fn current_tick(&self) -> Tick {
        self.dispatcher.current_tick()
    }
}

/// The tick thread.
struct Ticker {
    dispatcher: Arc<Dispatcher>,
    cancel: Arc<AtomicBool>,
    interval: Duration,
    strategy: TimingStrategy,
}

impl Ticker {
    fn run(self) {
        let mut next = Instant::now() + self.interval;

        while !self.cancel.load(Ordering::Acquire) {
            let now = Instant::now();
            if now >= next {
                self.dispatcher.dispatch();
                next += self.interval;
                continue;
            }

            self.strategy.pause(next - now);
        }
    }
}
