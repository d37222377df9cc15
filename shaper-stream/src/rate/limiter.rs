use std::{
    io,
    sync::{
        atomic::{AtomicBool, AtomicI64, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use shaper_clock::{ListenerId, Tick, TickListener, TickSource};
use shaper_common::{would_block, StreamError, WakeSignal};
use tracing::{debug, trace};

/// A hook called by a blocked [`RateLimiter`] before it goes to sleep. Returning `true` makes
/// the limiter re-check its budget immediately instead of sleeping.
///
/// Tests use this to advance a [`SimulationClock`](shaper_clock::SimulationClock) from the
/// blocked thread.
pub type IdleHook = Arc<dyn Fn() -> bool + Send + Sync>;

/// What a [`RateLimiter`] does when the budget of the current tick is used up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BlockingPolicy {
    /// Wait for the budget to be replenished.
    #[default]
    Block,
    /// Fail with [`io::ErrorKind::WouldBlock`].
    WouldBlock,
    /// Fail with an [`io::ErrorKind::Other`] error. Useful to assert that a test never blocks.
    Fail,
}

/// The budget state, shared with the clock.
#[derive(Debug)]
struct Budget {
    spent: AtomicI64,
    capacity: AtomicI64,
    prescale: AtomicI64,
    timewise: AtomicI64,
    signal: WakeSignal,
}

impl Budget {
    fn recompute_timewise(&self) {
        let capacity = self.capacity.load(Ordering::Acquire);
        let spent = self.spent.load(Ordering::Acquire);
        self.timewise.store((capacity - spent).max(0), Ordering::Release);
    }

    /// Lowers `spent` by `n`, never below 0. Returns the new value.
    fn release(&self, n: i64) -> i64 {
        let mut spent = self.spent.load(Ordering::Acquire);
        loop {
            let next = (spent - n).max(0);
            match self.spent.compare_exchange_weak(spent, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(actual) => spent = actual,
            }
        }
    }
}

impl TickListener for Budget {
    fn on_tick(&self, tick: Tick) {
        let prescale = self.prescale.load(Ordering::Acquire).max(1);
        if tick.rem_euclid(prescale) != 0 {
            return;
        }

        let capacity = self.capacity.load(Ordering::Acquire);
        let spent = self.release(capacity);
        self.timewise.store((capacity - spent).max(0), Ordering::Release);

        trace!(tick, spent, capacity, "Budget replenished");
        self.signal.wake();
    }
}

/// A per-tick byte budget.
///
/// Every `prescale` ticks, `capacity` units are returned to the budget (`spent` decays by
/// `capacity`, never below zero). Acquisition is lock-free: [`RateLimiter::take`] grants as much
/// as is left in the current tick and only waits while nothing is left.
///
/// The limiter registers with its clock on construction and deregisters on
/// [`close`](RateLimiter::close) or drop.
pub struct RateLimiter {
    budget: Arc<Budget>,
    clock: Arc<dyn TickSource>,
    listener: Mutex<Option<ListenerId>>,
    closed: AtomicBool,
    policy: BlockingPolicy,
    idle_hook: Option<IdleHook>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("budget", &self.budget)
            .field("policy", &self.policy)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Creates a limiter granting `capacity` units every `prescale` ticks of `clock`.
    pub fn new(clock: Arc<dyn TickSource>, capacity: u32, prescale: u32) -> Self {
        let capacity = i64::from(capacity);
        let budget = Arc::new(Budget {
            spent: AtomicI64::new(0),
            capacity: AtomicI64::new(capacity),
            prescale: AtomicI64::new(i64::from(prescale.max(1))),
            timewise: AtomicI64::new(capacity),
            signal: WakeSignal::new(),
        });

        let listener = clock.add_listener(Arc::clone(&budget) as Arc<dyn TickListener>);

        Self {
            budget,
            clock,
            listener: Mutex::new(Some(listener)),
            closed: AtomicBool::new(false),
            policy: BlockingPolicy::default(),
            idle_hook: None,
        }
    }

    pub fn policy(&self) -> BlockingPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: BlockingPolicy) {
        self.policy = policy;
    }

    /// Installs a hook that runs whenever an acquisition would block.
    pub fn set_idle_hook(&mut self, hook: Option<IdleHook>) {
        self.idle_hook = hook;
    }

    /// The number of units granted per replenishment.
    pub fn capacity(&self) -> u32 {
        self.budget.capacity.load(Ordering::Acquire).clamp(0, u32::MAX as i64) as u32
    }

    pub fn prescale(&self) -> u32 {
        self.budget.prescale.load(Ordering::Acquire).clamp(1, u32::MAX as i64) as u32
    }

    /// Units taken since the last replenishment.
    pub fn spent(&self) -> u64 {
        self.budget.spent.load(Ordering::Acquire).max(0) as u64
    }

    /// An estimate of the units that can still be taken before the next replenishment.
    pub fn timewise_available(&self) -> usize {
        self.budget.timewise.load(Ordering::Acquire).max(0) as usize
    }

    /// Changes the capacity. The budget left in the current tick follows immediately.
    pub fn set_byte_rate(&self, capacity: u32) {
        self.budget.capacity.store(i64::from(capacity), Ordering::Release);
        self.budget.recompute_timewise();
        self.budget.signal.wake();
    }

    pub fn set_prescale(&self, prescale: u32) {
        self.budget.prescale.store(i64::from(prescale.max(1)), Ordering::Release);
        self.budget.recompute_timewise();
        self.budget.signal.wake();
    }

    /// Takes a single unit, waiting for it according to the [`BlockingPolicy`].
    pub fn take_one(&self) -> io::Result<()> {
        self.take(1).map(|_| ())
    }

    /// Takes up to `n` units. Returns `min(n, capacity - spent)`, waiting only while that would
    /// be 0.
    pub fn take(&self, n: usize) -> io::Result<usize> {
        if n == 0 {
            return Ok(0);
        }

        let wanted = i64::try_from(n).unwrap_or(i64::MAX);

        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(StreamError::Closed.into());
            }

            let seen = self.budget.signal.generation();
            let capacity = self.budget.capacity.load(Ordering::Acquire);
            let spent = self.budget.spent.load(Ordering::Acquire);

            let left = capacity - spent;
            if left > 0 {
                let grant = wanted.min(left);
                if self
                    .budget
                    .spent
                    .compare_exchange_weak(spent, spent + grant, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.budget.timewise.fetch_sub(grant, Ordering::AcqRel);
                    return Ok(grant as usize);
                }

                continue;
            }

            self.idle(seen)?;
        }
    }

    /// Returns `n` unused units to the current tick's budget.
    pub fn give_back(&self, n: usize) {
        if n == 0 {
            return;
        }

        let n = i64::try_from(n).unwrap_or(i64::MAX);
        self.budget.release(n);
        self.budget.timewise.fetch_add(n, Ordering::AcqRel);
        self.budget.signal.wake();
    }

    fn idle(&self, seen: u64) -> io::Result<()> {
        match self.policy {
            BlockingPolicy::WouldBlock => Err(would_block()),
            BlockingPolicy::Fail => Err(io::Error::other("rate limit exhausted")),
            BlockingPolicy::Block => {
                if let Some(hook) = &self.idle_hook {
                    if hook() {
                        return Ok(());
                    }
                }

                self.budget.signal.wait_since(seen);
                Ok(())
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Deregisters from the clock. Blocked and subsequent acquisitions fail with
    /// [`StreamError::Closed`].
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(id) = self.listener.lock().take() {
            self.clock.remove_listener(id);
        }

        self.budget.signal.wake();
        debug!("Rate limiter closed");
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.close();
    }
}
