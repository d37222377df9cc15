//! Logical clocks for the shaper streams.
//!
//! Everything time-dependent in the shaper crates is driven by a discrete tick counter rather
//! than by wall time. A [`TickSource`] owns that counter and notifies its registered
//! [`TickListener`]s once per tick, in strict tick order and never concurrently. Two sources are
//! provided:
//!
//! - [`SimulationClock`], advanced explicitly by the caller. Deterministic, used by tests and
//!   offline composition.
//! - [`RealTimeClock`], which maps ticks onto wall time at a fixed nanosecond interval using one
//!   of the [`TimingStrategy`] variants.
#![doc(issue_tracker_base_url = "https://github.com/chainbound/msg-rs/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

use std::sync::Arc;

mod dispatcher;
mod realtime;
mod simulation;

pub use dispatcher::Dispatcher;
pub use realtime::{
    ClockError, RealTimeClock, TimingStrategy, BUSY_WAIT_THRESHOLD_NS, MILLISECOND_THRESHOLD_NS,
};
pub use simulation::SimulationClock;

/// A tick value. Ticks increase by exactly one per dispatch and wrap around at [`i64::MAX`].
pub type Tick = i64;

/// Something that wants to be notified on every tick.
///
/// Notifications for one clock happen on a single thread at a time, so a listener that blocks
/// stalls the whole clock. Keep `on_tick` short.
pub trait TickListener: Send + Sync {
    /// Called once per tick with the new tick value.
    fn on_tick(&self, tick: Tick);
}

impl<F> TickListener for F
where
    F: Fn(Tick) + Send + Sync,
{
    fn on_tick(&self, tick: Tick) {
        self(tick)
    }
}

/// Handle returned by [`TickSource::add_listener`], used to deregister the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u64);

/// A clock: owns a set of listeners and the current tick.
pub trait TickSource: Send + Sync {
    /// Registers a listener. It is notified starting with the next dispatched tick.
    fn add_listener(&self, listener: Arc<dyn TickListener>) -> ListenerId;

    /// Deregisters a listener. Returns `false` if it was not registered.
    fn remove_listener(&self, id: ListenerId) -> bool;

    /// Resets the tick counter to 0.
    fn reset(&self);

    /// Returns the number of ticks dispatched since construction or the last reset.
    fn current_tick(&self) -> Tick;
}
