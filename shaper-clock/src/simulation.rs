use std::sync::Arc;

use crate::{Dispatcher, ListenerId, Tick, TickListener, TickSource};

/// A clock that only moves when told to.
///
/// [`SimulationClock::advance`] dispatches exactly one tick on the calling thread, so everything
/// driven by this clock behaves deterministically.
#[derive(Debug, Default)]
pub struct SimulationClock {
    dispatcher: Dispatcher,
}

impl SimulationClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatches the next tick to every listener and returns it.
    pub fn advance(&self) -> Tick {
        self.dispatcher.dispatch()
    }

    /// Dispatches `n` ticks back to back.
    pub fn advance_by(&self, n: usize) -> Tick {
        for _ in 0..n {
            self.dispatcher.dispatch();
        }

        self.dispatcher.current_tick()
    }
}

impl TickSource for SimulationClock {
    fn add_listener(&self, listener: Arc<dyn TickListener>) -> ListenerId {
        self.dispatcher.add_listener(listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.dispatcher.remove_listener(id)
    }

    fn reset(&self) {
        self.dispatcher.reset()
    }

    fn current_tick(&self) -> Tick {
        self.dispatcher.current_tick()
    }
}
