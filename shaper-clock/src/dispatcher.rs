use std::sync::{
    atomic::{AtomicI64, AtomicU64, Ordering},
    Arc,
};

use parking_lot::{Mutex, RwLock};

use crate::{ListenerId, Tick, TickListener};

/// The listener registry and tick counter shared by every clock implementation.
///
/// [`Dispatcher::dispatch`] increments the counter and notifies every registered listener in a
/// single pass over a snapshot of the registry. Listeners may therefore add or remove listeners
/// (including themselves) from inside `on_tick`; such changes take effect on the next dispatch.
pub struct Dispatcher {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn TickListener>)>>,
    next_id: AtomicU64,
    tick: AtomicI64,
    /// Held for the duration of a dispatch so that notifications never overlap.
    dispatching: Mutex<()>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("listeners", &self.len())
            .field("tick", &self.current_tick())
            .finish()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// Creates an empty dispatcher at tick 0.
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
            tick: AtomicI64::new(0),
            dispatching: Mutex::new(()),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn TickListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(other, _)| *other != id);
        listeners.len() != before
    }

    /// Returns the number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    pub fn reset(&self) {
        self.tick.store(0, Ordering::Release);
    }

    #[inline]
    pub fn current_tick(&self) -> Tick {
        self.tick.load(Ordering::Acquire)
    }

    /// Advances the counter by one and notifies every listener with the new tick. Returns the
    /// tick that was dispatched.
    pub fn dispatch(&self) -> Tick {
        let _guard = self.dispatching.lock();

        let tick = self.tick.load(Ordering::Acquire).wrapping_add(1);
        self.tick.store(tick, Ordering::Release);

        let snapshot: Vec<_> =
            self.listeners.read().iter().map(|(_, listener)| Arc::clone(listener)).collect();

        for listener in snapshot {
            listener.on_tick(tick);
        }

        tick
    }
}
