use std::collections::BTreeMap;

use shaper_clock::Tick;

/// A schedule of ring cursors that become visible at given ticks.
///
/// Cursors only move forward, so among due marks the one with the latest tick is also the most
/// advanced and the others can be discarded. Ticks are ordered as plain integers; deadlines
/// saturate at [`Tick::MAX`] instead of wrapping, so a schedule never spans the wrap point.
#[derive(Debug, Default)]
pub(crate) struct TickMarks {
    marks: BTreeMap<Tick, usize>,
}

impl TickMarks {
    /// Schedules `cursor` to become visible at `tick`. A mark already scheduled for the same tick
    /// is replaced.
    pub(crate) fn insert(&mut self, tick: Tick, cursor: usize) {
        self.marks.insert(tick, cursor);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.marks.len()
    }

    /// Removes every mark due at or before `now` and returns the most advanced cursor among them.
    pub(crate) fn collapse(&mut self, now: Tick) -> Option<usize> {
        let due = match now.checked_add(1) {
            Some(next) => {
                let later = self.marks.split_off(&next);
                std::mem::replace(&mut self.marks, later)
            }
            None => std::mem::take(&mut self.marks),
        };

        due.into_values().next_back()
    }

    /// Pulls every mark scheduled after `deadline` in to `deadline`. Marks are never pushed
    /// later. Returns the number of marks that moved.
    pub(crate) fn reschedule(&mut self, deadline: Tick) -> usize {
        let Some(next) = deadline.checked_add(1) else {
            return 0;
        };

        let later = self.marks.split_off(&next);
        let moved = later.len();
        if let Some(cursor) = later.into_values().next_back() {
            self.marks.insert(deadline, cursor);
        }

        moved
    }
}
