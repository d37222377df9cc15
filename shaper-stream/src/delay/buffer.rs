use std::io::{self, Read, Write};

use shaper_clock::Tick;

use crate::{marks::TickMarks, ring::RingBuffer};

/// The ring, its tick marks and the availability cursor of one delayed stream.
///
/// Bytes between `start` and `visible` have served their delay; bytes between `visible` and
/// `end` are still held back.
#[derive(Debug)]
pub(crate) struct DelayBuffer {
    ring: RingBuffer,
    marks: TickMarks,
    visible: usize,
    delay: u64,
    tick: Tick,
}

impl DelayBuffer {
    /// Creates an empty buffer. The capacity is at least one byte.
    pub(crate) fn new(capacity: usize, delay: u64, tick: Tick) -> Self {
        Self {
            ring: RingBuffer::new(capacity.max(1)),
            marks: TickMarks::default(),
            visible: 0,
            delay,
            tick,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    pub(crate) fn buffered(&self) -> usize {
        self.ring.buffered()
    }

    pub(crate) fn free(&self) -> usize {
        self.ring.free()
    }

    pub(crate) fn delay(&self) -> u64 {
        self.delay
    }

    pub(crate) fn tick(&self) -> Tick {
        self.tick
    }

    pub(crate) fn set_tick(&mut self, tick: Tick) {
        self.tick = tick;
    }

    /// Bytes that have served their delay.
    pub(crate) fn visible(&self) -> usize {
        self.ring.distance(self.ring.start(), self.visible)
    }

    /// `now + delay + offset`, saturating at [`Tick::MAX`].
    pub(crate) fn deadline(&self, offset: Tick) -> Tick {
        let delay = Tick::try_from(self.delay).unwrap_or(Tick::MAX);
        self.tick.saturating_add(delay).saturating_add(offset)
    }

    /// Marks everything appended so far to become visible at `tick`.
    pub(crate) fn schedule(&mut self, tick: Tick) {
        self.marks.insert(tick, self.ring.end());
    }

    /// Moves the availability cursor to the most advanced mark that is due. With no marks
    /// pending, everything buffered is visible.
    pub(crate) fn collapse(&mut self) {
        if let Some(cursor) = self.marks.collapse(self.tick) {
            self.visible = cursor;
        }

        if self.marks.is_empty() {
            self.visible = self.ring.end();
        }
    }

    /// Changes the delay. Pending marks due later than `now + delay` are pulled in; none are
    /// pushed later. Returns the number of marks that moved.
    pub(crate) fn set_delay(&mut self, delay: u64) -> usize {
        self.delay = delay;
        let moved = self.marks.reschedule(self.deadline(0));
        self.collapse();
        moved
    }

    pub(crate) fn push(&mut self, data: &[u8]) -> usize {
        self.ring.push(data)
    }

    pub(crate) fn fill_from<R: Read + ?Sized>(&mut self, src: &mut R, max: usize) -> io::Result<usize> {
        self.ring.fill_from(src, max)
    }

    /// Moves visible bytes into `out`.
    pub(crate) fn read_visible(&mut self, out: &mut [u8]) -> usize {
        self.ring.pop_to(out, self.visible)
    }

    /// Writes every visible byte to `sink`.
    pub(crate) fn transmit<W: Write + ?Sized>(&mut self, sink: &mut W) -> io::Result<usize> {
        self.ring.drain_to(sink, self.visible)
    }
}
