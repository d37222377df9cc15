use std::io::{self, Read, Write};

/// A fixed-capacity byte ring.
///
/// The ring keeps one slot more than its capacity so that `start == end` unambiguously means
/// empty. Cursors are slot indices in `[0, capacity + 1)`; callers hold on to them (for tick
/// marks and the availability cursor) and hand them back as limits to [`RingBuffer::pop_to`] and
/// [`RingBuffer::drain_to`].
#[derive(Debug)]
pub(crate) struct RingBuffer {
    buf: Box<[u8]>,
    start: usize,
    end: usize,
}

impl RingBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self { buf: vec![0; capacity + 1].into_boxed_slice(), start: 0, end: 0 }
    }

    #[inline]
    fn slots(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots() - 1
    }

    pub(crate) fn start(&self) -> usize {
        self.start
    }

    pub(crate) fn end(&self) -> usize {
        self.end
    }

    /// Number of bytes between two cursors, walking forward from `from`.
    #[inline]
    pub(crate) fn distance(&self, from: usize, to: usize) -> usize {
        (to + self.slots() - from) % self.slots()
    }

    pub(crate) fn buffered(&self) -> usize {
        self.distance(self.start, self.end)
    }

    pub(crate) fn free(&self) -> usize {
        self.capacity() - self.buffered()
    }

    /// The writable region starting at `end`, at most `max` bytes long.
    fn tail_mut(&mut self, max: usize) -> &mut [u8] {
        let contiguous = if self.end >= self.start {
            // May not write into the last slot when start is 0, it would make the ring look empty.
            let limit = if self.start == 0 { self.slots() - 1 } else { self.slots() };
            limit - self.end
        } else {
            self.start - self.end - 1
        };

        let len = contiguous.min(max);
        &mut self.buf[self.end..self.end + len]
    }

    fn advance_end(&mut self, n: usize) {
        self.end = (self.end + n) % self.slots();
    }

    fn advance_start(&mut self, n: usize) {
        self.start = (self.start + n) % self.slots();
    }

    /// Appends as much of `data` as fits. Returns the number of bytes appended.
    pub(crate) fn push(&mut self, data: &[u8]) -> usize {
        let mut pushed = 0;
        while pushed < data.len() {
            let tail = self.tail_mut(data.len() - pushed);
            if tail.is_empty() {
                break;
            }

            let n = tail.len();
            tail.copy_from_slice(&data[pushed..pushed + n]);
            self.advance_end(n);
            pushed += n;
        }

        pushed
    }

    /// Reads at most `max` bytes from `src` into the ring, stopping early when `src` returns a
    /// short read. Returns the number of bytes appended; `0` with `max > 0` means end of stream.
    pub(crate) fn fill_from<R: Read + ?Sized>(&mut self, src: &mut R, max: usize) -> io::Result<usize> {
        let max = max.min(self.free());
        let mut filled = 0;

        while filled < max {
            let tail = self.tail_mut(max - filled);
            let want = tail.len();
            let n = loop {
                match src.read(tail) {
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    other => break other?,
                }
            };

            self.advance_end(n);
            filled += n;

            if n < want {
                break;
            }
        }

        Ok(filled)
    }

    /// Moves bytes from `start` up to the `limit` cursor into `out`. Returns the number of bytes
    /// moved.
    pub(crate) fn pop_to(&mut self, out: &mut [u8], limit: usize) -> usize {
        let mut popped = 0;

        while popped < out.len() {
            let chunk = self.head(limit).len().min(out.len() - popped);
            if chunk == 0 {
                break;
            }

            out[popped..popped + chunk].copy_from_slice(&self.buf[self.start..self.start + chunk]);
            self.advance_start(chunk);
            popped += chunk;
        }

        popped
    }

    /// Writes every byte from `start` up to the `limit` cursor into `sink`. Bytes are released
    /// from the ring only once they have been written.
    pub(crate) fn drain_to<W: Write + ?Sized>(&mut self, sink: &mut W, limit: usize) -> io::Result<usize> {
        let mut drained = 0;

        loop {
            let head = self.head(limit);
            if head.is_empty() {
                break;
            }

            let n = head.len();
            sink.write_all(head)?;
            self.advance_start(n);
            drained += n;
        }

        Ok(drained)
    }

    /// The contiguous readable region starting at `start` and ending at or before `limit`.
    fn head(&self, limit: usize) -> &[u8] {
        let end = if limit >= self.start { limit } else { self.slots() };
        &self.buf[self.start..end]
    }
}
