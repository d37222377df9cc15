use std::{
    io::{self, Write},
    sync::Arc,
};

use parking_lot::Mutex;
use shaper_clock::{ListenerId, Tick, TickListener, TickSource};
use shaper_common::{would_block, Sink, StreamError, WakeSignal};
use tracing::{debug, error, trace};

use super::{DelayBuffer, DelayOptions, DelayShaper};

#[derive(Debug)]
struct OutputState {
    buffer: DelayBuffer,
    closed: bool,
    /// A failure on the tick thread, returned by the next write or flush.
    error: Option<io::Error>,
}

#[derive(Debug)]
struct Output<W> {
    state: Mutex<OutputState>,
    sink: Mutex<W>,
    signal: WakeSignal,
}

impl<W: Sink + Send + 'static> Output<W> {
    /// Writes every byte whose delay has elapsed to the sink.
    fn transmit(&self, state: &mut OutputState) {
        if state.error.is_some() || state.buffer.visible() == 0 {
            return;
        }

        let mut sink = self.sink.lock();
        let result = state.buffer.transmit(&mut *sink).and_then(|n| sink.flush().map(|_| n));

        match result {
            Ok(n) => trace!(tick = state.buffer.tick(), sent = n, "Transmitted"),
            Err(e) => {
                error!(err = ?e, "Failed to write to sink");
                state.error = Some(e);
            }
        }
    }
}

impl<W: Sink + Send + 'static> TickListener for Output<W> {
    fn on_tick(&self, tick: Tick) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }

        state.buffer.set_tick(tick);
        state.buffer.collapse();
        self.transmit(&mut state);
        drop(state);

        self.signal.wake();
    }
}

/// A [`Sink`] wrapper that hands every byte to the wrapped sink `delay` ticks after it was
/// written.
///
/// Writes land in a ring buffer of `buffer_size` bytes. A single write call accepts at most
/// `buffer_size` bytes and waits (or fails with [`io::ErrorKind::WouldBlock`]) until that much
/// space is free. Transmission happens on the clock's thread; a failure there is returned by
/// the next call to [`write`](Write::write) or [`flush`](Write::flush).
///
/// With a delay of 0, bytes are transmitted synchronously within `write`.
pub struct DelayedWriter<W> {
    output: Arc<Output<W>>,
    clock: Arc<dyn TickSource>,
    listener: Option<ListenerId>,
    blocking: bool,
}

impl<W: std::fmt::Debug> std::fmt::Debug for DelayedWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayedWriter")
            .field("output", &self.output)
            .field("listener", &self.listener)
            .field("blocking", &self.blocking)
            .finish_non_exhaustive()
    }
}

impl<W: Sink + Send + 'static> DelayedWriter<W> {
    pub fn new(sink: W, clock: Arc<dyn TickSource>, options: DelayOptions) -> Self {
        let buffer = DelayBuffer::new(options.buffer_size, options.delay, clock.current_tick());

        let output = Arc::new(Output {
            state: Mutex::new(OutputState { buffer, closed: false, error: None }),
            sink: Mutex::new(sink),
            signal: WakeSignal::new(),
        });

        let listener = clock.add_listener(Arc::clone(&output) as Arc<dyn TickListener>);

        Self { output, clock, listener: Some(listener), blocking: options.blocking }
    }

    pub fn set_nonblocking(&mut self, nonblocking: bool) {
        self.blocking = !nonblocking;
    }

    /// Capacity of the ring buffer.
    pub fn buffer_size(&self) -> usize {
        self.output.state.lock().buffer.capacity()
    }

    /// Bytes written but not yet transmitted.
    pub fn buffered(&self) -> usize {
        self.output.state.lock().buffer.buffered()
    }

    /// Free space in the ring.
    pub fn free(&self) -> usize {
        self.output.state.lock().buffer.free()
    }

    /// Blocks until every buffered byte has been transmitted. Requires a running clock.
    pub fn drain(&self) -> io::Result<()> {
        loop {
            let seen = self.output.signal.generation();

            {
                let mut state = self.output.state.lock();
                if let Some(e) = state.error.take() {
                    return Err(e);
                }

                if state.closed {
                    return Err(StreamError::Closed.into());
                }

                if state.buffer.buffered() == 0 {
                    return Ok(());
                }

                if !self.blocking {
                    return Err(would_block());
                }
            }

            self.output.signal.wait_since(seen);
        }
    }

    /// Deregisters from the clock and closes the wrapped sink. Bytes still waiting for their
    /// delay are discarded; call [`drain`](Self::drain) first to deliver them.
    pub fn close(&mut self) -> io::Result<()> {
        if let Some(id) = self.listener.take() {
            self.clock.remove_listener(id);
        }

        let mut state = self.output.state.lock();
        if state.closed {
            return Ok(());
        }

        state.closed = true;
        let discarded = state.buffer.buffered();
        let result = self.output.sink.lock().close();
        drop(state);

        self.output.signal.wake();

        debug!(discarded, "Delayed writer closed");
        result
    }
}

impl<W: Sink + Send + 'static> Write for DelayedWriter<W> {
    /// Buffers up to `buffer_size` bytes of `buf` for delayed transmission.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            let seen = self.output.signal.generation();

            {
                let mut state = self.output.state.lock();
                if state.closed {
                    return Err(StreamError::Closed.into());
                }

                if let Some(e) = state.error.take() {
                    return Err(e);
                }

                let len = buf.len().min(state.buffer.capacity());
                if state.buffer.free() >= len {
                    state.buffer.push(&buf[..len]);

                    if state.buffer.delay() == 0 {
                        state.buffer.collapse();
                        self.output.transmit(&mut state);
                    } else {
                        let deadline = state.buffer.deadline(0);
                        state.buffer.schedule(deadline);
                    }

                    return Ok(len);
                }

                if !self.blocking {
                    return Err(would_block());
                }
            }

            self.output.signal.wait_since(seen);
        }
    }

    /// Returns a pending transmission failure and flushes the sink. Bytes still waiting for
    /// their delay are not forced out.
    fn flush(&mut self) -> io::Result<()> {
        let mut state = self.output.state.lock();
        if state.closed {
            return Err(StreamError::Closed.into());
        }

        if let Some(e) = state.error.take() {
            return Err(e);
        }

        drop(state);
        self.output.sink.lock().flush()
    }
}

impl<W: Sink + Send + 'static> Sink for DelayedWriter<W> {
    fn close(&mut self) -> io::Result<()> {
        DelayedWriter::close(self)
    }
}

impl<W: Sink + Send + 'static> DelayShaper for DelayedWriter<W> {
    fn set_delay(&self, delay: u64) {
        let mut state = self.output.state.lock();
        let old = state.buffer.delay();
        let moved = state.buffer.set_delay(delay);
        self.output.transmit(&mut state);
        drop(state);

        debug!(old, new = delay, moved, "Delay changed");
        self.output.signal.wake();
    }

    fn delay(&self) -> u64 {
        self.output.state.lock().buffer.delay()
    }
}

impl<W> Drop for DelayedWriter<W> {
    fn drop(&mut self) {
        if let Some(id) = self.listener.take() {
            self.clock.remove_listener(id);
        }

        self.output.state.lock().closed = true;
        self.output.signal.wake();
    }
}
