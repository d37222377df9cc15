use std::{
    io::{self, Read},
    sync::{Arc, Weak},
    thread::{self, JoinHandle},
};

use parking_lot::Mutex;
use shaper_clock::{ListenerId, Tick, TickListener, TickSource};
use shaper_common::{would_block, Source, StreamError, WakeSignal};
use tracing::{debug, error, trace, warn};

use super::{DelayBuffer, DelayOptions, DelayShaper};

/// Outcome of a background end-of-stream probe.
#[derive(Debug)]
enum Probe {
    Byte(u8),
    Eof,
    Failed(io::Error),
}

#[derive(Debug)]
struct InputState {
    buffer: DelayBuffer,
    eof: bool,
    closed: bool,
    source_closed: bool,
    /// A failure on the tick thread, returned by the next read or `available` call.
    error: Option<io::Error>,
    eof_detection: bool,
    /// Set while a probe owns the source. The source is not touched by fills in the meantime.
    probing: bool,
    probed: Option<Probe>,
    probe_handle: Option<JoinHandle<()>>,
}

/// The part of a [`DelayedReader`] shared with the clock and the probe thread.
#[derive(Debug)]
struct Input<R> {
    state: Mutex<InputState>,
    source: Mutex<R>,
    signal: WakeSignal,
    this: Weak<Input<R>>,
}

impl<R: Source + Send + 'static> Input<R> {
    /// Pulls every byte the source has ready into the ring and updates visibility.
    fn fill(&self, state: &mut InputState) {
        let mut appended = 0;

        if let Some(probe) = state.probed.take() {
            match probe {
                Probe::Byte(byte) => {
                    if state.buffer.push(&[byte]) == 1 {
                        appended += 1;
                    } else {
                        state.probed = Some(Probe::Byte(byte));
                    }
                }
                Probe::Eof => state.eof = true,
                Probe::Failed(e) => {
                    error!(err = ?e, "End-of-stream probe failed");
                    state.error = Some(e);
                }
            }
        }

        if state.probed.is_none() && !state.probing && !state.eof && state.error.is_none() {
            let mut source = self.source.lock();
            match pull(&mut *source, &mut state.buffer) {
                Ok(0) => {}
                Ok(n) => appended += n,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => state.eof = true,
                Err(e) => {
                    error!(err = ?e, "Failed to read from source");
                    state.error = Some(e);
                }
            }
        }

        let delay = state.buffer.delay();
        if appended > 0 && delay > 0 {
            // Bytes pulled on tick T were produced during tick T - 1.
            let deadline = state.buffer.deadline(-1);
            state.buffer.schedule(deadline);
        }

        state.buffer.collapse();

        if appended > 0 {
            trace!(tick = state.buffer.tick(), appended, visible = state.buffer.visible(), "Filled");
        }

        if state.eof_detection {
            self.maybe_probe(state);
        }
    }

    fn maybe_probe(&self, state: &mut InputState) {
        if state.eof
            || state.closed
            || state.probing
            || state.probed.is_some()
            || state.error.is_some()
            || state.buffer.free() == 0
        {
            return;
        }

        match self.source.lock().available() {
            Ok(0) => {}
            Ok(_) => return,
            Err(e) => {
                state.error = Some(e);
                return;
            }
        }

        let Some(input) = self.this.upgrade() else {
            return;
        };

        state.probing = true;
        match thread::Builder::new().name("eof-probe".to_string()).spawn(move || input.probe()) {
            Ok(handle) => {
                debug!(tick = state.buffer.tick(), "Spawned end-of-stream probe");
                state.probe_handle = Some(handle);
            }
            Err(e) => {
                warn!(err = ?e, "Failed to spawn end-of-stream probe");
                state.probing = false;
            }
        }
    }

    /// Runs on the probe thread: one blocking single-byte read, merged on the next fill.
    fn probe(&self) {
        let outcome = {
            let mut source = self.source.lock();
            let mut byte = [0u8];
            loop {
                match source.read(&mut byte) {
                    Ok(0) => break Probe::Eof,
                    Ok(_) => break Probe::Byte(byte[0]),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => break Probe::Failed(e),
                }
            }
        };

        debug!(?outcome, "End-of-stream probe finished");

        let mut state = self.state.lock();
        state.probing = false;

        if state.closed {
            if !state.source_closed {
                state.source_closed = true;
                if let Err(e) = self.source.lock().close() {
                    warn!(err = ?e, "Failed to close source after probe");
                }
            }

            return;
        }

        state.probed = Some(outcome);
        drop(state);

        self.signal.wake();
    }

    /// Blocking read straight from the source into `buf`. Only used with no delay and nothing
    /// buffered, so no byte can overtake another. The caller has set `probing`, which keeps
    /// fills off the source in the meantime.
    fn read_through(&self, buf: &mut [u8]) -> io::Result<usize> {
        let result = {
            let mut source = self.source.lock();
            loop {
                match source.read(buf) {
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    result => break result,
                }
            }
        };

        let mut state = self.state.lock();
        state.probing = false;

        if state.closed {
            if !state.source_closed {
                state.source_closed = true;
                if let Err(e) = self.source.lock().close() {
                    warn!(err = ?e, "Failed to close source after read");
                }
            }

            drop(state);
            self.signal.wake();
            return Err(StreamError::Closed.into());
        }

        if let Ok(0) = result {
            state.eof = true;
        }

        drop(state);
        self.signal.wake();

        result
    }
}

/// Reads the bytes the source reports as available, up to the free space in the ring.
/// End of stream is reported as [`io::ErrorKind::UnexpectedEof`].
fn pull<R: Source + ?Sized>(source: &mut R, buffer: &mut DelayBuffer) -> io::Result<usize> {
    let want = source.available()?.min(buffer.free());
    if want == 0 {
        return Ok(0);
    }

    match buffer.fill_from(source, want)? {
        0 => Err(io::ErrorKind::UnexpectedEof.into()),
        n => Ok(n),
    }
}

impl<R: Source + Send + 'static> TickListener for Input<R> {
    fn on_tick(&self, tick: Tick) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }

        state.buffer.set_tick(tick);
        self.fill(&mut state);
        drop(state);

        self.signal.wake();
    }
}

/// A [`Source`] wrapper that makes every byte visible `delay` ticks after the wrapped source
/// produced it.
///
/// On every tick, the bytes the source reports as available are pulled into a ring buffer of
/// `buffer_size` bytes and scheduled to become readable `delay` ticks later. With a delay of 0,
/// bytes are pulled synchronously when reading, and a blocking read on an empty buffer waits on
/// the source itself rather than on the clock.
///
/// Sources that cannot report end of stream through [`Source::available`] (sockets, pipes)
/// need [`DelayOptions::eof_detection`] for the reader to ever see it: a background thread then
/// performs a blocking one-byte read whenever the source runs dry, and its outcome is merged on
/// the next tick.
pub struct DelayedReader<R> {
    input: Arc<Input<R>>,
    clock: Arc<dyn TickSource>,
    listener: Option<ListenerId>,
    blocking: bool,
}

impl<R: std::fmt::Debug> std::fmt::Debug for DelayedReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayedReader")
            .field("input", &self.input)
            .field("listener", &self.listener)
            .field("blocking", &self.blocking)
            .finish_non_exhaustive()
    }
}

impl<R: Source + Send + 'static> DelayedReader<R> {
    pub fn new(source: R, clock: Arc<dyn TickSource>, options: DelayOptions) -> Self {
        let buffer = DelayBuffer::new(options.buffer_size, options.delay, clock.current_tick());

        let input = Arc::new_cyclic(|this| Input {
            state: Mutex::new(InputState {
                buffer,
                eof: false,
                closed: false,
                source_closed: false,
                error: None,
                eof_detection: options.eof_detection,
                probing: false,
                probed: None,
                probe_handle: None,
            }),
            source: Mutex::new(source),
            signal: WakeSignal::new(),
            this: this.clone(),
        });

        let listener = clock.add_listener(Arc::clone(&input) as Arc<dyn TickListener>);

        Self { input, clock, listener: Some(listener), blocking: options.blocking }
    }

    pub fn set_nonblocking(&mut self, nonblocking: bool) {
        self.blocking = !nonblocking;
    }

    /// Capacity of the ring buffer.
    pub fn buffer_size(&self) -> usize {
        self.input.state.lock().buffer.capacity()
    }

    /// Bytes held in the ring, visible or not.
    pub fn buffered(&self) -> usize {
        self.input.state.lock().buffer.buffered()
    }

    /// Free space in the ring.
    pub fn free(&self) -> usize {
        self.input.state.lock().buffer.free()
    }

    /// Waits for the running end-of-stream probe, if any, to finish.
    #[doc(hidden)]
    pub fn wait_for_eof_probe(&self) {
        let handle = self.input.state.lock().probe_handle.take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// Deregisters from the clock and closes the wrapped source. If an end-of-stream probe is
    /// blocked on the source, the source is closed once the probe returns.
    pub fn close(&mut self) -> io::Result<()> {
        if let Some(id) = self.listener.take() {
            self.clock.remove_listener(id);
        }

        let mut state = self.input.state.lock();
        if state.closed {
            return Ok(());
        }

        state.closed = true;

        let result = match self.input.source.try_lock() {
            Some(mut source) => {
                state.source_closed = true;
                source.close()
            }
            None => Ok(()),
        };

        drop(state);
        self.input.signal.wake();

        debug!("Delayed reader closed");
        result
    }

    /// Pulls synchronously when there is no delay. Fails if the reader is closed.
    fn prepare(&self, state: &mut InputState) -> io::Result<()> {
        if state.closed {
            return Err(StreamError::Closed.into());
        }

        if state.buffer.delay() == 0 {
            self.input.fill(state);
        }

        Ok(())
    }
}

impl<R: Source + Send + 'static> Read for DelayedReader<R> {
    /// Reads bytes whose delay has elapsed. Returns `Ok(0)` once the source reached end of
    /// stream and every byte has been delivered.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            let seen = self.input.signal.generation();

            {
                let mut state = self.input.state.lock();
                self.prepare(&mut state)?;

                if state.buffer.visible() > 0 {
                    return Ok(state.buffer.read_visible(buf));
                }

                if let Some(e) = state.error.take() {
                    return Err(e);
                }

                if state.eof && state.buffer.buffered() == 0 {
                    return Ok(0);
                }

                if !self.blocking {
                    return Err(would_block());
                }

                // Without a delay there is nothing to wait for but the source itself.
                if state.buffer.delay() == 0
                    && state.buffer.buffered() == 0
                    && !state.probing
                    && state.probed.is_none()
                {
                    state.probing = true;
                    drop(state);
                    return self.input.read_through(buf);
                }
            }

            self.input.signal.wait_since(seen);
        }
    }
}

impl<R: Source + Send + 'static> Source for DelayedReader<R> {
    /// Bytes whose delay has elapsed.
    fn available(&mut self) -> io::Result<usize> {
        let mut state = self.input.state.lock();
        self.prepare(&mut state)?;

        let visible = state.buffer.visible();
        if visible == 0 {
            if let Some(e) = state.error.take() {
                return Err(e);
            }
        }

        Ok(visible)
    }

    fn close(&mut self) -> io::Result<()> {
        DelayedReader::close(self)
    }
}

impl<R: Source + Send + 'static> DelayShaper for DelayedReader<R> {
    fn set_delay(&self, delay: u64) {
        let mut state = self.input.state.lock();
        let old = state.buffer.delay();
        let moved = state.buffer.set_delay(delay);
        drop(state);

        debug!(old, new = delay, moved, "Delay changed");
        self.input.signal.wake();
    }

    fn delay(&self) -> u64 {
        self.input.state.lock().buffer.delay()
    }
}

impl<R> Drop for DelayedReader<R> {
    fn drop(&mut self) {
        if let Some(id) = self.listener.take() {
            self.clock.remove_listener(id);
        }

        let mut state = self.input.state.lock();
        state.closed = true;
        drop(state);

        self.input.signal.wake();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{Cursor, Write},
        thread,
        time::{Duration, Instant},
    };

    use shaper_clock::SimulationClock;
    use shaper_common::{pipe, PipeReader, PipeWriter};

    use super::*;

    /// Serves `data`, then fails `available` as if the peer reset the connection.
    #[derive(Debug)]
    struct ResetOnDrain {
        data: Cursor<Vec<u8>>,
    }

    impl Read for ResetOnDrain {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.data.read(buf)
        }
    }

    impl Source for ResetOnDrain {
        fn available(&mut self) -> io::Result<usize> {
            match self.data.available()? {
                0 => Err(io::ErrorKind::ConnectionReset.into()),
                n => Ok(n),
            }
        }
    }

    /// Serves `data`, then reports nothing available and fails the next read.
    #[derive(Debug)]
    struct ResetOnRead {
        data: Cursor<Vec<u8>>,
    }

    impl Read for ResetOnRead {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.data.available()? {
                0 => Err(io::ErrorKind::ConnectionReset.into()),
                _ => self.data.read(buf),
            }
        }
    }

    impl Source for ResetOnRead {
        fn available(&mut self) -> io::Result<usize> {
            self.data.available()
        }
    }

    const BUFFER: usize = 50;
    const SETUP_TICKS: usize = 5;

    fn setup(delay: u64) -> (Arc<SimulationClock>, PipeWriter, DelayedReader<PipeReader>) {
        let _ = tracing_subscriber::fmt::try_init();

        let clock = Arc::new(SimulationClock::new());
        clock.advance_by(SETUP_TICKS);

        let (tx, rx) = pipe(4 * BUFFER);
        let options = DelayOptions::default()
            .with_delay(delay)
            .with_buffer_size(BUFFER)
            .with_blocking(false);
        let reader = DelayedReader::new(rx, clock.clone(), options);

        (clock, tx, reader)
    }

    fn one_byte(delay: u64) {
        let (clock, mut tx, mut reader) = setup(delay);

        tx.write_all(&[42]).unwrap();

        if delay > 0 {
            for _ in 1..delay {
                clock.advance();
                assert_eq!(reader.available().unwrap(), 0);
                assert_eq!(reader.buffered(), 1);
                assert_eq!(reader.free(), BUFFER - 1);
            }

            clock.advance();
        }

        assert_eq!(reader.available().unwrap(), 1);

        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], 42);
        assert_eq!(reader.free(), BUFFER);
    }

    #[test]
    fn test_one_byte_no_delay() {
        one_byte(0);
    }

    #[test]
    fn test_one_byte_delay_1() {
        one_byte(1);
    }

    #[test]
    fn test_one_byte_delay_20() {
        one_byte(20);
    }

    #[test]
    fn test_nothing_before_delay() {
        let (clock, mut tx, mut reader) = setup(20);

        let start = clock.current_tick();
        tx.write_all(&[1; 12]).unwrap();

        while clock.current_tick() < start + 19 {
            clock.advance();
            assert_eq!(reader.available().unwrap(), 0);

            let err = reader.read(&mut [0u8; 12]).unwrap_err();
            assert!(StreamError::is_would_block(&err));
        }

        clock.advance();
        assert_eq!(reader.available().unwrap(), 12);
    }

    #[test]
    fn test_many_bytes_interleaved() {
        let (clock, mut tx, mut reader) = setup(3);

        let mut received = Vec::new();
        let mut buf = [0u8; 7];

        for round in 0..40u8 {
            tx.write_all(&[round; 5]).unwrap();
            clock.advance();

            if reader.available().unwrap() > 0 {
                let n = reader.read(&mut buf).unwrap();
                received.extend_from_slice(&buf[..n]);
            }
        }

        clock.advance_by(3);
        while reader.available().unwrap() > 0 {
            let n = reader.read(&mut buf).unwrap();
            received.extend_from_slice(&buf[..n]);
        }

        let expected: Vec<u8> = (0..40u8).flat_map(|round| [round; 5]).collect();
        assert_eq!(received, expected);
    }

    #[test]
    fn test_ring_never_overflows() {
        let (clock, mut tx, mut reader) = setup(2);

        tx.write_all(&[9; 3 * BUFFER]).unwrap();
        clock.advance();
        assert_eq!(reader.buffered(), BUFFER);
        assert_eq!(reader.free(), 0);

        clock.advance();
        assert_eq!(reader.available().unwrap(), BUFFER);

        let mut buf = vec![0u8; 3 * BUFFER];
        assert_eq!(reader.read(&mut buf).unwrap(), BUFFER);

        clock.advance();
        assert_eq!(reader.buffered(), BUFFER);
    }

    #[test]
    fn test_variable_delay_shortened() {
        let (clock, mut tx, mut reader) = setup(20);
        let start = clock.current_tick();

        tx.write_all(&[1; 12]).unwrap();
        clock.advance_by(12);

        reader.set_delay(5);
        clock.advance_by(4);
        assert_eq!(reader.available().unwrap(), 0);

        clock.advance();
        assert_eq!(clock.current_tick(), start + 17);
        assert_eq!(reader.available().unwrap(), 12);
    }

    #[test]
    fn test_variable_delay_never_pushed_later() {
        let (clock, mut tx, mut reader) = setup(20);
        let start = clock.current_tick();

        tx.write_all(&[1; 12]).unwrap();
        clock.advance_by(15);

        reader.set_delay(8);
        clock.advance_by(4);
        assert_eq!(reader.available().unwrap(), 0);

        clock.advance();
        assert_eq!(clock.current_tick(), start + 20);
        assert_eq!(reader.available().unwrap(), 12);
    }

    #[test]
    fn test_variable_delay_lengthened() {
        let (clock, mut tx, mut reader) = setup(20);
        let start = clock.current_tick();

        tx.write_all(&[1; 12]).unwrap();
        clock.advance_by(17);

        reader.set_delay(15);
        assert_eq!(reader.delay(), 15);
        tx.write_all(&[2]).unwrap();

        clock.advance_by(3);
        assert_eq!(clock.current_tick(), start + 20);
        assert_eq!(reader.available().unwrap(), 12);

        let mut buf = [0u8; 16];
        assert_eq!(reader.read(&mut buf).unwrap(), 12);

        while clock.current_tick() < start + 31 {
            clock.advance();
            assert_eq!(reader.available().unwrap(), 0);
        }

        clock.advance();
        assert_eq!(reader.available().unwrap(), 1);
    }

    #[test]
    fn test_eof_detection() {
        let clock = Arc::new(SimulationClock::new());
        let (mut tx, rx) = pipe(64);
        let options = DelayOptions::default().with_delay(1).with_buffer_size(16).with_eof_detection(true);
        let mut reader = DelayedReader::new(rx, clock.clone(), options);

        // The source is dry, so the first tick starts a probe that blocks on the pipe.
        clock.advance();
        tx.write_all(b"ab").unwrap();
        reader.wait_for_eof_probe();

        // The probed byte is merged ahead of the rest of the source.
        clock.advance();
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ab");

        drop(tx);
        reader.wait_for_eof_probe();
        clock.advance();

        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_close_while_probing() {
        let clock = Arc::new(SimulationClock::new());
        let (mut tx, rx) = pipe(64);
        let options = DelayOptions::default().with_delay(1).with_eof_detection(true);
        let mut reader = DelayedReader::new(rx, clock.clone(), options);

        clock.advance();
        reader.close().unwrap();

        let err = reader.read(&mut [0u8; 4]).unwrap_err();
        assert!(StreamError::is_closed(&err));

        // The probe consumes this byte, sees the reader closed and closes the pipe.
        tx.write_all(b"x").unwrap();
        reader.wait_for_eof_probe();

        let err = tx.write_all(b"y").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_closed_reader() {
        let (_clock, _tx, mut reader) = setup(0);

        reader.close().unwrap();
        let err = reader.available().unwrap_err();
        assert!(StreamError::is_closed(&err));
    }

    #[test]
    fn test_zero_delay_read_waits_on_source() {
        let clock = Arc::new(SimulationClock::new());
        let (mut tx, rx) = pipe(64);
        let mut reader = DelayedReader::new(rx, clock, DelayOptions::default());

        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            tx.write_all(b"z").unwrap();
        });

        // The clock never ticks: the read has to be woken by the source alone.
        let start = Instant::now();
        let mut buf = [0u8; 1];
        reader.read_exact(&mut buf).unwrap();
        let elapsed = start.elapsed();

        assert_eq!(&buf, b"z");
        assert!(elapsed < Duration::from_millis(200), "read took {elapsed:?}");

        producer.join().unwrap();

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert!(rest.is_empty());
    }

    #[test]
    fn test_source_failure_after_visible_bytes() {
        let clock = Arc::new(SimulationClock::new());
        let source = ResetOnDrain { data: Cursor::new(b"hello".to_vec()) };
        let options = DelayOptions::default().with_delay(2).with_blocking(false);
        let mut reader = DelayedReader::new(source, clock.clone(), options);

        // Pulled on the first tick, failed on the second, when the bytes also become visible.
        clock.advance_by(2);
        assert_eq!(reader.available().unwrap(), 5);

        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");

        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[test]
    fn test_eof_detection_failure_is_replayed() {
        let clock = Arc::new(SimulationClock::new());
        let source = ResetOnRead { data: Cursor::new(b"hi".to_vec()) };
        let options =
            DelayOptions::default().with_delay(1).with_blocking(false).with_eof_detection(true);
        let mut reader = DelayedReader::new(source, clock.clone(), options);

        // The first tick pulls both bytes and starts the end-of-stream read on the drained source.
        clock.advance();
        reader.wait_for_eof_probe();

        clock.advance();

        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"hi");

        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }
}
