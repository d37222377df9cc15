use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    sync::Arc,
};

use parking_lot::{Condvar, Mutex};

use crate::{Sink, Source};

#[derive(Debug)]
struct State {
    buf: VecDeque<u8>,
    capacity: usize,
    reader_closed: bool,
    writer_closed: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    cvar: Condvar,
}

/// Creates a bounded, blocking, in-memory byte pipe holding at most `capacity` bytes.
///
/// Reads block until data arrives and return `Ok(0)` once the writer is closed or dropped and
/// every byte has been consumed. Writes block while the pipe is full and fail with
/// [`io::ErrorKind::BrokenPipe`] once the reader is gone.
pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            buf: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            reader_closed: false,
            writer_closed: false,
        }),
        cvar: Condvar::new(),
    });

    (PipeWriter { shared: Arc::clone(&shared) }, PipeReader { shared })
}

/// The read half of a [`pipe`].
#[derive(Debug)]
pub struct PipeReader {
    shared: Arc<Shared>,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut state = self.shared.state.lock();
        loop {
            if state.reader_closed {
                return Err(io::Error::new(io::ErrorKind::NotConnected, "pipe reader closed"));
            }

            if !state.buf.is_empty() {
                let n = buf.len().min(state.buf.len());
                for (dst, src) in buf.iter_mut().zip(state.buf.drain(..n)) {
                    *dst = src;
                }

                self.shared.cvar.notify_all();
                return Ok(n);
            }

            if state.writer_closed {
                return Ok(0);
            }

            self.shared.cvar.wait(&mut state);
        }
    }
}

impl Source for PipeReader {
    fn available(&mut self) -> io::Result<usize> {
        Ok(self.shared.state.lock().buf.len())
    }

    fn close(&mut self) -> io::Result<()> {
        let mut state = self.shared.state.lock();
        state.reader_closed = true;
        state.buf.clear();
        self.shared.cvar.notify_all();
        Ok(())
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        let _ = Source::close(self);
    }
}

/// The write half of a [`pipe`].
#[derive(Debug)]
pub struct PipeWriter {
    shared: Arc<Shared>,
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut state = self.shared.state.lock();
        loop {
            if state.writer_closed {
                return Err(io::Error::new(io::ErrorKind::NotConnected, "pipe writer closed"));
            }

            if state.reader_closed {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader closed"));
            }

            let free = state.capacity - state.buf.len();
            if free > 0 {
                let n = buf.len().min(free);
                state.buf.extend(&buf[..n]);

                self.shared.cvar.notify_all();
                return Ok(n);
            }

            self.shared.cvar.wait(&mut state);
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Sink for PipeWriter {
    fn close(&mut self) -> io::Result<()> {
        let mut state = self.shared.state.lock();
        state.writer_closed = true;
        self.shared.cvar.notify_all();
        Ok(())
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        let _ = Sink::close(self);
    }
}
