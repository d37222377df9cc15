mod buffer;
mod reader;
mod writer;

pub(crate) use buffer::DelayBuffer;
pub use reader::DelayedReader;
pub use writer::DelayedWriter;

use shaper_common::constants::KiB;

/// Ring capacity used by [`DelayOptions::default`].
pub const DEFAULT_BUFFER_SIZE: usize = 64 * KiB as usize;

/// Live control over a delayed stream.
pub trait DelayShaper {
    /// Changes the delay in ticks. Bytes already waiting are delivered no later than
    /// `delay` ticks from now, and never later than they were first scheduled.
    fn set_delay(&self, delay: u64);

    fn delay(&self) -> u64;
}

/// Configuration of a delayed stream.
#[derive(Debug, Clone)]
pub struct DelayOptions {
    /// Delay in ticks. `0` passes bytes through synchronously.
    pub delay: u64,
    /// Capacity of the ring buffer holding delayed bytes. At least 1.
    pub buffer_size: usize,
    /// When `false`, operations that cannot make progress fail with
    /// [`std::io::ErrorKind::WouldBlock`].
    pub blocking: bool,
    /// Input side only: detect end of stream ahead of demand with a background one-byte read.
    /// Without it, end of stream on a source that never reports available bytes is only seen
    /// once the source is read directly.
    ///
    /// The probe blocks until the source yields a byte or ends. Closing the reader while it
    /// waits only closes the source once that read returns, so an idle peer keeps both the
    /// source and the probe thread alive until it sends or hangs up.
    pub eof_detection: bool,
}

impl DelayOptions {
    pub fn with_delay(mut self, delay: u64) -> Self {
        self.delay = delay;
        self
    }

    /// Sets the ring capacity. `0` is raised to 1.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    pub fn with_blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    pub fn with_eof_detection(mut self, eof_detection: bool) -> Self {
        self.eof_detection = eof_detection;
        self
    }
}

impl Default for DelayOptions {
    fn default() -> Self {
        Self { delay: 0, buffer_size: DEFAULT_BUFFER_SIZE, blocking: true, eof_detection: false }
    }
}
