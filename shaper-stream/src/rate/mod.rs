mod limiter;
mod reader;
mod writer;

pub use limiter::{BlockingPolicy, IdleHook, RateLimiter};
pub use reader::RateLimitReader;
pub use writer::RateLimitWriter;

use shaper_common::constants::KiB;

/// Bytes per tick used by [`RateOptions::default`].
pub const DEFAULT_BYTE_RATE: u32 = 64 * KiB;

/// Live control over a rate-limited stream.
pub trait RateShaper {
    /// Sets the number of bytes granted per replenishment.
    fn set_byte_rate(&self, byte_rate: u32);

    fn byte_rate(&self) -> u32;

    /// Sets the number of ticks between replenishments.
    fn set_prescale(&self, prescale: u32);

    fn prescale(&self) -> u32;
}

/// Configuration of a rate-limited stream.
#[derive(Debug, Clone)]
pub struct RateOptions {
    /// Bytes granted every `prescale` ticks.
    pub byte_rate: u32,
    /// Number of ticks between replenishments. Values below 1 are treated as 1.
    pub prescale: u32,
    /// When `false`, operations that cannot make progress fail with
    /// [`std::io::ErrorKind::WouldBlock`].
    pub blocking: bool,
    /// Input side only: keep pulling across tick boundaries for as long as the wrapped source
    /// has data immediately available.
    pub boring: bool,
}

impl RateOptions {
    pub fn with_byte_rate(mut self, byte_rate: u32) -> Self {
        self.byte_rate = byte_rate;
        self
    }

    pub fn with_prescale(mut self, prescale: u32) -> Self {
        self.prescale = prescale;
        self
    }

    pub fn with_blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    pub fn with_boring(mut self, boring: bool) -> Self {
        self.boring = boring;
        self
    }

    pub(crate) fn policy(&self) -> BlockingPolicy {
        if self.blocking {
            BlockingPolicy::Block
        } else {
            BlockingPolicy::WouldBlock
        }
    }
}

impl Default for RateOptions {
    fn default() -> Self {
        Self { byte_rate: DEFAULT_BYTE_RATE, prescale: 1, blocking: true, boring: false }
    }
}
