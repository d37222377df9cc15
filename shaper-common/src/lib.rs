//! Common types shared by the shaper crates: the byte-stream capabilities every shaper wraps,
//! the stream error taxonomy, the bounded sleep/wake primitive and an in-memory pipe.
#![doc(issue_tracker_base_url = "https://github.com/chainbound/msg-rs/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod error;
mod io;
mod pipe;
mod signal;

pub use error::StreamError;
pub use io::{Sink, Source};
pub use pipe::{pipe, PipeReader, PipeWriter};
pub use signal::{WakeSignal, DEFAULT_WAIT_TIMEOUT};

/// Returns the [`std::io::ErrorKind::WouldBlock`] error shaped streams raise in non-blocking mode.
#[inline]
pub fn would_block() -> std::io::Error {
    StreamError::WouldBlock.into()
}

#[allow(non_upper_case_globals)]
pub mod constants {
    //! Size and time unit constants.

    /// One kibibyte.
    pub const KiB: u32 = 1024;
    /// One mebibyte.
    pub const MiB: u32 = 1024 * KiB;
    /// One gibibyte.
    pub const GiB: u32 = 1024 * MiB;

    /// Nanoseconds per millisecond.
    pub const NS_PER_MS: u64 = 1_000_000;
    /// Nanoseconds per second.
    pub const NS_PER_S: u64 = 1_000_000_000;
}
