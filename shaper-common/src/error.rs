use std::io;

use thiserror::Error;

/// Errors raised by shaped streams.
///
/// Shaped streams implement [`std::io::Read`] and [`std::io::Write`], so these errors travel as
/// [`io::Error`]s. End-of-stream is not an error: it is reported as `Ok(0)` from `read`.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The stream is in non-blocking mode and the operation cannot make progress right now.
    #[error("operation would block")]
    WouldBlock,
    /// The stream has been closed by its owner.
    #[error("stream closed")]
    Closed,
    /// The wrapped source or sink failed.
    #[error("IO error: {0:?}")]
    Io(#[from] io::Error),
}

impl StreamError {
    /// Returns `true` if the given error was raised because the stream had been closed.
    pub fn is_closed(err: &io::Error) -> bool {
        matches!(err.get_ref().and_then(|e| e.downcast_ref::<Self>()), Some(Self::Closed))
    }

    /// Returns `true` if the given error signals that a non-blocking operation would block.
    pub fn is_would_block(err: &io::Error) -> bool {
        err.kind() == io::ErrorKind::WouldBlock
    }
}

impl From<StreamError> for io::Error {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::WouldBlock => Self::new(io::ErrorKind::WouldBlock, err),
            StreamError::Closed => Self::new(io::ErrorKind::NotConnected, err),
            StreamError::Io(e) => e,
        }
    }
}
