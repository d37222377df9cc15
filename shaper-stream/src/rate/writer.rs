use std::{
    io::{self, Write},
    sync::Arc,
};

use shaper_clock::TickSource;
use shaper_common::{Sink, StreamError};

use super::{RateLimiter, RateOptions, RateShaper};

/// A [`Sink`] wrapper that writes at most `byte_rate` bytes every `prescale` ticks.
#[derive(Debug)]
pub struct RateLimitWriter<W> {
    inner: W,
    limiter: RateLimiter,
    /// An error hit after part of a buffer was written, returned by the next call.
    deferred: Option<io::Error>,
}

impl<W: Sink> RateLimitWriter<W> {
    pub fn new(inner: W, clock: Arc<dyn TickSource>, options: RateOptions) -> Self {
        let mut limiter = RateLimiter::new(clock, options.byte_rate, options.prescale);
        limiter.set_policy(options.policy());

        Self { inner, limiter, deferred: None }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn limiter_mut(&mut self) -> &mut RateLimiter {
        &mut self.limiter
    }

    /// Writes a single byte once a unit of budget is available.
    pub fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        if let Some(e) = self.deferred.take() {
            return Err(e);
        }

        self.limiter.take_one()?;

        if let Err(e) = self.inner.write_all(&[byte]) {
            self.limiter.give_back(1);
            return Err(e);
        }

        Ok(())
    }

    /// Keeps `e` for the next call unless it is transient.
    fn defer(&mut self, e: io::Error) {
        if !StreamError::is_would_block(&e) {
            self.deferred = Some(e);
        }
    }

    /// Deregisters from the clock and closes the wrapped sink.
    pub fn close(&mut self) -> io::Result<()> {
        if self.limiter.is_closed() {
            return Ok(());
        }

        self.limiter.close();
        self.inner.close()
    }
}

impl<W: Sink> Write for RateLimitWriter<W> {
    /// Writes `buf` in chunks of at most one tick's budget. In blocking mode this only returns
    /// once every byte has been written; in non-blocking mode it returns what the current budget
    /// allowed, or [`io::ErrorKind::WouldBlock`] if that was nothing.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(e) = self.deferred.take() {
            return Err(e);
        }

        let mut done = 0;

        while done < buf.len() {
            let chunk = (buf.len() - done).min(self.limiter.capacity().max(1) as usize);

            let granted = match self.limiter.take(chunk) {
                Ok(granted) => granted,
                Err(e) if done > 0 => {
                    self.defer(e);
                    break;
                }
                Err(e) => return Err(e),
            };

            let written = match self.inner.write(&buf[done..done + granted]) {
                Ok(n) => n,
                Err(e) => {
                    self.limiter.give_back(granted);
                    if done > 0 {
                        self.defer(e);
                        break;
                    }

                    return Err(e);
                }
            };

            self.limiter.give_back(granted - written);
            done += written;

            if written == 0 {
                break;
            }
        }

        Ok(done)
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(e) = self.deferred.take() {
            return Err(e);
        }

        if self.limiter.is_closed() {
            return Err(StreamError::Closed.into());
        }

        self.inner.flush()
    }
}

impl<W: Sink> Sink for RateLimitWriter<W> {
    fn close(&mut self) -> io::Result<()> {
        RateLimitWriter::close(self)
    }
}

impl<W> RateShaper for RateLimitWriter<W> {
    fn set_byte_rate(&self, byte_rate: u32) {
        self.limiter.set_byte_rate(byte_rate);
    }

    fn byte_rate(&self) -> u32 {
        self.limiter.capacity()
    }

    fn set_prescale(&self, prescale: u32) {
        self.limiter.set_prescale(prescale);
    }

    fn prescale(&self) -> u32 {
        self.limiter.prescale()
    }
}
