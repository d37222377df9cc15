use std::{
    io::{self, Read},
    sync::Arc,
};

use shaper_clock::TickSource;
use shaper_common::{Source, StreamError};

use super::{RateLimiter, RateOptions, RateShaper};

/// A [`Source`] wrapper that reads at most `byte_rate` bytes every `prescale` ticks.
#[derive(Debug)]
pub struct RateLimitReader<R> {
    inner: R,
    limiter: RateLimiter,
    boring: bool,
    /// An error hit after bytes were already handed out, returned by the next call.
    deferred: Option<io::Error>,
}

impl<R: Source> RateLimitReader<R> {
    pub fn new(inner: R, clock: Arc<dyn TickSource>, options: RateOptions) -> Self {
        let mut limiter = RateLimiter::new(clock, options.byte_rate, options.prescale);
        limiter.set_policy(options.policy());

        Self { inner, limiter, boring: options.boring, deferred: None }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn limiter_mut(&mut self) -> &mut RateLimiter {
        &mut self.limiter
    }

    pub fn set_boring(&mut self, boring: bool) {
        self.boring = boring;
    }

    /// Reads a single byte once a unit of budget is available. Returns `None` at end of stream.
    pub fn read_byte(&mut self) -> io::Result<Option<u8>> {
        if let Some(e) = self.deferred.take() {
            return Err(e);
        }

        self.limiter.take_one()?;

        let mut byte = [0u8];
        match self.inner.read(&mut byte) {
            Ok(0) => {
                self.limiter.give_back(1);
                Ok(None)
            }
            Ok(_) => Ok(Some(byte[0])),
            Err(e) => {
                self.limiter.give_back(1);
                Err(e)
            }
        }
    }

    /// Deregisters from the clock and closes the wrapped source.
    pub fn close(&mut self) -> io::Result<()> {
        if self.limiter.is_closed() {
            return Ok(());
        }

        self.limiter.close();
        self.inner.close()
    }

    /// Keeps `e` for the next call unless it is transient.
    fn defer(&mut self, e: io::Error) {
        if !StreamError::is_would_block(&e) {
            self.deferred = Some(e);
        }
    }

    /// Whether another chunk should be pulled within the same call.
    fn keep_reading(&mut self) -> io::Result<bool> {
        let pending = self.inner.available()?;
        Ok(pending > 0 && (self.boring || self.limiter.timewise_available() > 0))
    }
}

impl<R: Source> Read for RateLimitReader<R> {
    /// Reads at least one byte, then keeps reading while both the budget and the wrapped source
    /// have bytes immediately available. In boring mode the budget is ignored for that decision,
    /// so the call waits for further ticks as long as the source has data.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(e) = self.deferred.take() {
            return Err(e);
        }

        let mut done = 0;

        while done < buf.len() {
            if done > 0 {
                match self.keep_reading() {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        self.defer(e);
                        break;
                    }
                }
            }

            let chunk = (buf.len() - done).min(self.limiter.capacity().max(1) as usize);

            let granted = match self.limiter.take(chunk) {
                Ok(granted) => granted,
                Err(e) if done > 0 => {
                    self.defer(e);
                    break;
                }
                Err(e) => return Err(e),
            };

            let n = match self.inner.read(&mut buf[done..done + granted]) {
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

            self.limiter.give_back(granted - n);
            done += n;

            if n == 0 {
                break;
            }
        }

        Ok(done)
    }
}

impl<R: Source> Source for RateLimitReader<R> {
    /// The bytes the wrapped source has ready, bounded by what is left of the current budget.
    fn available(&mut self) -> io::Result<usize> {
        if let Some(e) = self.deferred.take() {
            return Err(e);
        }

        if self.limiter.is_closed() {
            return Err(StreamError::Closed.into());
        }

        Ok(self.inner.available()?.min(self.limiter.timewise_available()))
    }

    fn close(&mut self) -> io::Result<()> {
        RateLimitReader::close(self)
    }
}

impl<R> RateShaper for RateLimitReader<R> {
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
