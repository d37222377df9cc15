use std::{sync::Arc, time::Duration};

use shaper_calc::{CalcError, DelayCalculator, RateCalculator};
use shaper_clock::{ClockError, RealTimeClock};
use shaper_common::{Sink, Source};
use shaper_stream::{
    DelayOptions, DelayedReader, DelayedWriter, RateLimitReader, RateLimitWriter, RateOptions,
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ShaperError {
    #[error("Calculation error: {0}")]
    Calc(#[from] CalcError),
    #[error("Clock error: {0}")]
    Clock(#[from] ClockError),
}

/// Constructors for shaped streams in human units.
///
/// Each constructor computes tick parameters with the calculators, creates a dedicated
/// [`RealTimeClock`] with the matching interval, wraps the stream and starts the clock. The
/// wrapper keeps its clock alive, and the clock stops once the wrapper is closed or dropped.
///
/// The byte rate and delay fields of the given options are overwritten; the other fields are
/// kept.
#[derive(Debug, Clone, Copy)]
pub struct Streams;

impl Streams {
    /// Limits reads from `inner` to `bytes_per_second`.
    pub fn rate_limited_reader<R: Source>(
        inner: R,
        bytes_per_second: f64,
        options: RateOptions,
    ) -> Result<RateLimitReader<R>, ShaperError> {
        let params = RateCalculator::calculate(bytes_per_second)?;
        debug!(bytes_per_second, ?params, "Rate-limiting reader");

        let clock = Arc::new(RealTimeClock::new(params.interval_ns));
        let options =
            options.with_byte_rate(params.bytes_per_tick).with_prescale(params.prescale);
        let reader = RateLimitReader::new(inner, clock.clone(), options);
        clock.start()?;

        Ok(reader)
    }

    /// Limits writes to `inner` to `bytes_per_second`.
    pub fn rate_limited_writer<W: Sink>(
        inner: W,
        bytes_per_second: f64,
        options: RateOptions,
    ) -> Result<RateLimitWriter<W>, ShaperError> {
        let params = RateCalculator::calculate(bytes_per_second)?;
        debug!(bytes_per_second, ?params, "Rate-limiting writer");

        let clock = Arc::new(RealTimeClock::new(params.interval_ns));
        let options =
            options.with_byte_rate(params.bytes_per_tick).with_prescale(params.prescale);
        let writer = RateLimitWriter::new(inner, clock.clone(), options);
        clock.start()?;

        Ok(writer)
    }

    /// Delays every byte read from `inner` by `delay`.
    pub fn delayed_reader<R: Source + Send + 'static>(
        inner: R,
        delay: Duration,
        options: DelayOptions,
    ) -> Result<DelayedReader<R>, ShaperError> {
        let (clock, ticks) = Self::delay_clock(delay);
        let reader = DelayedReader::new(inner, clock.clone(), options.with_delay(ticks));
        clock.start()?;

        Ok(reader)
    }

    /// Delays every byte written to `inner` by `delay`.
    pub fn delayed_writer<W: Sink + Send + 'static>(
        inner: W,
        delay: Duration,
        options: DelayOptions,
    ) -> Result<DelayedWriter<W>, ShaperError> {
        let (clock, ticks) = Self::delay_clock(delay);
        let writer = DelayedWriter::new(inner, clock.clone(), options.with_delay(ticks));
        clock.start()?;

        Ok(writer)
    }

    fn delay_clock(delay: Duration) -> (Arc<RealTimeClock>, u64) {
        let nanoseconds = u64::try_from(delay.as_nanos()).unwrap_or(u64::MAX);
        let params = DelayCalculator::default().calculate(nanoseconds);
        debug!(?delay, ?params, "Delaying stream");

        (Arc::new(RealTimeClock::new(params.interval_ns)), params.ticks)
    }
}
