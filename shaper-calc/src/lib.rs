//! Translation of human units into tick parameters.
//!
//! Shaped streams think in ticks: a rate is a number of bytes every `prescale` ticks, a delay
//! is a number of ticks. [`RateCalculator`] and [`DelayCalculator`] pick a tick interval and
//! the matching tick-domain parameters for a rate in bytes per second or a delay in
//! nanoseconds, within a bounded error.
#![doc(issue_tracker_base_url = "https://github.com/chainbound/msg-rs/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

use thiserror::Error;

mod delay;
mod rate;

pub use delay::{DelayCalculator, DelayParams, DEFAULT_EPSILON, MAX_INTERVAL};
pub use rate::{
    RateCalculator, RateParams, MAX_BYTES_PER_TICK, MAX_INTERVAL_NS, MAX_RATE, MIN_INTERVAL_NS,
    MIN_RATE,
};

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum CalcError {
    #[error("Byte rate {0} is outside of the representable range")]
    RateOutOfRange(f64),
    #[error("Epsilon {0} not within (0, 1)")]
    InvalidEpsilon(f64),
}

pub(crate) const NS_PER_S: f64 = 1_000_000_000.0;
