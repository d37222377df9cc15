//! Byte streams shaped by a tick clock.
//!
//! Two families of wrappers are provided, each for both directions:
//!
//! - [`RateLimitReader`] and [`RateLimitWriter`] bound throughput to a number of bytes every
//!   `prescale` ticks, accounted by a lock-free [`RateLimiter`].
//! - [`DelayedReader`] and [`DelayedWriter`] hold bytes in a ring buffer until `delay` ticks
//!   have passed.
//!
//! Every wrapper implements [`Source`](shaper_common::Source) or [`Sink`](shaper_common::Sink)
//! itself, so they stack: a rate-limited stream can be delayed and vice versa.
#![doc(issue_tracker_base_url = "https://github.com/chainbound/msg-rs/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod delay;
mod marks;
mod rate;
mod ring;

pub use delay::{DelayOptions, DelayShaper, DelayedReader, DelayedWriter, DEFAULT_BUFFER_SIZE};
pub use rate::{
    BlockingPolicy, IdleHook, RateLimitReader, RateLimitWriter, RateLimiter, RateOptions,
    RateShaper, DEFAULT_BYTE_RATE,
};
