//! Bandwidth and latency shaping for byte streams.
//!
//! Wrap any [`Source`] or [`Sink`] in a rate limiter or a delay buffer, drive them with a
//! [`SimulationClock`] for deterministic tests or a [`RealTimeClock`] for wall-clock shaping,
//! and pump bytes through them like through the wrapped stream. [`Streams`] builds real-time
//! shaped streams straight from bytes per second and [`Duration`](std::time::Duration)s.
#![doc(issue_tracker_base_url = "https://github.com/chainbound/msg-rs/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod streams;
pub use streams::{ShaperError, Streams};

pub use shaper_calc::*;
pub use shaper_clock::*;
pub use shaper_common::*;
pub use shaper_stream::*;
