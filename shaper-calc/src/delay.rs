use crate::CalcError;

/// Relative error [`DelayCalculator::default`] tolerates.
pub const DEFAULT_EPSILON: f64 = 0.05;
/// Longest tick interval the calculator hands out, in nanoseconds.
pub const MAX_INTERVAL: u64 = 1_000_000_000;

/// Tick-domain parameters of a delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayParams {
    /// Wall-clock length of a tick.
    pub interval_ns: u64,
    /// Delay in ticks.
    pub ticks: u64,
}

impl DelayParams {
    /// The delay these parameters produce, in nanoseconds.
    pub fn nanoseconds(&self) -> u128 {
        u128::from(self.interval_ns) * u128::from(self.ticks)
    }
}

/// Picks a tick interval and a tick count for a delay in nanoseconds.
///
/// Shorter intervals give more precise delays but cost more CPU on the clock thread. The
/// calculator uses the longest interval (at most [`MAX_INTERVAL`]) that keeps the rounding
/// error within `epsilon`. Delays shorter than `1 / epsilon` nanoseconds cannot be split that
/// finely and are returned as a single tick of exactly that length.
#[derive(Debug, Clone, Copy)]
pub struct DelayCalculator {
    epsilon: f64,
}

impl Default for DelayCalculator {
    fn default() -> Self {
        Self { epsilon: DEFAULT_EPSILON }
    }
}

impl DelayCalculator {
    /// Creates a calculator tolerating a relative error of `epsilon`, with `0 < epsilon < 1`.
    pub fn new(epsilon: f64) -> Result<Self, CalcError> {
        if !(epsilon > 0.0 && epsilon < 1.0) {
            return Err(CalcError::InvalidEpsilon(epsilon));
        }

        Ok(Self { epsilon })
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn calculate(&self, nanoseconds: u64) -> DelayParams {
        if nanoseconds == 0 {
            return DelayParams { interval_ns: MAX_INTERVAL, ticks: 0 };
        }

        let divider = ((1.0 / self.epsilon).floor() as u64).max(1);
        if nanoseconds < divider {
            return DelayParams { interval_ns: nanoseconds, ticks: 1 };
        }

        let interval_ns = (nanoseconds / divider).min(MAX_INTERVAL);

        let mut ticks = nanoseconds / interval_ns;
        if (nanoseconds % interval_ns) * 2 >= interval_ns {
            ticks += 1;
        }

        DelayParams { interval_ns, ticks }
    }
}
