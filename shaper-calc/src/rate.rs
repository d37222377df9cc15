use crate::{CalcError, NS_PER_S};

/// Shortest tick interval the calculator hands out.
pub const MIN_INTERVAL_NS: u64 = 10_000_000;
/// Longest tick interval the calculator hands out.
pub const MAX_INTERVAL_NS: u64 = 1_000_000_000;
/// Largest per-tick byte budget the calculator hands out.
pub const MAX_BYTES_PER_TICK: u32 = i32::MAX as u32;
/// Lowest representable rate in bytes per second.
pub const MIN_RATE: f64 = 1e-9;
/// Highest representable rate in bytes per second: the largest budget at the shortest interval.
pub const MAX_RATE: f64 = MAX_BYTES_PER_TICK as f64 * (NS_PER_S / MIN_INTERVAL_NS as f64);

/// Tick-domain parameters of a rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateParams {
    /// Bytes granted per replenishment.
    pub bytes_per_tick: u32,
    /// Ticks between replenishments.
    pub prescale: u32,
    /// Wall-clock length of a tick.
    pub interval_ns: u64,
}

impl RateParams {
    /// The rate these parameters produce, in bytes per second.
    pub fn bytes_per_second(&self) -> f64 {
        f64::from(self.bytes_per_tick) * NS_PER_S
            / (f64::from(self.prescale) * self.interval_ns as f64)
    }
}

/// Picks tick parameters for a rate in bytes per second.
///
/// The result satisfies `MIN_INTERVAL_NS <= interval_ns <= MAX_INTERVAL_NS`,
/// `1 <= bytes_per_tick <= MAX_BYTES_PER_TICK` and `prescale >= 1`, and reproduces the requested
/// rate within 1%.
#[derive(Debug, Clone, Copy, Default)]
pub struct RateCalculator;

impl RateCalculator {
    pub fn calculate(bytes_per_second: f64) -> Result<RateParams, CalcError> {
        let rate = bytes_per_second;
        if !rate.is_finite() || !(MIN_RATE..=MAX_RATE).contains(&rate) {
            return Err(CalcError::RateOutOfRange(rate));
        }

        if rate < 1.0 {
            Self::fractional(rate)
        } else {
            Self::whole(rate)
        }
    }

    /// Below one byte per second: one byte every `prescale` ticks, with the prescale a power of
    /// two that brings the interval under the maximum.
    fn fractional(rate: f64) -> Result<RateParams, CalcError> {
        let total_ns = NS_PER_S / rate;

        let mut prescale: u64 = 1;
        while total_ns / prescale as f64 > MAX_INTERVAL_NS as f64 {
            prescale *= 2;
        }

        let prescale = u32::try_from(prescale).map_err(|_| CalcError::RateOutOfRange(rate))?;
        let interval_ns = (total_ns / f64::from(prescale)).round() as u64;

        Self::check(rate, RateParams { bytes_per_tick: 1, prescale, interval_ns })
    }

    /// One byte per second and above: the smallest budget that keeps the interval at or above
    /// the minimum.
    fn whole(rate: f64) -> Result<RateParams, CalcError> {
        let per_min_interval = rate * MIN_INTERVAL_NS as f64 / NS_PER_S;
        let bytes_per_tick = per_min_interval.ceil().clamp(1.0, f64::from(MAX_BYTES_PER_TICK)) as u32;
        let interval_ns = (f64::from(bytes_per_tick) * NS_PER_S / rate).round() as u64;

        Self::check(rate, RateParams { bytes_per_tick, prescale: 1, interval_ns })
    }

    fn check(rate: f64, params: RateParams) -> Result<RateParams, CalcError> {
        if (MIN_INTERVAL_NS..=MAX_INTERVAL_NS).contains(&params.interval_ns) {
            Ok(params)
        } else {
            Err(CalcError::RateOutOfRange(rate))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX_ERROR: f64 = 0.01;

    fn check(rate: f64) {
        let params = RateCalculator::calculate(rate)
            .unwrap_or_else(|e| panic!("no parameters for {rate}: {e}"));

        let error = params.bytes_per_second() / rate - 1.0;
        assert!(error.abs() <= MAX_ERROR, "error {error} too high for {rate}: {params:?}");

        assert!(params.bytes_per_tick >= 1);
        assert!(params.bytes_per_tick <= MAX_BYTES_PER_TICK);
        assert!(params.prescale >= 1);
        assert!(params.interval_ns >= MIN_INTERVAL_NS, "{params:?}");
        assert!(params.interval_ns <= MAX_INTERVAL_NS, "{params:?}");
    }

    #[test]
    fn test_all_byte_rates() {
        for scale in -9..9 {
            for factor in 1..=10 {
                let rate: f64 = format!("{factor}e{scale}").parse().unwrap();
                check(rate);
            }
        }
    }

    #[test]
    fn test_boundaries() {
        check(MIN_RATE);
        check(MAX_RATE);
    }

    #[test]
    fn test_out_of_range() {
        assert_eq!(RateCalculator::calculate(7.5e-10), Err(CalcError::RateOutOfRange(7.5e-10)));
        assert_eq!(RateCalculator::calculate(8.7e13), Err(CalcError::RateOutOfRange(8.7e13)));
        assert!(RateCalculator::calculate(0.0).is_err());
        assert!(RateCalculator::calculate(-5.0).is_err());
        assert!(RateCalculator::calculate(f64::NAN).is_err());
        assert!(RateCalculator::calculate(f64::INFINITY).is_err());
    }

    #[test]
    fn test_fractional_rates() {
        for rate in [0.0001, 0.0005, 0.001, 0.002, 0.005, 0.009, 0.01, 0.05, 0.1, 0.3, 0.7, 0.9] {
            check(rate);
        }

        let params = RateCalculator::calculate(0.5).unwrap();
        assert_eq!(params, RateParams { bytes_per_tick: 1, prescale: 2, interval_ns: 1_000_000_000 });
    }

    #[test]
    fn test_low_and_medium_rates() {
        for rate in [1.0, 2.0, 3.0, 7.0, 17.0, 99.0, 100.0, 101.0, 125.0, 750.0, 1_000.0, 1_100.0, 1_750.0, 12_000.0] {
            check(rate);
        }

        let params = RateCalculator::calculate(1.0).unwrap();
        assert_eq!(params, RateParams { bytes_per_tick: 1, prescale: 1, interval_ns: 1_000_000_000 });
    }

    #[test]
    fn test_high_rates() {
        for mb in [10.0, 12.0, 19.0, 23.0, 33.0, 51.0, 58.0, 95.0, 125.0, 350.0, 550.0, 1_000.0] {
            check(mb * 1e6);
        }

        for gb in [1.0, 1.2, 1.4, 1.6, 1.8, 2.0, 2.5, 3.0, 3.4] {
            check(gb * 1e9);
        }

        let params = RateCalculator::calculate(1e6).unwrap();
        assert_eq!(params, RateParams { bytes_per_tick: 10_000, prescale: 1, interval_ns: 10_000_000 });
    }
}
