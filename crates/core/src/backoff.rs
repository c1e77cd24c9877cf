use std::time::Duration;

use rand::Rng;

/// Exponential backoff with symmetric random jitter.
///
/// The delay for a zero-based `attempt` is `min(base * multiplier^attempt, max)`,
/// scaled by a random factor in `[1 - jitter, 1 + jitter]` and clamped again
/// so it never exceeds `max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound on any computed delay.
    pub max: Duration,
    /// Factor applied on each successive attempt.
    pub multiplier: f64,
    /// Fractional jitter, e.g. `0.1` for ±10%.
    pub jitter: f64,
}

/// Smallest delay handed out, so consecutive schedules always move forward.
const MIN_DELAY: Duration = Duration::from_millis(1);

impl Backoff {
    /// Compute the delay for `attempt`, drawing jitter from the thread RNG.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use mediagate_core::Backoff;
    ///
    /// let backoff = Backoff {
    ///     base: Duration::from_secs(1),
    ///     max: Duration::from_secs(10),
    ///     multiplier: 2.0,
    ///     jitter: 0.0,
    /// };
    /// assert_eq!(backoff.delay_for(0), Duration::from_secs(1));
    /// assert_eq!(backoff.delay_for(3), Duration::from_secs(8));
    /// assert_eq!(backoff.delay_for(9), Duration::from_secs(10));
    /// ```
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let unit = if self.jitter > 0.0 {
            rand::thread_rng().gen_range(-1.0..=1.0)
        } else {
            0.0
        };
        self.delay_with_jitter(attempt, unit)
    }

    /// Compute the delay for `attempt` with an explicit jitter sample in
    /// `[-1.0, 1.0]` (values outside are clamped).
    #[must_use]
    pub fn delay_with_jitter(&self, attempt: u32, unit: f64) -> Duration {
        let max_secs = self.max.as_secs_f64();
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.base.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = if raw.is_finite() { raw.min(max_secs) } else { max_secs };

        let factor = 1.0 + self.jitter * unit.clamp(-1.0, 1.0);
        let jittered = (capped * factor).clamp(0.0, max_secs);

        Duration::try_from_secs_f64(jittered)
            .map_or(self.max, |delay| delay.min(self.max))
            .max(MIN_DELAY.min(self.max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff(jitter: f64) -> Backoff {
        Backoff {
            base: Duration::from_secs(300),
            max: Duration::from_secs(86_400),
            multiplier: 2.0,
            jitter,
        }
    }

    #[test]
    fn exponential_without_jitter() {
        let b = backoff(0.0);
        assert_eq!(b.delay_for(0), Duration::from_secs(300));
        assert_eq!(b.delay_for(1), Duration::from_secs(600));
        assert_eq!(b.delay_for(4), Duration::from_secs(4_800));
    }

    #[test]
    fn clamped_to_max() {
        let b = backoff(0.0);
        // 300 * 2^9 = 153_600 > 86_400
        assert_eq!(b.delay_for(9), Duration::from_secs(86_400));
        assert_eq!(b.delay_for(u32::MAX), Duration::from_secs(86_400));
    }

    #[test]
    fn jitter_stays_within_band() {
        let b = backoff(0.1);
        for _ in 0..200 {
            let d = b.delay_for(2).as_secs_f64();
            assert!((1_080.0..=1_320.0).contains(&d), "delay {d} outside ±10%");
        }
    }

    #[test]
    fn explicit_jitter_extremes() {
        let b = backoff(0.1);
        assert_eq!(b.delay_with_jitter(0, -1.0), Duration::from_secs(270));
        assert_eq!(b.delay_with_jitter(0, 1.0), Duration::from_secs(330));
        assert_eq!(b.delay_with_jitter(0, 5.0), Duration::from_secs(330));
    }

    #[test]
    fn jitter_never_exceeds_cap() {
        let b = backoff(0.1);
        assert_eq!(b.delay_with_jitter(20, 1.0), Duration::from_secs(86_400));
        assert!(b.delay_with_jitter(20, -1.0) < Duration::from_secs(86_400));
    }

    #[test]
    fn huge_cap_saturates() {
        let b = Backoff {
            base: Duration::from_secs(u64::MAX),
            max: Duration::from_secs(u64::MAX),
            multiplier: 2.0,
            jitter: 0.1,
        };
        assert_eq!(b.delay_with_jitter(0, 0.0), b.max);
        assert_eq!(b.delay_with_jitter(3, 1.0), b.max);
        assert!(b.delay_with_jitter(0, -1.0) < b.max);
        assert!(b.delay_for(u32::MAX) <= b.max);
    }

    #[test]
    fn delay_is_never_zero() {
        let b = Backoff {
            base: Duration::ZERO,
            max: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: 0.0,
        };
        assert!(b.delay_for(0) > Duration::ZERO);
    }
}
