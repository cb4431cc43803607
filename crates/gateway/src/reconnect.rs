//! Reconnect backoff. The delay computation is pure; only [`ReconnectPolicy::next`]
//! draws randomness.

use std::time::Duration;

use {courier_config::ReconnectConfig, rand::Rng};

/// Exponential backoff with optional symmetric jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub factor: f64,
    /// Fraction of the delay added or removed at random; 0 disables.
    pub jitter: f64,
    /// 0 retries forever.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            initial: Duration::from_millis(config.initial_ms),
            max: Duration::from_millis(config.max_ms.max(config.initial_ms)),
            factor: if config.factor.is_finite() && config.factor >= 1.0 {
                config.factor
            } else {
                1.0
            },
            jitter: config.jitter.clamp(0.0, 1.0),
            max_attempts: config.max_attempts,
        }
    }
}

/// What to do after the `attempt`-th consecutive failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Retry { attempt: u32, delay: Duration },
    GiveUp { attempts: u32 },
}

impl ReconnectPolicy {
    /// Delay before retry `attempt` (1-based) without jitter:
    /// `initial * factor^(attempt - 1)`, capped at `max`.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.initial.as_millis() as f64 * self.factor.powi(exponent);
        let capped = millis.min(self.max.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Decide on retry `attempt` given a jitter `sample` in `[-1, 1]`.
    #[must_use]
    pub fn compute(&self, attempt: u32, sample: f64) -> Backoff {
        if self.max_attempts > 0 && attempt > self.max_attempts {
            return Backoff::GiveUp {
                attempts: attempt - 1,
            };
        }
        let base = self.base_delay(attempt).as_millis() as f64;
        let jittered = base * (1.0 + self.jitter * sample.clamp(-1.0, 1.0));
        let delay = jittered.clamp(0.0, self.max.as_millis() as f64);
        Backoff::Retry {
            attempt,
            delay: Duration::from_millis(delay as u64),
        }
    }

    /// [`Self::compute`] with a uniformly random jitter sample.
    #[must_use]
    pub fn next(&self, attempt: u32) -> Backoff {
        let sample = if self.jitter > 0.0 {
            rand::rng().random_range(-1.0..=1.0)
        } else {
            0.0
        };
        self.compute(attempt, sample)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, rstest::rstest};

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy {
            initial: Duration::from_millis(2_000),
            max: Duration::from_millis(30_000),
            factor: 1.8,
            jitter: 0.25,
            max_attempts: 12,
        }
    }

    fn delay(b: Backoff) -> Duration {
        match b {
            Backoff::Retry { delay, .. } => delay,
            Backoff::GiveUp { .. } => panic!("unexpected give-up"),
        }
    }

    #[rstest]
    #[case(1, 2_000)]
    #[case(2, 3_600)]
    #[case(3, 6_480)]
    #[case(10, 30_000)]
    fn base_delay_grows_and_caps(#[case] attempt: u32, #[case] ms: u64) {
        assert_eq!(policy().base_delay(attempt), Duration::from_millis(ms));
    }

    #[test]
    fn expected_delay_never_decreases() {
        let p = policy();
        let mut previous = Duration::ZERO;
        for attempt in 1..=5 {
            // Symmetric jitter: the mean of the extremes is the base delay.
            let low = delay(p.compute(attempt, -1.0));
            let high = delay(p.compute(attempt, 1.0));
            let mean = (low + high) / 2;
            assert!(mean >= previous, "attempt {attempt}: {mean:?} < {previous:?}");
            previous = mean;
        }
    }

    #[test]
    fn jitter_stays_in_bounds() {
        let p = policy();
        for _ in 0..200 {
            let d = delay(p.next(2));
            assert!(d >= Duration::from_millis(2_700) && d <= Duration::from_millis(4_500));
        }
    }

    #[test]
    fn zero_jitter_is_deterministic() {
        let p = ReconnectPolicy {
            jitter: 0.0,
            ..policy()
        };
        assert_eq!(delay(p.next(3)), delay(p.next(3)));
        assert_eq!(delay(p.compute(1, 1.0)), Duration::from_millis(2_000));
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let p = policy();
        assert!(matches!(p.compute(12, 0.0), Backoff::Retry { attempt: 12, .. }));
        assert_eq!(p.compute(13, 0.0), Backoff::GiveUp { attempts: 12 });
    }

    #[test]
    fn zero_max_attempts_is_unlimited() {
        let p = ReconnectPolicy {
            max_attempts: 0,
            ..policy()
        };
        assert_eq!(delay(p.compute(10_000, 0.0)), Duration::from_millis(30_000));
    }

    #[test]
    fn from_config_sanitizes() {
        let p = ReconnectPolicy::from(&ReconnectConfig {
            initial_ms: 500,
            max_ms: 100,
            factor: 0.5,
            jitter: 3.0,
            max_attempts: 0,
        });
        assert_eq!(p.max, Duration::from_millis(500));
        assert_eq!(p.factor, 1.0);
        assert_eq!(p.jitter, 1.0);
    }
}
