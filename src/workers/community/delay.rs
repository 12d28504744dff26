use std::time::Duration;

use rand::Rng;

/// Source of simulated latency for a lookup.
#[cfg_attr(test, mockall::automock)]
pub trait DelayGenerator: Send + Sync {
    fn next_delay(&self, key: &str) -> Duration;
}

/// Uniformly random delay in `[0, max)`, independent of the key.
#[derive(Debug, Clone, Copy)]
pub struct UniformDelay {
    max: Duration,
}

impl UniformDelay {
    pub fn new(max: Duration) -> Self {
        UniformDelay { max }
    }
}

impl DelayGenerator for UniformDelay {
    fn next_delay(&self, _key: &str) -> Duration {
        let max_ms = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
    }
}

/// Same delay every time.
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay(pub Duration);

impl DelayGenerator for FixedDelay {
    fn next_delay(&self, _key: &str) -> Duration {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_delay_stays_below_max() {
        let delays = UniformDelay::new(Duration::from_millis(1000));
        for _ in 0..100 {
            assert!(delays.next_delay("Mikey") < Duration::from_millis(1000));
        }
    }

    #[test]
    fn test_zero_max_means_no_delay() {
        let delays = UniformDelay::new(Duration::ZERO);
        assert_eq!(delays.next_delay("Mikey"), Duration::ZERO);
    }

    #[test]
    fn test_huge_max_does_not_wrap_to_zero() {
        // exactly 2^64 ms, which a plain cast to u64 turns into 0
        let delays = UniformDelay::new(Duration::new(18_446_744_073_709_551, 616_000_000));
        let mut nonzero = false;
        for _ in 0..10 {
            nonzero |= delays.next_delay("Mikey") > Duration::ZERO;
        }
        assert!(nonzero);
    }

    #[test]
    fn test_fixed_delay() {
        let delays = FixedDelay(Duration::from_millis(250));
        assert_eq!(delays.next_delay("Panda"), Duration::from_millis(250));
    }
}
