//! Rate-limited warnings for faults that repeat every cycle, such as an
//! unplugged serial cable.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};

/// Lets one warning per second through and counts the ones it swallows.
pub struct WarnThrottle {
    limiter: DefaultDirectRateLimiter,
    suppressed: AtomicU64,
}

impl WarnThrottle {
    pub fn per_second() -> Self {
        Self {
            limiter: RateLimiter::direct(Quota::per_second(NonZeroU32::MIN)),
            suppressed: AtomicU64::new(0),
        }
    }

    /// `Some(n)` if a warning may be logged now, where `n` is the number of
    /// warnings suppressed since the last one; `None` otherwise.
    pub fn allow(&self) -> Option<u64> {
        if self.limiter.check().is_ok() {
            Some(self.suppressed.swap(0, Ordering::Relaxed))
        } else {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            None
        }
    }
}

impl Default for WarnThrottle {
    fn default() -> Self {
        Self::per_second()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_is_collapsed_to_one_warning() {
        let throttle = WarnThrottle::per_second();
        assert_eq!(throttle.allow(), Some(0));
        for _ in 0..10 {
            assert_eq!(throttle.allow(), None);
        }
        assert_eq!(throttle.suppressed.load(Ordering::Relaxed), 10);
    }
}
