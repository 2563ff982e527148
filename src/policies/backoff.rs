//! # Delay between restarts of a failed slot.
//!
//! The delay before restart `n` (1-based) is `first × factor^(n-1)`, capped at `max`,
//! then jittered. [`BackoffPolicy::immediate`] relaunches without waiting, which is
//! what a freshly-crashed run loop got historically; the default waits a little so
//! a deterministic fault does not spin through its whole restart budget.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use gorgeous::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_millis(10),
//!     max: Duration::from_millis(100),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.delay_for(1), Duration::from_millis(10));
//! assert_eq!(backoff.delay_for(3), Duration::from_millis(40));
//! assert_eq!(backoff.delay_for(30), Duration::from_millis(100));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Restart backoff policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first restart.
    pub first: Duration,
    /// Cap for any single delay.
    pub max: Duration,
    /// Multiplicative growth per restart (`1.0` = constant).
    pub factor: f64,
    /// Randomization applied after capping.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// `first = 10ms`, `factor = 2.0`, `max = 1s`, no jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(10),
            max: Duration::from_secs(1),
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// Relaunch immediately after a failure.
    pub const fn immediate() -> Self {
        Self {
            first: Duration::ZERO,
            max: Duration::ZERO,
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }

    /// Computes the delay before restart number `restart` (1-based).
    ///
    /// Non-finite or negative intermediate values clamp to `max`.
    pub fn delay_for(&self, restart: u32) -> Duration {
        let exp = restart.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);
        let base = if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        };
        self.jitter.apply(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_never_waits() {
        let policy = BackoffPolicy::immediate();
        assert_eq!(policy.delay_for(1), Duration::ZERO);
        assert_eq!(policy.delay_for(2000), Duration::ZERO);
    }

    #[test]
    fn default_grows_then_caps() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for(2), Duration::from_millis(20));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn first_above_max_is_capped() {
        let policy = BackoffPolicy {
            first: Duration::from_secs(3),
            max: Duration::from_secs(1),
            factor: 1.0,
            jitter: JitterPolicy::None,
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
    }
}
