//! # Jitter for restart delays.
//!
//! When many slots of one stage fail together (a shared dependency went away),
//! jitter spreads their restarts so they do not hammer the collaborator in lockstep.
//!
//! - [`JitterPolicy::None`] exact delay
//! - [`JitterPolicy::Full`] random in `[0, delay]`
//! - [`JitterPolicy::Equal`] `delay/2 + random[0, delay/2]`

use rand::Rng;
use std::time::Duration;

/// Randomization applied to a computed restart delay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JitterPolicy {
    /// Use the delay as computed.
    #[default]
    None,
    /// Random delay in `[0, delay]`.
    Full,
    /// `delay/2 + random[0, delay/2]`.
    Equal,
}

impl JitterPolicy {
    /// Applies jitter to `delay`.
    pub fn apply(&self, delay: Duration) -> Duration {
        let ms = delay.as_millis().min(u128::from(u64::MAX)) as u64;
        if ms == 0 {
            return delay;
        }
        let mut rng = rand::rng();
        match self {
            JitterPolicy::None => delay,
            JitterPolicy::Full => Duration::from_millis(rng.random_range(0..=ms)),
            JitterPolicy::Equal => {
                let half = ms / 2;
                Duration::from_millis(half + rng.random_range(0..=ms - half))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_delay_stays_zero() {
        for jitter in [JitterPolicy::None, JitterPolicy::Full, JitterPolicy::Equal] {
            assert_eq!(jitter.apply(Duration::ZERO), Duration::ZERO);
        }
    }

    #[test]
    fn equal_jitter_keeps_lower_half() {
        let d = Duration::from_millis(400);
        for _ in 0..64 {
            let j = JitterPolicy::Equal.apply(d);
            assert!(j >= Duration::from_millis(200) && j <= d, "{j:?}");
        }
    }

    #[test]
    fn full_jitter_never_exceeds_delay() {
        let d = Duration::from_millis(50);
        for _ in 0..64 {
            assert!(JitterPolicy::Full.apply(d) <= d);
        }
    }
}
