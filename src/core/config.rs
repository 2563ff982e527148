//! # Global runtime configuration.
//!
//! Provides [`Config`] centralized settings shared by the orchestrator and every stage
//! it builds. Stage builders take a `&Config` for their supervision defaults.
//!
//! ## Sentinel values
//! - `grace = 0s` → do not wait for tasks at all during shutdown
//! - `bus_capacity = 0` → clamped to 1

use std::time::Duration;

use crate::error::RuntimeError;
use crate::policies::{BackoffPolicy, RestartPolicy};

/// Default shutdown deadline.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// Global configuration for the pipeline runtime.
///
/// ## Field semantics
/// - `grace`: how long shutdown waits for every task's dispatcher to stop
/// - `bus_capacity`: event bus ring buffer size (min 1)
/// - `restart`: restart budget of every supervised slot
/// - `backoff`: delay before each restart
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum time shutdown waits for all tasks; exceeding it is logged, not fatal.
    pub grace: Duration,

    /// Capacity of the event bus broadcast channel.
    ///
    /// Slow subscribers that lag behind more than `bus_capacity` events skip older items.
    pub bus_capacity: usize,

    /// Restart policy applied to every run-loop slot.
    pub restart: RestartPolicy,

    /// Delay between restarts of a failed slot.
    pub backoff: BackoffPolicy,
}

impl Config {
    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Checks values that would otherwise surface as odd runtime behavior.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        let factor = self.backoff.factor;
        if !factor.is_finite() || factor < 0.0 {
            return Err(RuntimeError::InvalidConfig {
                component: "config",
                reason: format!("backoff factor must be finite and >= 0, got {factor}"),
            });
        }
        Ok(())
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `grace = 5s`
    /// - `bus_capacity = 1024`
    /// - `restart = RestartPolicy::Bounded { max_restarts: 2000 }`
    /// - `backoff = BackoffPolicy::default()`
    fn default() -> Self {
        Self {
            grace: DEFAULT_GRACE,
            bus_capacity: 1024,
            restart: RestartPolicy::default(),
            backoff: BackoffPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_nan_factor() {
        let mut cfg = Config::default();
        assert!(cfg.validate().is_ok());

        cfg.backoff.factor = f64::NAN;
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.as_label(), "runtime_invalid_config");
    }
}
