//! # Restart policy for supervised slots.
//!
//! [`RestartPolicy`] bounds how many times a failed run-loop slot is relaunched.
//!
//! - [`RestartPolicy::Never`] a failed slot is retired immediately.
//! - [`RestartPolicy::Bounded`] a failed slot is relaunched up to `max_restarts` times (default: 2000).
//! - [`RestartPolicy::Unlimited`] a failed slot is always relaunched.
//!
//! The restart counter is a lifetime counter per slot: it never resets, so a slot
//! that fails intermittently eventually retires under `Bounded`.
//!
//! ```text
//! failure #1 ─► restart 1 ─► ... ─► failure #max+1 ─► SlotRetired (capacity lost)
//! ```

/// Default restart budget per slot.
pub const DEFAULT_MAX_RESTARTS: u32 = 2000;

/// Policy controlling whether a failed slot is relaunched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Never restart: the first failure retires the slot.
    Never,
    /// Restart while the number of restarts so far is `<= max_restarts`.
    Bounded {
        /// Restart budget for the slot's lifetime.
        max_restarts: u32,
    },
    /// Restart forever.
    Unlimited,
}

impl RestartPolicy {
    /// Whether a slot that has already failed `failures` times may run again.
    ///
    /// `failures` counts the failure just observed, so the first failure is `1`.
    pub fn allows(&self, failures: u32) -> bool {
        match *self {
            RestartPolicy::Never => false,
            RestartPolicy::Bounded { max_restarts } => failures <= max_restarts,
            RestartPolicy::Unlimited => true,
        }
    }
}

impl Default for RestartPolicy {
    /// Returns `Bounded { max_restarts: 2000 }`.
    fn default() -> Self {
        RestartPolicy::Bounded {
            max_restarts: DEFAULT_MAX_RESTARTS,
        }
    }
}
