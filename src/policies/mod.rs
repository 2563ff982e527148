//! Restart policies for supervised slots.
//!
//! ## Contents
//! - [`RestartPolicy`] how many times a failed slot is relaunched
//! - [`BackoffPolicy`] how long to wait before each relaunch
//! - [`JitterPolicy`]  randomization of that wait
//!
//! ## Quick wiring
//! ```text
//! Config { restart, backoff }
//!      └─► stage builders ─► core::supervisor::SlotSupervisor uses:
//!           - restart.allows(failures) to relaunch or retire
//!           - backoff.delay_for(restart) before relaunching
//! ```

mod backoff;
mod jitter;
mod restart;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
pub use restart::{DEFAULT_MAX_RESTARTS, RestartPolicy};
