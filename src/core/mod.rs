//! Runtime core: the machinery every stage is built on.
//!
//! - [`queue`]: rendezvous and bounded MPMC queues with explicit close;
//! - [`runner`]: executes one attempt of a run loop under a panic guard;
//! - [`supervisor`]: restarts failed attempts up to a budget, then retires the slot;
//! - [`live`]: tracks live slots per stage from bus events;
//! - [`config`]: runtime-wide settings;
//! - [`shutdown`]: process termination signal.

pub mod config;
pub mod live;
pub mod queue;
pub mod runner;
pub mod shutdown;
pub mod supervisor;

pub use config::{Config, DEFAULT_GRACE};
pub use live::LiveSlots;
pub use shutdown::wait_for_shutdown_signal;
pub use supervisor::{SlotExit, SlotParams, SlotSupervisor, supervise};
