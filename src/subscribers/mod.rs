//! # Event subscribers.
//!
//! The orchestrator listens on the [`Bus`](crate::events::Bus) while it runs and hands
//! every event to a [`SubscriberSet`], which fans it out to user [`Subscribe`]rs.
//!
//! ```text
//! stages / supervisors ── publish ──► Bus ──► orchestrator listener
//!                                                 ├──► LiveSlots::update
//!                                                 └──► SubscriberSet::emit
//!                                                         ├──► [queue] ─► sub1.on_event()
//!                                                         └──► [queue] ─► subN.on_event()
//! ```
//!
//! Enable the `logging` feature for the built-in [`LogWriter`].

#[cfg(feature = "logging")]
mod log;
mod subscribe;
mod subscribe_set;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use subscribe::Subscribe;
pub use subscribe_set::SubscriberSet;
