//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish runtime events emitted by slot supervisors, stages and the
//! orchestrator.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `core::supervisor`, `core::runner`, every stage, the
//!   `Orchestrator`, `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the orchestrator listener, which fans out to the
//!   `SubscriberSet` and updates `LiveSlots`.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
