//! # Subscriber trait.
//!
//! `Subscribe` is how callers observe the runtime: slot restarts, retirements,
//! stage lifecycle and shutdown progress all arrive as [`Event`]s.
//!
//! ## Contract
//! - Handlers may be slow. Each one runs on its own worker, fed by a bounded queue
//!   owned by the [`SubscriberSet`](crate::subscribers::SubscriberSet), so it never
//!   blocks stages or other subscribers.
//! - When that queue is full the event is dropped for this subscriber only, and a
//!   `SubscriberOverflow` event is published.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use gorgeous::{Event, EventKind, Subscribe};
//!
//! struct Retirements;
//!
//! #[async_trait]
//! impl Subscribe for Retirements {
//!     async fn on_event(&self, ev: &Event) {
//!         if ev.kind == EventKind::SlotRetired {
//!             // page someone
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str {
//!         "retirements"
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Receives runtime events on a dedicated worker task.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handles one event.
    async fn on_event(&self, event: &Event);

    /// Name used in overflow and panic events.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Capacity of this subscriber's queue (min 1).
    fn queue_capacity(&self) -> usize {
        1024
    }
}
