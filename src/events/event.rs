//! # Runtime events emitted by slot supervisors, stages and the orchestrator.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Slot events**: supervised run-loop attempts (starting, failed, stopped, restart, retired)
//! - **Stage events**: stage lifecycle (started, stopped)
//! - **Shutdown events**: orchestrator shutdown flow
//! - **Subscriber events**: delivery problems inside the subscriber fan-out
//!
//! The [`Event`] struct carries additional metadata such as timestamps, stage name,
//! slot index, attempt number, reasons, and restart delays.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use gorgeous::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::SlotFailed)
//!     .with_stage("fetcher:orders")
//!     .with_slot(1)
//!     .with_reason("boom")
//!     .with_attempt(3);
//!
//! assert_eq!(ev.kind, EventKind::SlotFailed);
//! assert_eq!(ev.stage.as_deref(), Some("fetcher:orders"));
//! assert_eq!(ev.reason.as_deref(), Some("boom"));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(1);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets:
    /// - `stage`: subscriber name
    /// - `reason`: panic info/message
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets:
    /// - `stage`: subscriber name
    /// - `reason`: reason string (e.g., "full", "closed")
    SubscriberOverflow,

    // === Shutdown events ===
    /// Termination requested; shutdown is starting.
    ShutdownRequested,

    /// Every registered task stopped within the grace period.
    AllStoppedWithin,

    /// Grace period exceeded; some tasks did not stop in time.
    ///
    /// Sets:
    /// - `reason`: names of the stuck tasks
    GraceExceeded,

    // === Stage lifecycle ===
    /// A stage spawned its instances.
    ///
    /// Sets:
    /// - `stage`: stage label (`kind:name`)
    StageStarted,

    /// A stage collected all completions and closed its queues.
    ///
    /// Sets:
    /// - `stage`: stage label
    StageStopped,

    /// A named task was registered on the orchestrator.
    ///
    /// Sets:
    /// - `stage`: task name
    TaskRegistered,

    // === Slot lifecycle ===
    /// A supervised slot is launching an attempt of its run loop.
    ///
    /// Sets:
    /// - `stage`: stage label
    /// - `slot`: slot index within the stage
    /// - `attempt`: attempt number (1-based, per slot)
    SlotStarting,

    /// The run loop returned after observing cancellation.
    ///
    /// Sets:
    /// - `stage`, `slot`, `attempt`
    SlotStopped,

    /// The run loop failed (error return or caught panic).
    ///
    /// Sets:
    /// - `stage`, `slot`, `attempt`
    /// - `reason`: failure message
    SlotFailed,

    /// A restart of a failed slot was scheduled.
    ///
    /// Sets:
    /// - `stage`, `slot`
    /// - `attempt`: failed attempt number
    /// - `delay_ms`: delay before the next attempt
    /// - `reason`: last failure message
    RestartScheduled,

    /// The slot exhausted its restart budget and will never run again.
    ///
    /// Sets:
    /// - `stage`, `slot`
    /// - `attempt`: last attempt number
    /// - `reason`: last failure message
    SlotRetired,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Stage label (or task/subscriber name), if applicable.
    pub stage: Option<Arc<str>>,
    /// Slot index within the stage.
    pub slot: Option<u32>,
    /// Attempt count (starting from 1).
    pub attempt: Option<u32>,
    /// Restart delay in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            stage: None,
            slot: None,
            attempt: None,
            delay_ms: None,
            reason: None,
        }
    }

    /// Attaches a stage label.
    #[inline]
    pub fn with_stage(mut self, stage: impl Into<Arc<str>>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    /// Attaches a slot index.
    #[inline]
    pub fn with_slot(mut self, slot: u32) -> Self {
        self.slot = Some(slot);
        self
    }

    /// Attaches an attempt count.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a restart delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.delay_ms = Some(ms);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_stage(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_stage(subscriber)
            .with_reason(info)
    }

    /// True for events describing a subscriber delivery problem.
    #[inline]
    pub fn is_subscriber_issue(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_increase() {
        let a = Event::new(EventKind::SlotStarting);
        let b = Event::new(EventKind::SlotStopped);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn delay_is_clamped_to_u32_millis() {
        let ev = Event::new(EventKind::RestartScheduled).with_delay(Duration::from_secs(u64::MAX));
        assert_eq!(ev.delay_ms, Some(u32::MAX));
    }
}
