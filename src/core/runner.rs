//! # Run a single attempt of a slot's run loop.
//!
//! Executes one attempt of a [`Routine`] under a panic guard and publishes the
//! terminal event for that attempt to the [`Bus`].
//!
//! ## Event flow
//! ```text
//! Ok(()) / Err(Canceled)  → SlotStopped   (graceful exit)
//! Err(Fail)               → SlotFailed
//! panic                   → SlotFailed    (converted to TaskError::Panicked)
//! ```
//!
//! ## Rules
//! - Always publishes **exactly one** terminal event per attempt
//! - Derives a **child token** per attempt; cancelling it does not affect the parent

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::{
    error::TaskError,
    events::{Bus, Event, EventKind},
    routines::Routine,
};

/// Identity of one supervised slot.
#[derive(Clone, Debug)]
pub struct SlotId {
    /// Stage label, e.g. `worker:enrich`.
    pub stage: std::sync::Arc<str>,
    /// Index of the slot within the stage.
    pub index: u32,
}

impl SlotId {
    fn event(&self, kind: EventKind, attempt: u32) -> Event {
        Event::new(kind)
            .with_stage(self.stage.clone())
            .with_slot(self.index)
            .with_attempt(attempt)
    }
}

/// Executes one attempt of `routine`, publishing the outcome to `bus`.
///
/// A panic inside the routine is caught and returned as [`TaskError::Panicked`],
/// so it takes the same restart path as an error return.
pub async fn run_once<R: Routine + ?Sized>(
    routine: &R,
    parent: &CancellationToken,
    slot: &SlotId,
    attempt: u32,
    bus: &Bus,
) -> Result<(), TaskError> {
    let child = parent.child_token();
    let res = match AssertUnwindSafe(routine.spawn(child.clone()))
        .catch_unwind()
        .await
    {
        Ok(res) => res,
        Err(payload) => Err(TaskError::Panicked {
            info: panic_message(payload.as_ref()),
        }),
    };
    child.cancel();

    match res {
        Ok(()) => {
            bus.publish(slot.event(EventKind::SlotStopped, attempt));
            Ok(())
        }
        Err(TaskError::Canceled) => {
            bus.publish(slot.event(EventKind::SlotStopped, attempt));
            Err(TaskError::Canceled)
        }
        Err(e) => {
            bus.publish(
                slot.event(EventKind::SlotFailed, attempt)
                    .with_reason(e.to_string()),
            );
            Err(e)
        }
    }
}

/// Renders a panic payload as text.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
