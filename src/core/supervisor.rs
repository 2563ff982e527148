//! # Slot supervisor: bounded crash recovery for one run-loop instance.
//!
//! Every stage instance runs inside a [`SlotSupervisor`]. The supervisor launches the
//! stage's [`Routine`](crate::Routine), and when an attempt fails (error return or panic) it relaunches
//! a fresh attempt until the [`RestartPolicy`] budget is spent.
//!
//! ## Event flow
//! ```text
//! SlotStarting → [run loop] → SlotStopped                       → SlotExit::Completed
//!                           → SlotFailed → RestartScheduled → [sleep] → SlotStarting ...
//!                           → SlotFailed → SlotRetired              → SlotExit::Retired
//! ```
//!
//! ## Architecture
//! ```text
//! stage.start() ──► supervise(SlotSupervisor, token, completions)
//!                        └─► tokio::spawn
//!                              loop {
//!                                ├─► publish SlotStarting
//!                                ├─► run_once(routine)
//!                                │     ├─ Ok / Canceled ─► exit Completed
//!                                │     └─ Fail / Panic  ─► failures += 1
//!                                ├─► restart.allows(failures)?
//!                                │     ├─ no  ─► SlotRetired + warn log + `retired` metric
//!                                │     └─ yes ─► RestartScheduled, sleep(backoff)
//!                                │                  └─ cancelled ─► SlotStopped, exit Completed
//!                              }
//!                              └─► completions.send(SlotExit)
//! ```
//!
//! ## Rules
//! - Attempts of one slot run **sequentially**, never in parallel
//! - The failure counter is a lifetime counter: it never resets
//! - A retired slot is never replaced; the stage runs with reduced capacity from then on
//! - Every slot reports exactly one [`SlotExit`], so a stage's `stop()` can always
//!   collect one completion per slot, retired or not
//!
//! ## Example
//! ```rust
//! use gorgeous::{
//!     BackoffPolicy, Bus, Observers, RestartPolicy, RoutineFn, SlotExit, SlotParams,
//!     SlotSupervisor, TaskError, supervise,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let routine = RoutineFn::arc("flaky", |_ctx: CancellationToken| async {
//!         Err::<(), TaskError>(TaskError::fail("always"))
//!     });
//!     let params = SlotParams {
//!         restart: RestartPolicy::Bounded { max_restarts: 2 },
//!         backoff: BackoffPolicy::immediate(),
//!     };
//!     let sup = SlotSupervisor::new(
//!         routine,
//!         "worker",
//!         "flaky".into(),
//!         0,
//!         params,
//!         Bus::new(16),
//!         Observers::default(),
//!     );
//!
//!     let exit = supervise(sup, CancellationToken::new(), None).await.ok();
//!     assert_eq!(exit, Some(SlotExit::Retired { slot: 0, failures: 3 }));
//! }
//! ```

use std::sync::Arc;

use tokio::{select, task::JoinHandle, time};
use tokio_util::sync::CancellationToken;

use crate::{
    core::queue::QueueSender,
    core::runner::{SlotId, run_once},
    events::{Bus, Event, EventKind},
    observers::{Observers, record_retired},
    policies::{BackoffPolicy, RestartPolicy},
    routines::RoutineRef,
};

/// How a supervised slot ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlotExit {
    /// The run loop observed cancellation and returned.
    Completed {
        /// Slot index.
        slot: u32,
    },
    /// The restart budget was exhausted; the slot is gone for good.
    Retired {
        /// Slot index.
        slot: u32,
        /// Number of failed attempts.
        failures: u32,
    },
}

impl SlotExit {
    /// True for [`SlotExit::Retired`].
    pub fn is_retired(&self) -> bool {
        matches!(self, SlotExit::Retired { .. })
    }
}

/// Restart parameters for one slot.
#[derive(Clone, Copy, Debug)]
pub struct SlotParams {
    /// Restart budget.
    pub restart: RestartPolicy,
    /// Delay before each restart.
    pub backoff: BackoffPolicy,
}

/// Supervises one run-loop slot of a stage.
pub struct SlotSupervisor {
    routine: RoutineRef,
    slot: SlotId,
    kind: &'static str,
    name: Arc<str>,
    params: SlotParams,
    bus: Bus,
    observers: Observers,
}

impl SlotSupervisor {
    /// Creates a supervisor for slot `index` of the stage `kind:name`.
    pub fn new(
        routine: RoutineRef,
        kind: &'static str,
        name: Arc<str>,
        index: u32,
        params: SlotParams,
        bus: Bus,
        observers: Observers,
    ) -> Self {
        let slot = SlotId {
            stage: format!("{kind}:{name}").into(),
            index,
        };
        Self {
            routine,
            slot,
            kind,
            name,
            params,
            bus,
            observers,
        }
    }

    /// Reports under `label` instead of `kind:name`.
    pub fn with_label(mut self, label: Arc<str>) -> Self {
        self.slot.stage = label;
        self
    }

    /// Runs attempts until the routine completes, the token is cancelled during a
    /// restart delay, or the restart budget is exhausted.
    pub async fn run(self, token: CancellationToken) -> SlotExit {
        let index = self.slot.index;
        let mut attempt: u32 = 0;
        let mut failures: u32 = 0;

        loop {
            if token.is_cancelled() {
                return SlotExit::Completed { slot: index };
            }

            attempt = attempt.saturating_add(1);
            self.bus.publish(self.event(EventKind::SlotStarting).with_attempt(attempt));

            let err = match run_once(self.routine.as_ref(), &token, &self.slot, attempt, &self.bus)
                .await
            {
                Ok(()) => return SlotExit::Completed { slot: index },
                Err(e) if !e.is_restartable() => return SlotExit::Completed { slot: index },
                Err(e) => e,
            };

            failures = failures.saturating_add(1);
            if !self.params.restart.allows(failures) {
                self.retire(attempt, failures, &err.to_string());
                return SlotExit::Retired {
                    slot: index,
                    failures,
                };
            }

            let delay = self.params.backoff.delay_for(failures);
            self.bus.publish(
                self.event(EventKind::RestartScheduled)
                    .with_attempt(attempt)
                    .with_delay(delay)
                    .with_reason(err.to_string()),
            );
            self.observers.logger.debug(format_args!(
                "{}: slot {index} failed ({}), restarting in {delay:?}",
                self.slot.stage,
                err.as_label()
            ));

            let sleep = time::sleep(delay);
            tokio::pin!(sleep);
            select! {
                _ = &mut sleep => {}
                _ = token.cancelled() => {
                    self.bus.publish(self.event(EventKind::SlotStopped).with_attempt(attempt));
                    return SlotExit::Completed { slot: index };
                }
            }
        }
    }

    fn retire(&self, attempt: u32, failures: u32, reason: &str) {
        self.bus.publish(
            self.event(EventKind::SlotRetired)
                .with_attempt(attempt)
                .with_reason(reason.to_string()),
        );
        self.observers.logger.warn(format_args!(
            "{}: slot {} retired after {failures} failures, last: {reason}",
            self.slot.stage, self.slot.index
        ));
        record_retired(
            self.observers.metrics.as_ref(),
            self.observers.logger.as_ref(),
            self.kind,
            &self.name,
        );
    }

    fn event(&self, kind: EventKind) -> Event {
        Event::new(kind)
            .with_stage(self.slot.stage.clone())
            .with_slot(self.slot.index)
    }
}

/// Starts `supervisor` as an independent tokio task.
///
/// When the slot ends, its [`SlotExit`] is pushed onto `completions` (if given) and
/// also returned through the join handle.
pub fn supervise(
    supervisor: SlotSupervisor,
    token: CancellationToken,
    completions: Option<QueueSender<SlotExit>>,
) -> JoinHandle<SlotExit> {
    tokio::spawn(async move {
        let exit = supervisor.run(token).await;
        if let Some(done) = completions {
            let _ = done.send(exit.clone()).await;
        }
        exit
    })
}
