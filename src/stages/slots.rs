//! # Slot group: the lifecycle shared by every stage.
//!
//! A stage runs `size` supervised copies of one run loop. [`SlotGroup`] owns those
//! copies and the completion queue they report to, so Fetcher, Worker and Dispatcher
//! only differ in the run loop they hand over.
//!
//! ## Lifecycle
//! ```text
//! Idle ──start(parent)──► Running{token, handles} ──stop()──► Stopped
//!   │                                                  ▲
//!   └──────────────────────stop()──────────────────────┘   (nothing to collect)
//! ```
//!
//! ## Rules
//! - `stop()` cancels the group's token, then collects exactly `size` [`SlotExit`]s
//!   before closing the completion queue
//! - Retired slots report too, so `stop()` never waits on a slot that is gone
//! - A second `stop()` is a no-op

use std::sync::{Arc, Mutex, PoisonError};

use tokio::select;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    core::queue::{self, Queue, QueueSender},
    core::supervisor::{SlotExit, SlotParams, SlotSupervisor, supervise},
    error::{QueueError, RuntimeError},
    events::{Bus, Event, EventKind},
    observers::Observers,
    routines::RoutineRef,
};

enum Run {
    Idle,
    Running {
        token: CancellationToken,
        handles: Vec<JoinHandle<SlotExit>>,
    },
    Stopped,
}

/// Result of [`SlotGroup::stop`].
pub(crate) enum Stopping {
    /// The group never started; there is nothing to collect.
    NeverStarted,
    /// Every slot reported.
    Collected,
    /// `stop()` already ran.
    AlreadyStopped,
}

pub(crate) struct SlotGroup {
    kind: &'static str,
    name: Arc<str>,
    label: Arc<str>,
    size: usize,
    params: SlotParams,
    pub(crate) bus: Bus,
    pub(crate) observers: Observers,
    done: Queue<SlotExit>,
    run: Mutex<Run>,
}

impl SlotGroup {
    pub(crate) fn new(
        kind: &'static str,
        name: Arc<str>,
        size: usize,
        params: SlotParams,
        bus: Bus,
        observers: Observers,
    ) -> Self {
        Self {
            label: format!("{kind}:{name}").into(),
            kind,
            name,
            size,
            params,
            bus,
            observers,
            done: queue::bounded(size),
            run: Mutex::new(Run::Idle),
        }
    }

    /// Labels the group `kind:task/name`, so same-named stages of different tasks
    /// stay apart in events.
    pub(crate) fn scoped(mut self, task: Option<&str>) -> Self {
        if let Some(task) = task {
            self.label = format!("{}:{task}/{}", self.kind, self.name).into();
        }
        self
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn label(&self) -> &Arc<str> {
        &self.label
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn is_idle(&self) -> bool {
        matches!(*self.lock(), Run::Idle)
    }

    /// Spawns `size` supervised copies of `routine` under a child of `parent`.
    pub(crate) fn start(
        &self,
        routine: RoutineRef,
        parent: &CancellationToken,
    ) -> Result<(), RuntimeError> {
        let mut run = self.lock();
        if !matches!(*run, Run::Idle) {
            return Err(RuntimeError::AlreadyStarted {
                component: self.kind,
                name: self.name.to_string(),
            });
        }

        let token = parent.child_token();
        let handles = (0..self.size)
            .map(|index| {
                let sup = SlotSupervisor::new(
                    Arc::clone(&routine),
                    self.kind,
                    Arc::clone(&self.name),
                    index as u32,
                    self.params,
                    self.bus.clone(),
                    self.observers.clone(),
                )
                .with_label(Arc::clone(&self.label));
                supervise(sup, token.clone(), Some(self.done.sender()))
            })
            .collect();
        *run = Run::Running { token, handles };
        drop(run);

        self.bus
            .publish(Event::new(EventKind::StageStarted).with_stage(Arc::clone(&self.label)));
        Ok(())
    }

    /// Cancels every slot and waits for all of them to report.
    pub(crate) async fn stop(&self) -> Stopping {
        let prev = std::mem::replace(&mut *self.lock(), Run::Stopped);
        let (token, handles) = match prev {
            Run::Idle => {
                self.done.close();
                return Stopping::NeverStarted;
            }
            Run::Stopped => return Stopping::AlreadyStopped,
            Run::Running { token, handles } => (token, handles),
        };

        token.cancel();
        let completions = self.done.receiver();
        let mut exits = Vec::with_capacity(self.size);
        while exits.len() < self.size {
            match completions.recv().await {
                Some(exit) => exits.push(exit),
                None => break,
            }
        }
        for handle in handles {
            let _ = handle.await;
        }
        self.done.close();

        let retired = exits.iter().filter(|e| e.is_retired()).count();
        if retired > 0 {
            self.observers.logger.warn(format_args!(
                "{}: {retired} of {} instances had been retired.",
                self.label, self.size
            ));
        }
        Stopping::Collected
    }

    /// Publishes `StageStopped` and logs the final line of a stage.
    pub(crate) fn finish(&self) {
        self.bus
            .publish(Event::new(EventKind::StageStopped).with_stage(Arc::clone(&self.label)));
        self.observers
            .logger
            .debug(format_args!("{}: {} is done.", self.kind, self.name));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Run> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Sends `item` unless `ctx` is cancelled first.
///
/// Returns `Ok(false)` when cancellation won; the item is then dropped unsent.
pub(crate) async fn send_or_cancel<T>(
    tx: &QueueSender<T>,
    item: T,
    ctx: &CancellationToken,
) -> Result<bool, QueueError> {
    select! {
        biased;
        _ = ctx.cancelled() => Ok(false),
        res = tx.send(item) => res.map(|()| true),
    }
}
