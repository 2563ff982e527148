//! # Worker: the processing stage.
//!
//! A [`Worker`] runs `instance_count` supervised copies of a loop that takes items from
//! its input queue, hands them to [`WorkCollaborator::handle_data`], and forwards the
//! produced item to the next worker when one is chained.
//!
//! ## Architecture
//! ```text
//! work() ──► [input] ──► instance 0..N ── handle_data() ──► next.work()
//!                              │                 └─ error ─► [errors(1)] ──► logger.error
//!                              └─► metrics: worker=<name>, duration=<µs>
//! ```
//!
//! ## Rules
//! - Instances compete for input items; there is no ordering across instances
//! - An error from `handle_data` never suppresses forwarding of its item
//! - A `handle_data` call still in flight when the instance is cancelled is dropped
//! - `start()` and `stop()` cascade down the chain; `stop()` finishes this worker's
//!   teardown before stopping the next one

use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use tokio::select;
use tokio_util::sync::CancellationToken;

use crate::{
    core::config::Config,
    core::queue::{self, Queue, QueueReceiver, QueueSender},
    core::supervisor::SlotParams,
    error::{RuntimeError, StageError, TaskError},
    events::Bus,
    observers::{Observers, record_duration},
    routines::{BoxRoutineFuture, Routine},
    stages::collaborator::{Handled, WorkCollaborator},
    stages::slots::{SlotGroup, Stopping, send_or_cancel},
};

const KIND: &str = "worker";

/// Processing stage driving one [`WorkCollaborator`].
pub struct Worker<T: Send + 'static> {
    collaborator: Arc<dyn WorkCollaborator<T>>,
    slots: SlotGroup,
    input: Queue<T>,
    errors: Queue<StageError>,
    next: Option<Box<Worker<T>>>,
}

impl<T: Send + 'static> Worker<T> {
    /// Starts building a worker around `collaborator`.
    pub fn builder(collaborator: Arc<dyn WorkCollaborator<T>>) -> WorkerBuilder<T> {
        WorkerBuilder {
            collaborator,
            config: Config::default(),
            task: None,
            bus: None,
            observers: Observers::default(),
        }
    }

    /// Write handle to the input queue.
    pub fn work(&self) -> QueueSender<T> {
        self.input.sender()
    }

    /// Number of instances.
    pub fn size(&self) -> usize {
        self.slots.size()
    }

    /// Stage name.
    pub fn name(&self) -> &str {
        self.slots.name()
    }

    /// Label used in events: `worker:name`, or `worker:task/name` inside a task.
    pub fn label(&self) -> &str {
        self.slots.label()
    }

    /// The chained downstream worker.
    pub fn next(&self) -> Option<&Worker<T>> {
        self.next.as_deref()
    }

    /// Number of sends rejected by this worker's closed queues (not counting the chain).
    pub fn rejected_sends(&self) -> u64 {
        self.input.rejected_sends() + self.errors.rejected_sends()
    }

    /// Chains `next` after this worker; it is owned, started and stopped by this one.
    ///
    /// Only allowed before [`start`](Self::start).
    pub fn set_next(&mut self, next: Worker<T>) -> Result<(), RuntimeError> {
        if !self.slots.is_idle() {
            return Err(RuntimeError::AlreadyStarted {
                component: KIND,
                name: self.slots.name().to_string(),
            });
        }
        self.next = Some(Box::new(next));
        Ok(())
    }

    /// Starts the chain below this worker, then this worker's instances.
    pub fn start(&self, token: &CancellationToken) -> Result<(), RuntimeError> {
        if let Some(next) = &self.next {
            next.start(token)?;
        }
        let run = Arc::new(WorkLoop {
            collaborator: Arc::clone(&self.collaborator),
            name: self.slots.name().into(),
            input: self.input.receiver(),
            errors: self.errors.sender(),
            error_feed: self.errors.receiver(),
            next: self.next.as_ref().map(|n| n.work()),
            observers: self.slots.observers.clone(),
        });
        self.slots.start(run, token)
    }

    /// Stops this worker's instances, closes its queues and collaborator, then stops
    /// the next worker.
    pub fn stop(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if matches!(self.slots.stop().await, Stopping::AlreadyStopped) {
                return;
            }
            self.input.close();
            self.errors.close();

            if let Err(e) = self.collaborator.close().await {
                self.slots.observers.logger.error(format_args!(
                    "worker: {} close failed: {e}",
                    self.slots.name()
                ));
            }
            self.slots.finish();

            if let Some(next) = &self.next {
                next.stop().await;
            }
        })
    }
}

/// Builder for [`Worker`].
pub struct WorkerBuilder<T: Send + 'static> {
    collaborator: Arc<dyn WorkCollaborator<T>>,
    config: Config,
    task: Option<String>,
    bus: Option<Bus>,
    observers: Observers,
}

impl<T: Send + 'static> WorkerBuilder<T> {
    /// Scopes the worker's event label to `task`.
    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }

    /// Uses the restart and backoff settings of `config`.
    pub fn with_config(mut self, config: &Config) -> Self {
        self.config = config.clone();
        self
    }

    /// Publishes runtime events on `bus` instead of a private one.
    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Reports through `observers`.
    pub fn with_observers(mut self, observers: Observers) -> Self {
        self.observers = observers;
        self
    }

    /// Validates the collaborator and allocates the worker's queues.
    ///
    /// The collaborator's `next()` is not followed here; see
    /// [`WorkChain`](crate::WorkChain) for that.
    pub fn build(self) -> Result<Worker<T>, RuntimeError> {
        self.config.validate()?;
        let name = self.collaborator.name();
        if name.is_empty() {
            return Err(RuntimeError::EmptyName { component: KIND });
        }
        let size = self.collaborator.instance_count();
        if size == 0 {
            return Err(RuntimeError::InvalidConfig {
                component: KIND,
                reason: format!("{name}: instance count must be at least 1"),
            });
        }

        let bus = self
            .bus
            .unwrap_or_else(|| Bus::new(self.config.bus_capacity_clamped()));
        let params = SlotParams {
            restart: self.config.restart,
            backoff: self.config.backoff,
        };
        let slots = SlotGroup::new(KIND, name.into(), size, params, bus, self.observers)
            .scoped(self.task.as_deref());

        Ok(Worker {
            collaborator: self.collaborator,
            slots,
            input: queue::rendezvous(),
            errors: queue::bounded(1),
            next: None,
        })
    }
}

struct WorkLoop<T: Send + 'static> {
    collaborator: Arc<dyn WorkCollaborator<T>>,
    name: Arc<str>,
    input: QueueReceiver<T>,
    errors: QueueSender<StageError>,
    error_feed: QueueReceiver<StageError>,
    next: Option<QueueSender<T>>,
    observers: Observers,
}

impl<T: Send + 'static> Routine for WorkLoop<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn spawn(&self, ctx: CancellationToken) -> BoxRoutineFuture {
        let this = WorkLoop {
            collaborator: Arc::clone(&self.collaborator),
            name: Arc::clone(&self.name),
            input: self.input.clone(),
            errors: self.errors.clone(),
            error_feed: self.error_feed.clone(),
            next: self.next.clone(),
            observers: self.observers.clone(),
        };
        Box::pin(async move { this.run(ctx).await })
    }
}

impl<T: Send + 'static> WorkLoop<T> {
    async fn run(&self, ctx: CancellationToken) -> Result<(), TaskError> {
        self.observers
            .logger
            .debug(format_args!("worker: {} is running.", self.name));

        loop {
            select! {
                biased;
                _ = ctx.cancelled() => return Ok(()),
                Some(err) = self.error_feed.recv() => self.log_error(&err),
                Some(item) = self.input.recv() => {
                    if !self.handle(item, &ctx).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Handles one item. Returns `Ok(false)` if cancellation interrupted forwarding.
    async fn handle(&self, item: T, ctx: &CancellationToken) -> Result<bool, TaskError> {
        let started = Instant::now();
        let Handled { item, error } = select! {
            biased;
            _ = ctx.cancelled() => return Ok(false),
            handled = self.collaborator.handle_data(item) => handled,
        };
        if let Some(err) = error {
            self.raise(err);
        }

        let forwarded = match (item, &self.next) {
            (Some(item), Some(next)) => send_or_cancel(next, item, ctx).await?,
            _ => true,
        };
        record_duration(
            self.observers.metrics.as_ref(),
            self.observers.logger.as_ref(),
            KIND,
            &self.name,
            started.elapsed(),
        );
        Ok(forwarded)
    }

    fn raise(&self, err: StageError) {
        if let Err(err) = self.errors.try_send(err) {
            self.log_error(&err);
        }
    }

    fn log_error(&self, err: &StageError) {
        self.observers
            .logger
            .error(format_args!("worker: {} got an error: {err}", self.name));
    }
}
