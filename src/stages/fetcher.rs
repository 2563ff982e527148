//! # Fetcher: the source stage.
//!
//! A [`Fetcher`] runs `instance_count` supervised copies of a loop that calls
//! [`FetchCollaborator::action`] and publishes the produced items on one shared
//! rendezvous output queue, read through [`Fetcher::fetch`].
//!
//! ## Architecture
//! ```text
//! interval == 0 (continuous):
//!   producer task ── action() ──► [private rendezvous] ──► instance ──► [output]
//!        └─ Err ─────────────────► [errors(1)] ──────────► instance ──► logger.error
//!
//! interval > 0 (ticking):
//!   instance ── tick ──► action() ──► [output]
//!                             └─ Err ─► [errors(1)] ──► logger.error
//! ```
//!
//! ## Rules
//! - Every `action()` call is timed and reported as `fetcher=<name>, duration=<µs>`
//! - `Ok(None)` from `action()` produces nothing
//! - An `action()` call still in flight when the instance is cancelled is dropped
//! - The producer task lives exactly as long as the attempt that spawned it
//! - `stop()` collects every instance before closing output, errors and completions,
//!   then closes the collaborator

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::select;
use tokio::task::JoinError;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    core::config::Config,
    core::queue::{self, Queue, QueueReceiver, QueueSender},
    core::runner::panic_message,
    core::supervisor::SlotParams,
    error::{RuntimeError, StageError, TaskError},
    events::Bus,
    observers::{Observers, record_duration},
    routines::{BoxRoutineFuture, Routine},
    stages::collaborator::FetchCollaborator,
    stages::slots::{SlotGroup, Stopping, send_or_cancel},
};

const KIND: &str = "fetcher";

/// Source stage driving one [`FetchCollaborator`].
pub struct Fetcher<T: Send + 'static> {
    collaborator: Arc<dyn FetchCollaborator<T>>,
    slots: SlotGroup,
    output: Queue<T>,
    errors: Queue<StageError>,
}

impl<T: Send + 'static> Fetcher<T> {
    /// Starts building a fetcher around `collaborator`.
    pub fn builder(collaborator: Arc<dyn FetchCollaborator<T>>) -> FetcherBuilder<T> {
        FetcherBuilder {
            collaborator,
            config: Config::default(),
            task: None,
            bus: None,
            observers: Observers::default(),
        }
    }

    /// Read handle over the produced items.
    ///
    /// `recv()` yields `None` once the fetcher has been stopped.
    pub fn fetch(&self) -> QueueReceiver<T> {
        self.output.receiver()
    }

    /// Number of instances.
    pub fn size(&self) -> usize {
        self.slots.size()
    }

    /// Stage name.
    pub fn name(&self) -> &str {
        self.slots.name()
    }

    /// Label used in events: `fetcher:name`, or `fetcher:task/name` inside a task.
    pub fn label(&self) -> &str {
        self.slots.label()
    }

    /// Number of sends rejected by this fetcher's closed queues.
    pub fn rejected_sends(&self) -> u64 {
        self.output.rejected_sends() + self.errors.rejected_sends()
    }

    /// Spawns `size()` supervised instances bound to a child of `token`.
    pub fn start(&self, token: &CancellationToken) -> Result<(), RuntimeError> {
        let run = Arc::new(FetchLoop {
            collaborator: Arc::clone(&self.collaborator),
            name: self.slots.name().into(),
            output: self.output.sender(),
            errors: self.errors.sender(),
            error_feed: self.errors.receiver(),
            observers: self.slots.observers.clone(),
        });
        self.slots.start(run, token)
    }

    /// Stops every instance, then closes the queues and the collaborator.
    ///
    /// Returns once all instances have reported. Calling it twice is a no-op.
    pub async fn stop(&self) {
        if matches!(self.slots.stop().await, Stopping::AlreadyStopped) {
            return;
        }
        self.output.close();
        self.errors.close();

        if let Err(e) = self.collaborator.close().await {
            self.slots.observers.logger.error(format_args!(
                "fetcher: {} close failed: {e}",
                self.slots.name()
            ));
        }
        self.slots.finish();
    }
}

/// Builder for [`Fetcher`].
pub struct FetcherBuilder<T: Send + 'static> {
    collaborator: Arc<dyn FetchCollaborator<T>>,
    config: Config,
    task: Option<String>,
    bus: Option<Bus>,
    observers: Observers,
}

impl<T: Send + 'static> FetcherBuilder<T> {
    /// Scopes the fetcher's event label to `task`.
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

    /// Validates the collaborator and allocates the fetcher's queues.
    pub fn build(self) -> Result<Fetcher<T>, RuntimeError> {
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

        Ok(Fetcher {
            collaborator: self.collaborator,
            slots,
            output: queue::rendezvous(),
            errors: queue::bounded(1),
        })
    }
}

struct FetchLoop<T: Send + 'static> {
    collaborator: Arc<dyn FetchCollaborator<T>>,
    name: Arc<str>,
    output: QueueSender<T>,
    errors: QueueSender<StageError>,
    error_feed: QueueReceiver<StageError>,
    observers: Observers,
}

impl<T: Send + 'static> Routine for FetchLoop<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn spawn(&self, ctx: CancellationToken) -> BoxRoutineFuture {
        let this = self.handle();
        Box::pin(async move {
            this.observers
                .logger
                .debug(format_args!("fetcher: {} is running.", this.name));
            let interval = this.collaborator.interval();
            if interval.is_zero() {
                this.run_continuous(ctx).await
            } else {
                this.run_ticking(ctx, interval).await
            }
        })
    }
}

impl<T: Send + 'static> FetchLoop<T> {
    fn handle(&self) -> Arc<Self> {
        Arc::new(Self {
            collaborator: Arc::clone(&self.collaborator),
            name: Arc::clone(&self.name),
            output: self.output.clone(),
            errors: self.errors.clone(),
            error_feed: self.error_feed.clone(),
            observers: self.observers.clone(),
        })
    }

    async fn run_continuous(self: Arc<Self>, ctx: CancellationToken) -> Result<(), TaskError> {
        let produced = queue::rendezvous::<T>();
        let items = produced.receiver();
        let mut producer = tokio::spawn(Arc::clone(&self).produce(produced.sender(), ctx.clone()));

        let res = loop {
            select! {
                biased;
                _ = ctx.cancelled() => break Ok(()),
                Some(err) = self.error_feed.recv() => self.log_error(&err),
                joined = &mut producer => break Err(producer_exit(joined)),
                Some(item) = items.recv() => {
                    if !send_or_cancel(&self.output, item, &ctx).await? {
                        break Ok(());
                    }
                }
            }
        };

        produced.close();
        producer.abort();
        res
    }

    async fn run_ticking(&self, ctx: CancellationToken, every: Duration) -> Result<(), TaskError> {
        let mut tick = time::interval_at(time::Instant::now() + every, every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                biased;
                _ = ctx.cancelled() => return Ok(()),
                Some(err) = self.error_feed.recv() => self.log_error(&err),
                _ = tick.tick() => match self.invoke_or_cancel(&ctx).await {
                    None => return Ok(()),
                    Some(Ok(Some(item))) => {
                        if !send_or_cancel(&self.output, item, &ctx).await? {
                            return Ok(());
                        }
                    }
                    Some(Ok(None)) => {}
                    Some(Err(err)) => self.raise(err),
                },
            }
        }
    }

    /// Calls `action()` back-to-back until the attempt ends.
    async fn produce(self: Arc<Self>, items: QueueSender<T>, ctx: CancellationToken) {
        while !ctx.is_cancelled() {
            let sent = match self.invoke().await {
                Ok(Some(item)) => send_or_cancel(&items, item, &ctx).await,
                Ok(None) => {
                    tokio::task::yield_now().await;
                    Ok(true)
                }
                Err(err) => send_or_cancel(&self.errors, err, &ctx).await,
            };
            if !matches!(sent, Ok(true)) {
                return;
            }
        }
    }

    async fn invoke(&self) -> Result<Option<T>, StageError> {
        let started = Instant::now();
        let res = self.collaborator.action().await;
        record_duration(
            self.observers.metrics.as_ref(),
            self.observers.logger.as_ref(),
            KIND,
            &self.name,
            started.elapsed(),
        );
        res
    }

    async fn invoke_or_cancel(
        &self,
        ctx: &CancellationToken,
    ) -> Option<Result<Option<T>, StageError>> {
        select! {
            biased;
            _ = ctx.cancelled() => None,
            res = self.invoke() => Some(res),
        }
    }

    fn raise(&self, err: StageError) {
        if let Err(err) = self.errors.try_send(err) {
            self.log_error(&err);
        }
    }

    fn log_error(&self, err: &StageError) {
        self.observers
            .logger
            .error(format_args!("fetcher: {} got an error: {err}", self.name));
    }
}

fn producer_exit(joined: Result<(), JoinError>) -> TaskError {
    match joined {
        Err(e) if e.is_panic() => TaskError::Panicked {
            info: panic_message(e.into_panic().as_ref()),
        },
        _ => TaskError::fail("producer task ended unexpectedly"),
    }
}
