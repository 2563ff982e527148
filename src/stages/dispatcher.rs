//! # Dispatcher: fan-in from fetchers, fan-out to workers.
//!
//! A [`Dispatcher`] owns the fetchers and worker chains of one task. It merges every
//! fetcher's output into one queue and delivers each merged item to **every** worker,
//! in registration order.
//!
//! ## Architecture
//! ```text
//! Fetcher 1 ──► merge task ─┐
//! Fetcher 2 ──► merge task ─┼──► [merged] ──► dispatch 0..size ──► Worker 1.work()
//! Fetcher N ──► merge task ─┘                      │           ──► Worker 2.work()
//!                                                  └─► metrics: dispatcher=<name>
//! ```
//!
//! ## Rules
//! - `size()` is the sum of fetcher instance counts, and also the number of dispatch
//!   instances
//! - Delivery is a blocking broadcast: one slow worker holds back the dispatcher, which
//!   holds back the fetchers
//! - `stop()` order: fetchers, merge tasks, dispatch instances, own queues, workers.
//!   No queue is closed while something that writes to it is still running.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tokio::select;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    core::config::Config,
    core::queue::{self, Queue, QueueReceiver, QueueSender},
    core::supervisor::SlotParams,
    error::{RuntimeError, StageError, TaskError},
    events::Bus,
    observers::{Observers, record_duration},
    routines::{BoxRoutineFuture, Routine},
    stages::fetcher::Fetcher,
    stages::slots::{SlotGroup, Stopping, send_or_cancel},
    stages::worker::Worker,
};

const KIND: &str = "dispatcher";

type Running = (CancellationToken, Vec<JoinHandle<()>>);

/// Routing stage of one task.
pub struct Dispatcher<T: Clone + Send + 'static> {
    fetchers: Vec<Fetcher<T>>,
    workers: Vec<Worker<T>>,
    slots: SlotGroup,
    merged: Queue<T>,
    errors: Queue<StageError>,
    run: Mutex<Option<Running>>,
}

impl<T: Clone + Send + 'static> Dispatcher<T> {
    /// Starts building a dispatcher named `name` (usually the task name).
    pub fn builder(name: impl Into<String>) -> DispatcherBuilder<T> {
        DispatcherBuilder {
            name: name.into(),
            fetchers: Vec::new(),
            workers: Vec::new(),
            config: Config::default(),
            bus: None,
            observers: Observers::default(),
        }
    }

    /// Sum of the fetchers' instance counts.
    pub fn size(&self) -> usize {
        self.slots.size()
    }

    /// Dispatcher name.
    pub fn name(&self) -> &str {
        self.slots.name()
    }

    /// Owned fetchers, in registration order.
    pub fn fetchers(&self) -> &[Fetcher<T>] {
        &self.fetchers
    }

    /// Owned worker chain heads, in registration order.
    pub fn workers(&self) -> &[Worker<T>] {
        &self.workers
    }

    /// Event labels of every stage this dispatcher owns, itself included.
    pub fn stage_labels(&self) -> Vec<String> {
        let fetchers = self.fetchers.iter().map(|f| f.label().to_string());
        let workers = self
            .workers
            .iter()
            .flat_map(|w| std::iter::successors(Some(w), |w| w.next()))
            .map(|w| w.label().to_string());
        std::iter::once(self.slots.label().to_string())
            .chain(fetchers)
            .chain(workers)
            .collect()
    }

    /// Rejected sends across the dispatcher and every stage it owns.
    pub fn rejected_sends(&self) -> u64 {
        let own = self.merged.rejected_sends() + self.errors.rejected_sends();
        let fetchers: u64 = self.fetchers.iter().map(Fetcher::rejected_sends).sum();
        let workers: u64 = self
            .workers
            .iter()
            .flat_map(|w| std::iter::successors(Some(w), |w| w.next()))
            .map(Worker::rejected_sends)
            .sum();
        own + fetchers + workers
    }

    /// Starts every fetcher and worker, the merge tasks, then `size()` dispatch instances.
    pub fn start(&self, token: &CancellationToken) -> Result<(), RuntimeError> {
        if !self.slots.is_idle() {
            return Err(RuntimeError::AlreadyStarted {
                component: KIND,
                name: self.slots.name().to_string(),
            });
        }
        let token = token.child_token();

        for fetcher in &self.fetchers {
            fetcher.start(&token)?;
        }
        for worker in &self.workers {
            worker.start(&token)?;
        }

        let merges = self
            .fetchers
            .iter()
            .map(|f| tokio::spawn(merge(f.fetch(), self.merged.sender(), token.clone())))
            .collect();

        let run = Arc::new(DispatchLoop {
            name: self.slots.name().into(),
            merged: self.merged.receiver(),
            errors: self.errors.sender(),
            error_feed: self.errors.receiver(),
            inputs: self
                .workers
                .iter()
                .map(|w| (Arc::<str>::from(w.name()), w.work()))
                .collect(),
            observers: self.slots.observers.clone(),
        });
        self.slots.start(run, &token)?;
        *self.lock() = Some((token, merges));
        Ok(())
    }

    /// Stops the whole task in dependency order.
    pub async fn stop(&self) {
        let started = self.lock().take();
        if let Some((token, _)) = &started {
            token.cancel();
        }

        for fetcher in &self.fetchers {
            fetcher.stop().await;
        }
        if let Some((_, merges)) = started {
            for merge in merges {
                let _ = merge.await;
            }
        }

        if matches!(self.slots.stop().await, Stopping::AlreadyStopped) {
            return;
        }
        self.merged.close();
        self.errors.close();
        self.slots.finish();

        for worker in &self.workers {
            worker.stop().await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Running>> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Builder for [`Dispatcher`].
pub struct DispatcherBuilder<T: Clone + Send + 'static> {
    name: String,
    fetchers: Vec<Fetcher<T>>,
    workers: Vec<Worker<T>>,
    config: Config,
    bus: Option<Bus>,
    observers: Observers,
}

impl<T: Clone + Send + 'static> DispatcherBuilder<T> {
    /// Adds a fetcher whose output is merged into this dispatcher.
    pub fn with_fetcher(mut self, fetcher: Fetcher<T>) -> Self {
        self.fetchers.push(fetcher);
        self
    }

    /// Adds a worker (chain head) that receives every merged item.
    pub fn with_worker(mut self, worker: Worker<T>) -> Self {
        self.workers.push(worker);
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

    /// Validates the topology and allocates the dispatcher's queues.
    pub fn build(self) -> Result<Dispatcher<T>, RuntimeError> {
        self.config.validate()?;
        if self.name.is_empty() {
            return Err(RuntimeError::EmptyName { component: KIND });
        }
        let size: usize = self.fetchers.iter().map(Fetcher::size).sum();
        if size == 0 {
            return Err(RuntimeError::InvalidConfig {
                component: KIND,
                reason: format!("{}: needs at least one fetcher", self.name),
            });
        }

        let bus = self
            .bus
            .unwrap_or_else(|| Bus::new(self.config.bus_capacity_clamped()));
        let params = SlotParams {
            restart: self.config.restart,
            backoff: self.config.backoff,
        };
        let slots = SlotGroup::new(KIND, self.name.into(), size, params, bus, self.observers);

        Ok(Dispatcher {
            fetchers: self.fetchers,
            workers: self.workers,
            slots,
            merged: queue::rendezvous(),
            errors: queue::bounded(1),
            run: Mutex::new(None),
        })
    }
}

/// Forwards one fetcher's output into the merged queue until either side is done.
async fn merge<T>(from: QueueReceiver<T>, into: QueueSender<T>, ctx: CancellationToken) {
    loop {
        let item = select! {
            biased;
            _ = ctx.cancelled() => return,
            item = from.recv() => item,
        };
        let Some(item) = item else { return };
        if !matches!(send_or_cancel(&into, item, &ctx).await, Ok(true)) {
            return;
        }
    }
}

struct DispatchLoop<T: Clone + Send + 'static> {
    name: Arc<str>,
    merged: QueueReceiver<T>,
    errors: QueueSender<StageError>,
    error_feed: QueueReceiver<StageError>,
    inputs: Vec<(Arc<str>, QueueSender<T>)>,
    observers: Observers,
}

impl<T: Clone + Send + 'static> Routine for DispatchLoop<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn spawn(&self, ctx: CancellationToken) -> BoxRoutineFuture {
        let this = DispatchLoop {
            name: Arc::clone(&self.name),
            merged: self.merged.clone(),
            errors: self.errors.clone(),
            error_feed: self.error_feed.clone(),
            inputs: self.inputs.clone(),
            observers: self.observers.clone(),
        };
        Box::pin(async move { this.run(ctx).await })
    }
}

impl<T: Clone + Send + 'static> DispatchLoop<T> {
    async fn run(&self, ctx: CancellationToken) -> Result<(), TaskError> {
        self.observers
            .logger
            .debug(format_args!("dispatcher: {} is running.", self.name));

        loop {
            select! {
                biased;
                _ = ctx.cancelled() => return Ok(()),
                Some(err) = self.error_feed.recv() => self.log_error(&err),
                Some(item) = self.merged.recv() => {
                    let started = Instant::now();
                    let delivered = self.broadcast(item, &ctx).await;
                    record_duration(
                        self.observers.metrics.as_ref(),
                        self.observers.logger.as_ref(),
                        KIND,
                        &self.name,
                        started.elapsed(),
                    );
                    if !delivered {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Pushes `item` to every worker in order. Returns `false` if cancellation won.
    async fn broadcast(&self, item: T, ctx: &CancellationToken) -> bool {
        let Some(((last_name, last), rest)) = self.inputs.split_last() else {
            return true;
        };
        for (name, input) in rest {
            if !self.deliver(name, input, item.clone(), ctx).await {
                return false;
            }
        }
        self.deliver(last_name, last, item, ctx).await
    }

    async fn deliver(
        &self,
        worker: &str,
        input: &QueueSender<T>,
        item: T,
        ctx: &CancellationToken,
    ) -> bool {
        match send_or_cancel(input, item, ctx).await {
            Ok(sent) => sent,
            Err(e) => {
                self.raise(StageError::new(format!("worker {worker}: {e}")));
                true
            }
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
            .error(format_args!("dispatcher: {} got an error: {err}", self.name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use crate::observers::{DURATION_FIELD, InMemoryMetrics, TracingLogger};
    use crate::stages::collaborator::{FetchCollaborator, Handled, WorkCollaborator};

    struct HelloWorld;

    #[async_trait]
    impl FetchCollaborator<String> for HelloWorld {
        fn name(&self) -> &str {
            "hello"
        }

        fn instance_count(&self) -> usize {
            2
        }

        async fn action(&self) -> Result<Option<String>, StageError> {
            Ok(Some("hello world".to_string()))
        }
    }

    /// Forwards everything it handles to a test channel.
    struct Sink {
        name: &'static str,
        seen: mpsc::UnboundedSender<String>,
        handled: AtomicUsize,
    }

    #[async_trait]
    impl WorkCollaborator<String> for Sink {
        fn name(&self) -> &str {
            self.name
        }

        fn instance_count(&self) -> usize {
            1
        }

        async fn handle_data(&self, item: String) -> Handled<String> {
            self.handled.fetch_add(1, Ordering::SeqCst);
            let _ = self.seen.send(item);
            Handled::empty()
        }
    }

    fn sink(name: &'static str) -> (Arc<Sink>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Arc::new(Sink {
            name,
            seen: tx,
            handled: AtomicUsize::new(0),
        });
        (sink, rx)
    }

    #[tokio::test]
    async fn hello_world_reaches_every_worker() {
        let metrics = Arc::new(InMemoryMetrics::new());
        let observers = Observers::new(Arc::new(TracingLogger), metrics.clone());
        let (first, mut first_rx) = sink("first");
        let (second, mut second_rx) = sink("second");

        let fetcher = Fetcher::builder(Arc::new(HelloWorld) as Arc<dyn FetchCollaborator<String>>)
            .with_observers(observers.clone())
            .build()
            .unwrap();
        let dispatcher = Dispatcher::builder("greetings")
            .with_fetcher(fetcher)
            .with_worker(
                Worker::builder(first.clone() as Arc<dyn WorkCollaborator<String>>)
                    .build()
                    .unwrap(),
            )
            .with_worker(
                Worker::builder(second.clone() as Arc<dyn WorkCollaborator<String>>)
                    .build()
                    .unwrap(),
            )
            .with_observers(observers)
            .build()
            .unwrap();
        assert_eq!(dispatcher.size(), 2);

        dispatcher.start(&CancellationToken::new()).unwrap();
        let a = timeout(Duration::from_secs(1), first_rx.recv()).await;
        let b = timeout(Duration::from_secs(1), second_rx.recv()).await;
        assert_eq!(a.ok().flatten().as_deref(), Some("hello world"));
        assert_eq!(b.ok().flatten().as_deref(), Some("hello world"));

        timeout(Duration::from_secs(2), dispatcher.stop()).await.unwrap();
        assert_eq!(dispatcher.rejected_sends(), 0);
        assert!(metrics.count(KIND, "greetings", DURATION_FIELD) >= 1);
        assert!(dispatcher.fetchers()[0].fetch().recv().await.is_none());
        assert!(dispatcher.workers()[0].work().is_closed());
    }

    #[tokio::test]
    async fn slow_worker_backpressures_fetchers() {
        struct Stalled;

        #[async_trait]
        impl WorkCollaborator<String> for Stalled {
            fn name(&self) -> &str {
                "stalled"
            }

            fn instance_count(&self) -> usize {
                1
            }

            async fn handle_data(&self, _item: String) -> Handled<String> {
                std::future::pending::<()>().await;
                Handled::empty()
            }
        }

        struct Counting(AtomicUsize);

        #[async_trait]
        impl FetchCollaborator<String> for Counting {
            fn name(&self) -> &str {
                "counting"
            }

            fn instance_count(&self) -> usize {
                1
            }

            async fn action(&self) -> Result<Option<String>, StageError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(Some("item".to_string()))
            }
        }

        let counting = Arc::new(Counting(AtomicUsize::new(0)));
        let dispatcher = Dispatcher::builder("stuck")
            .with_fetcher(
                Fetcher::builder(counting.clone() as Arc<dyn FetchCollaborator<String>>)
                    .build()
                    .unwrap(),
            )
            .with_worker(
                Worker::builder(Arc::new(Stalled) as Arc<dyn WorkCollaborator<String>>)
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();

        dispatcher.start(&CancellationToken::new()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        // one item held by the worker, one per blocked hop (dispatch, merge, fetcher, producer)
        assert!(counting.0.load(Ordering::SeqCst) <= 6);

        timeout(Duration::from_secs(2), dispatcher.stop()).await.unwrap();
        assert_eq!(dispatcher.rejected_sends(), 0);
    }

    /// Hands out 0, 1, 2, ... across all of its instances.
    #[derive(Default)]
    struct Sequence(AtomicU64);

    #[async_trait]
    impl FetchCollaborator<u64> for Sequence {
        fn name(&self) -> &str {
            "sequence"
        }

        fn instance_count(&self) -> usize {
            3
        }

        async fn action(&self) -> Result<Option<u64>, StageError> {
            Ok(Some(self.0.fetch_add(1, Ordering::SeqCst)))
        }
    }

    struct Record {
        name: &'static str,
        seen: std::sync::Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl WorkCollaborator<u64> for Record {
        fn name(&self) -> &str {
            self.name
        }

        fn instance_count(&self) -> usize {
            2
        }

        async fn handle_data(&self, item: u64) -> Handled<u64> {
            self.seen
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(item);
            Handled::empty()
        }
    }

    fn distinct(record: &Record) -> HashSet<u64> {
        let seen = record.seen.lock().unwrap_or_else(PoisonError::into_inner);
        let set: HashSet<u64> = seen.iter().copied().collect();
        assert_eq!(set.len(), seen.len(), "{} got a duplicate", record.name);
        set
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn every_item_reaches_each_worker_once() {
        let records = ["w1", "w2"].map(|name| {
            Arc::new(Record {
                name,
                seen: std::sync::Mutex::new(Vec::new()),
            })
        });
        let mut builder = Dispatcher::builder("orders").with_fetcher(
            Fetcher::builder(Arc::new(Sequence::default()) as Arc<dyn FetchCollaborator<u64>>)
                .with_task("orders")
                .build()
                .unwrap(),
        );
        for record in &records {
            builder = builder.with_worker(
                Worker::builder(Arc::clone(record) as Arc<dyn WorkCollaborator<u64>>)
                    .with_task("orders")
                    .build()
                    .unwrap(),
            );
        }
        let dispatcher = builder.build().unwrap();
        assert_eq!(dispatcher.size(), 3);
        assert_eq!(
            dispatcher.stage_labels(),
            vec!["dispatcher:orders", "fetcher:orders/sequence", "worker:orders/w1", "worker:orders/w2"]
        );

        dispatcher.start(&CancellationToken::new()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        timeout(Duration::from_secs(2), dispatcher.stop()).await.unwrap();

        let [w1, w2] = records.each_ref().map(|r| distinct(r));
        assert!(!w1.is_empty() && !w2.is_empty());
        // items caught mid-broadcast or mid-handle at stop: one per dispatch and worker instance
        let in_flight = dispatcher.size() + 2 * 2;
        assert!(
            w1.symmetric_difference(&w2).count() <= in_flight,
            "w1={} w2={}",
            w1.len(),
            w2.len()
        );
        assert_eq!(dispatcher.rejected_sends(), 0);
    }

    #[test]
    fn build_requires_a_fetcher() {
        let err = Dispatcher::<String>::builder("empty").build().err();
        assert_eq!(err.map(|e| e.as_label()), Some("runtime_invalid_config"));
        let err = Dispatcher::<String>::builder("").build().err();
        assert_eq!(err, Some(RuntimeError::EmptyName { component: KIND }));
    }
}
