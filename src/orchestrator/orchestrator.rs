//! # Orchestrator: named tasks, one dispatcher each, bounded shutdown.
//!
//! The [`Orchestrator`] keeps a registry of named tasks. A task is one fetch
//! collaborator plus the head of a worker chain. Running the orchestrator builds a
//! [`Dispatcher`] per task, starts them all, then waits for a termination request.
//!
//! ## Architecture
//! ```text
//! add(name, fetch, work) ──► registry (ordered, unique names) + live task count
//!
//! run_until(signal, callback):
//!   bus listener: Bus ──► LiveSlots::update ──► SubscriberSet::emit
//!   per task:     Fetcher + WorkChain::from_head(work).build() ──► Dispatcher::start(token)
//!                 (stage labels are scoped: `fetcher:task/name`, `worker:task/name`)
//!                 actor: [stop].recv() ──► dispatcher.stop() ──► [done].send(name)
//!   signal ──► callback()
//!          ──► publish ShutdownRequested, token.cancel()
//!          ──► one stop request per task
//!          ──► collect done within cfg.grace
//!                 ├─ all done  ──► AllStoppedWithin
//!                 └─ timed out ──► GraceExceeded + warn (stuck tasks and stages)
//! ```
//!
//! ## Rules
//! - Task names are unique and non-empty; registration closes once running
//! - Exceeding the grace period is reported in [`ShutdownReport`], never as an error
//! - Every stage reports to the same bus, logger and metrics sink
//! - Stages of different tasks never share a label, even with equal collaborator names

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::future::Future;
use std::time::Duration;

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    core::config::Config,
    core::live::LiveSlots,
    core::queue,
    core::shutdown::wait_for_shutdown_signal,
    error::RuntimeError,
    events::{Bus, Event, EventKind},
    observers::Observers,
    stages::{Dispatcher, FetchCollaborator, Fetcher, WorkChain, WorkCollaborator},
    subscribers::{Subscribe, SubscriberSet},
};

use super::builder::OrchestratorBuilder;

struct TaskEntry<T: Send + 'static> {
    name: String,
    fetch: Arc<dyn FetchCollaborator<T>>,
    work: Arc<dyn WorkCollaborator<T>>,
}

/// Outcome of a shutdown.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Tasks whose dispatcher stopped within the grace period, in completion order.
    pub stopped: Vec<String>,
    /// Tasks still stopping when the grace period ran out.
    pub stuck_tasks: Vec<String>,
    /// Stage labels that still had live slots when the grace period ran out.
    pub stuck_stages: Vec<String>,
    /// Sends rejected by closed queues across every task; zero in a correct shutdown.
    pub rejected_sends: u64,
    /// How long shutdown took.
    pub elapsed: Duration,
}

impl ShutdownReport {
    /// True when every task stopped in time and no send hit a closed queue.
    pub fn is_clean(&self) -> bool {
        self.stuck_tasks.is_empty() && self.rejected_sends == 0
    }
}

/// Registry of named pipeline tasks with coordinated startup and shutdown.
pub struct Orchestrator<T: Clone + Send + 'static> {
    cfg: Config,
    bus: Bus,
    observers: Observers,
    subscribers: Mutex<Vec<Arc<dyn Subscribe>>>,
    live: Arc<LiveSlots>,
    tasks: Mutex<Vec<TaskEntry<T>>>,
    live_tasks: Arc<AtomicUsize>,
    token: CancellationToken,
    running: AtomicBool,
}

impl<T: Clone + Send + 'static> Orchestrator<T> {
    /// Shorthand for [`OrchestratorBuilder::new`].
    pub fn builder(cfg: Config) -> OrchestratorBuilder<T> {
        OrchestratorBuilder::new(cfg)
    }

    pub(super) fn new_internal(
        cfg: Config,
        bus: Bus,
        observers: Observers,
        subscribers: Vec<Arc<dyn Subscribe>>,
    ) -> Self {
        Self {
            cfg,
            bus,
            observers,
            subscribers: Mutex::new(subscribers),
            live: Arc::new(LiveSlots::new()),
            tasks: Mutex::new(Vec::new()),
            live_tasks: Arc::new(AtomicUsize::new(0)),
            token: CancellationToken::new(),
            running: AtomicBool::new(false),
        }
    }

    /// Registers a task: one fetch collaborator feeding the chain that starts at `work`.
    pub fn add(
        &self,
        name: impl Into<String>,
        fetch: Arc<dyn FetchCollaborator<T>>,
        work: Arc<dyn WorkCollaborator<T>>,
    ) -> Result<(), RuntimeError> {
        let name = name.into();
        if name.is_empty() {
            return Err(RuntimeError::EmptyName { component: "task" });
        }
        if self.running.load(Ordering::Acquire) {
            return Err(RuntimeError::AlreadyStarted {
                component: "orchestrator",
                name,
            });
        }

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if tasks.iter().any(|t| t.name == name) {
            return Err(RuntimeError::DuplicateTask { name });
        }
        self.bus
            .publish(Event::new(EventKind::TaskRegistered).with_stage(name.as_str()));
        tasks.push(TaskEntry { name, fetch, work });
        self.live_tasks.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Number of registered tasks whose dispatcher has not finished stopping.
    pub fn live_tasks(&self) -> usize {
        self.live_tasks.load(Ordering::Acquire)
    }

    /// Event bus shared by every stage.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Live slot tracker fed from the bus while the orchestrator runs.
    pub fn live_slots(&self) -> Arc<LiveSlots> {
        Arc::clone(&self.live)
    }

    /// Runs every task until the process receives a termination signal.
    ///
    /// `callback` runs first thing after the signal, before any stage is stopped.
    pub async fn start<F>(&self, callback: F) -> Result<ShutdownReport, RuntimeError>
    where
        F: FnOnce(),
    {
        let logger = Arc::clone(&self.observers.logger);
        let signal = async move {
            if let Err(e) = wait_for_shutdown_signal().await {
                logger.error(format_args!(
                    "orchestrator: cannot listen for signals ({e}), shutting down"
                ));
            }
        };
        self.run_until(signal, callback).await
    }

    /// Runs every task until `signal` resolves, then shuts down.
    ///
    /// Fails only on registration/topology errors, before anything is started.
    pub async fn run_until<S, F>(&self, signal: S, callback: F) -> Result<ShutdownReport, RuntimeError>
    where
        S: Future<Output = ()>,
        F: FnOnce(),
    {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(RuntimeError::AlreadyStarted {
                component: "orchestrator",
                name: "orchestrator".into(),
            });
        }

        let dispatchers = self.build_dispatchers()?;
        let listener_token = CancellationToken::new();
        let listener = self.spawn_listener(listener_token.clone());

        let count = dispatchers.len();
        let stop = queue::bounded::<()>(count);
        let done = queue::bounded::<String>(count);
        for dispatcher in &dispatchers {
            if let Err(e) = dispatcher.start(&self.token) {
                self.token.cancel();
                for started in &dispatchers {
                    started.stop().await;
                }
                listener_token.cancel();
                return Err(e);
            }
        }
        for dispatcher in &dispatchers {
            let dispatcher = Arc::clone(dispatcher);
            let stop = stop.receiver();
            let done = done.sender();
            let live_tasks = Arc::clone(&self.live_tasks);
            tokio::spawn(async move {
                if stop.recv().await.is_some() {
                    dispatcher.stop().await;
                    live_tasks.fetch_sub(1, Ordering::AcqRel);
                    let _ = done.send(dispatcher.name().to_string()).await;
                }
            });
        }
        self.observers
            .logger
            .info(format_args!("orchestrator: {count} tasks are running."));

        signal.await;
        callback();
        let report = self.shutdown(&dispatchers, &stop, &done).await;

        listener_token.cancel();
        if let Ok(set) = listener.await {
            set.shutdown().await;
        }
        Ok(report)
    }

    fn build_dispatchers(&self) -> Result<Vec<Arc<Dispatcher<T>>>, RuntimeError> {
        let tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks
            .iter()
            .map(|task| {
                let fetcher = Fetcher::builder(Arc::clone(&task.fetch))
                    .with_task(task.name.as_str())
                    .with_config(&self.cfg)
                    .with_bus(self.bus.clone())
                    .with_observers(self.observers.clone())
                    .build()?;
                let head = WorkChain::from_head(Arc::clone(&task.work))?
                    .with_task(task.name.as_str())
                    .build(&self.cfg, &self.bus, &self.observers)?;
                let dispatcher = Dispatcher::builder(task.name.clone())
                    .with_fetcher(fetcher)
                    .with_worker(head)
                    .with_config(&self.cfg)
                    .with_bus(self.bus.clone())
                    .with_observers(self.observers.clone())
                    .build()?;
                Ok(Arc::new(dispatcher))
            })
            .collect()
    }

    /// Forwards bus events to the live tracker and subscribers until cancelled,
    /// then drains what is already queued.
    fn spawn_listener(&self, token: CancellationToken) -> JoinHandle<SubscriberSet> {
        let subs = std::mem::take(
            &mut *self
                .subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        let set = SubscriberSet::new(subs, self.bus.clone());
        let live = Arc::clone(&self.live);
        let mut rx = self.bus.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    ev = rx.recv() => match ev {
                        Ok(ev) => {
                            live.update(&ev).await;
                            set.emit(&ev);
                        }
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => return set,
                    },
                }
            }
            loop {
                match rx.try_recv() {
                    Ok(ev) => {
                        live.update(&ev).await;
                        set.emit(&ev);
                    }
                    Err(TryRecvError::Lagged(_)) => continue,
                    Err(_) => return set,
                }
            }
        })
    }

    async fn shutdown(
        &self,
        dispatchers: &[Arc<Dispatcher<T>>],
        stop: &queue::Queue<()>,
        done: &queue::Queue<String>,
    ) -> ShutdownReport {
        let started = tokio::time::Instant::now();
        let count = dispatchers.len();
        self.bus.publish(Event::new(EventKind::ShutdownRequested));
        self.observers
            .logger
            .info(format_args!("orchestrator: stopping {count} tasks."));
        self.token.cancel();

        let requests = stop.sender();
        for _ in 0..count {
            let _ = requests.try_send(());
        }

        let completions = done.receiver();
        let mut stopped = Vec::with_capacity(count);
        let within = tokio::time::timeout(self.cfg.grace, async {
            while stopped.len() < count {
                match completions.recv().await {
                    Some(name) => stopped.push(name),
                    None => break,
                }
            }
        })
        .await
        .is_ok();

        let mut report = ShutdownReport {
            rejected_sends: dispatchers.iter().map(|d| d.rejected_sends()).sum(),
            ..ShutdownReport::default()
        };
        if within {
            self.bus.publish(Event::new(EventKind::AllStoppedWithin));
        } else {
            report.stuck_tasks = dispatchers
                .iter()
                .map(|d| d.name().to_string())
                .filter(|name| !stopped.contains(name))
                .collect();
            report.stuck_stages = self.live.snapshot().await;
            self.bus.publish(
                Event::new(EventKind::GraceExceeded).with_reason(report.stuck_tasks.join(",")),
            );
            self.observers.logger.warn(format_args!(
                "orchestrator: stop timeout after {:?}, stuck tasks: {:?}",
                self.cfg.grace, report.stuck_tasks
            ));
        }
        report.stopped = stopped;
        report.elapsed = started.elapsed();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use crate::error::StageError;
    use crate::observers::{InMemoryLogger, InMemoryMetrics, Level, RETIRED_FIELD};
    use crate::policies::{BackoffPolicy, RestartPolicy};
    use crate::stages::Handled;

    struct Hello;

    #[async_trait]
    impl FetchCollaborator<String> for Hello {
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

    struct Collect(mpsc::UnboundedSender<String>);

    #[async_trait]
    impl WorkCollaborator<String> for Collect {
        fn name(&self) -> &str {
            "collect"
        }

        fn instance_count(&self) -> usize {
            1
        }

        async fn handle_data(&self, item: String) -> Handled<String> {
            let _ = self.0.send(item);
            Handled::empty()
        }
    }

    /// Hangs in `close`, so its worker never finishes stopping.
    struct Stubborn;

    #[async_trait]
    impl WorkCollaborator<String> for Stubborn {
        fn name(&self) -> &str {
            "stubborn"
        }

        fn instance_count(&self) -> usize {
            1
        }

        async fn handle_data(&self, _item: String) -> Handled<String> {
            Handled::empty()
        }

        async fn close(&self) -> Result<(), StageError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn orchestrator(grace: Duration) -> (Orchestrator<String>, Arc<InMemoryLogger>) {
        let logger = Arc::new(InMemoryLogger::new());
        let orch = Orchestrator::<String>::builder(Config {
            grace,
            ..Config::default()
        })
        .with_logger(logger.clone())
        .build()
        .unwrap();
        (orch, logger)
    }

    #[tokio::test]
    async fn runs_until_signal_then_stops_cleanly() {
        let (orch, _) = orchestrator(Duration::from_secs(2));
        let (tx, mut rx) = mpsc::unbounded_channel();
        orch.add("greet", Arc::new(Hello), Arc::new(Collect(tx))).unwrap();
        assert_eq!(orch.live_tasks(), 1);

        let called = AtomicU32::new(0);
        let signal = async move {
            let first = timeout(Duration::from_secs(1), rx.recv()).await;
            assert_eq!(first.ok().flatten().as_deref(), Some("hello world"));
        };
        let report = orch
            .run_until(signal, || {
                called.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();

        assert_eq!(called.load(Ordering::SeqCst), 1);
        assert_eq!(report.stopped, vec!["greet".to_string()]);
        assert!(report.is_clean(), "{report:?}");
        assert_eq!(orch.live_tasks(), 0);
        assert!(orch.live_slots().snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn registration_rules() {
        let (orch, _) = orchestrator(Duration::from_secs(1));
        let (tx, _rx) = mpsc::unbounded_channel();
        let work: Arc<dyn WorkCollaborator<String>> = Arc::new(Collect(tx));

        orch.add("a", Arc::new(Hello), work.clone()).unwrap();
        assert_eq!(
            orch.add("a", Arc::new(Hello), work.clone()),
            Err(RuntimeError::DuplicateTask { name: "a".into() })
        );
        assert_eq!(
            orch.add("", Arc::new(Hello), work),
            Err(RuntimeError::EmptyName { component: "task" })
        );
        assert_eq!(orch.live_tasks(), 1);
    }

    #[tokio::test]
    async fn grace_exceeded_is_reported_not_fatal() {
        let (orch, logger) = orchestrator(Duration::from_millis(200));
        orch.add("slow", Arc::new(Hello), Arc::new(Stubborn)).unwrap();
        let mut events = orch.bus().subscribe();

        let report = timeout(
            Duration::from_secs(2),
            orch.run_until(tokio::time::sleep(Duration::from_millis(50)), || {}),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(report.stuck_tasks, vec!["slow".to_string()]);
        assert!(report.stopped.is_empty());
        assert!(!report.is_clean());
        assert!(logger.contains(Level::Warn, "stop timeout"));

        let mut kinds = Vec::new();
        while let Ok(ev) = events.try_recv() {
            kinds.push(ev.kind);
        }
        assert!(kinds.contains(&EventKind::ShutdownRequested));
        assert!(kinds.contains(&EventKind::GraceExceeded));
        assert!(!kinds.contains(&EventKind::AllStoppedWithin));
    }

    struct Faulty;

    #[async_trait]
    impl WorkCollaborator<String> for Faulty {
        fn name(&self) -> &str {
            "faulty"
        }

        fn instance_count(&self) -> usize {
            1
        }

        async fn handle_data(&self, item: String) -> Handled<String> {
            panic!("cannot handle {item}");
        }
    }

    #[tokio::test]
    async fn retired_workers_are_tracked_per_task() {
        let metrics = Arc::new(InMemoryMetrics::default());
        let orch = Orchestrator::<String>::builder(Config {
            grace: Duration::from_secs(2),
            restart: RestartPolicy::Bounded { max_restarts: 1 },
            backoff: BackoffPolicy::immediate(),
            ..Config::default()
        })
        .with_logger(Arc::new(InMemoryLogger::new()))
        .with_metrics(metrics.clone())
        .build()
        .unwrap();
        orch.add("t1", Arc::new(Hello), Arc::new(Faulty)).unwrap();
        orch.add("t2", Arc::new(Hello), Arc::new(Faulty)).unwrap();

        let live = orch.live_slots();
        let watch = Arc::clone(&live);
        let signal = async move {
            let retired = async {
                while watch.retired("worker:t1/faulty").await == 0
                    || watch.retired("worker:t2/faulty").await == 0
                {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            };
            assert!(timeout(Duration::from_secs(2), retired).await.is_ok());
        };
        let report = orch.run_until(signal, || {}).await.unwrap();

        for task in ["t1", "t2"] {
            let label = format!("worker:{task}/faulty");
            assert_eq!(live.retired(&label).await, 1, "{label}");
            assert_eq!(live.live(&label).await, 0, "{label}");
        }
        assert_eq!(live.retired("worker:faulty").await, 0);
        assert_eq!(metrics.count("worker", "faulty", RETIRED_FIELD), 2);
        assert_eq!(report.stopped.len(), 2);
        assert!(report.is_clean(), "{report:?}");
    }

    #[tokio::test]
    async fn builder_infers_item_type_without_tasks() {
        let orch = Orchestrator::<u64>::builder(Config::default())
            .with_logger(Arc::new(InMemoryLogger::new()))
            .build()
            .unwrap();
        let report = orch.run_until(async {}, || {}).await.unwrap();
        assert!(report.is_clean());
        assert!(report.stopped.is_empty());
    }

    #[tokio::test]
    async fn topology_errors_surface_before_start() {
        struct Empty;

        #[async_trait]
        impl FetchCollaborator<String> for Empty {
            fn name(&self) -> &str {
                "empty"
            }

            fn instance_count(&self) -> usize {
                0
            }

            async fn action(&self) -> Result<Option<String>, StageError> {
                Ok(None)
            }
        }

        let (orch, _) = orchestrator(Duration::from_secs(1));
        let (tx, _rx) = mpsc::unbounded_channel();
        orch.add("broken", Arc::new(Empty), Arc::new(Collect(tx))).unwrap();

        let err = orch.run_until(async {}, || {}).await.unwrap_err();
        assert_eq!(err.as_label(), "runtime_invalid_config");
    }
}
