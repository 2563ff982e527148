//! # gorgeous
//!
//! **Gorgeous** runs supervised data pipelines on tokio.
//!
//! A pipeline *task* pairs one fetch collaborator (a source of items) with a chain of
//! work collaborators (transformations). The runtime wraps them into stages, runs every
//! stage instance under a restart supervisor, moves items through rendezvous queues so
//! backpressure reaches the source, and shuts everything down in dependency order.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   Orchestrator::add(name, fetch, work)   (one entry per task)
//!                    │
//!                    ▼ run_until / start
//! ┌────────────────────────────────────────────────────────────────────┐
//! │ Dispatcher "orders"                                                │
//! │                                                                    │
//! │  Fetcher ×N ──[fetch]──► merge ──[merged]──► dispatch ×N ──┬──► Worker A ──[out]──► Worker B
//! │  (action loop)                                (broadcast)  └──► Worker C
//! │                                                                    │
//! │  every instance: SlotSupervisor ── restart w/ backoff ── retire     │
//! └──────────────┬─────────────────────────────────────────────────────┘
//!                │ publish(Event)
//!                ▼
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                       Bus (broadcast channel)                      │
//! └─────────────────────────────────┬──────────────────────────────────┘
//!                                   ▼
//!                        orchestrator listener
//!                        ├──► LiveSlots (per-stage slot phases)
//!                        └──► SubscriberSet ──► user Subscribe impls
//! ```
//!
//! ### Slot lifecycle
//! ```text
//! loop {
//!   ├─► publish SlotStarting{ stage, slot, attempt }
//!   ├─► run the stage loop until it returns
//!   │       ├─ cancelled ──► publish SlotStopped, report Completed
//!   │       └─ error / panic ──► publish SlotFailed
//!   │             ├─ budget left ──► RestartScheduled{ delay }, sleep (cancellable), continue
//!   │             └─ exhausted   ──► SlotRetired, report Retired
//! }
//! ```
//!
//! ### Shutdown
//! ```text
//! signal ──► callback ──► ShutdownRequested ──► cancel runtime token
//!        ──► each dispatcher: fetchers ► dispatch slots ► worker chains (head first)
//!        ──► AllStoppedWithin | GraceExceeded ──► ShutdownReport
//! ```
//!
//! ## Features
//! | Area              | Description                                                   | Key types / traits                                 |
//! |-------------------|---------------------------------------------------------------|----------------------------------------------------|
//! | **Collaborators** | User logic behind each stage.                                 | [`FetchCollaborator`], [`WorkCollaborator`]        |
//! | **Stages**        | Supervised stage runtimes wired with rendezvous queues.       | [`Fetcher`], [`Worker`], [`WorkChain`], [`Dispatcher`] |
//! | **Orchestration** | Named tasks, signals, bounded shutdown.                       | [`Orchestrator`], [`ShutdownReport`]               |
//! | **Supervision**   | Restart loop around any [`Routine`], usable on its own.       | [`SlotSupervisor`], [`supervise`], [`SlotExit`]    |
//! | **Policies**      | Restart budget and backoff between restarts.                  | [`RestartPolicy`], [`BackoffPolicy`]               |
//! | **Observability** | Events, live slot tracking, logging and metrics sinks.        | [`Subscribe`], [`LiveSlots`], [`Logger`], [`Metrics`] |
//! | **Errors**        | Typed errors for configuration, run loops and collaborators.  | [`RuntimeError`], [`TaskError`], [`StageError`]    |
//!
//! ## Optional features
//! - `logging`: exports the built-in [`LogWriter`] event subscriber _(demo/reference only)_.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use async_trait::async_trait;
//! use gorgeous::{Config, FetchCollaborator, Handled, Orchestrator, StageError, WorkCollaborator};
//!
//! struct Hello;
//!
//! #[async_trait]
//! impl FetchCollaborator<String> for Hello {
//!     fn name(&self) -> &str { "hello" }
//!     fn instance_count(&self) -> usize { 1 }
//!     fn interval(&self) -> Duration { Duration::from_millis(10) }
//!     async fn action(&self) -> Result<Option<String>, StageError> {
//!         Ok(Some("hello world".into()))
//!     }
//! }
//!
//! struct Print;
//!
//! #[async_trait]
//! impl WorkCollaborator<String> for Print {
//!     fn name(&self) -> &str { "print" }
//!     fn instance_count(&self) -> usize { 1 }
//!     async fn handle_data(&self, item: String) -> Handled<String> {
//!         println!("{item}");
//!         Handled::empty()
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let orch = Orchestrator::<String>::builder(Config::default()).build()?;
//!     orch.add("greet", Arc::new(Hello), Arc::new(Print))?;
//!
//!     // In a service: `orch.start(|| println!("bye")).await?` waits for SIGINT/SIGTERM.
//!     let report = orch
//!         .run_until(tokio::time::sleep(Duration::from_millis(50)), || println!("bye"))
//!         .await?;
//!     assert!(report.is_clean());
//!     Ok(())
//! }
//! ```
mod core;
mod error;
mod events;
mod observers;
mod orchestrator;
mod policies;
mod routines;
mod stages;
mod subscribers;

// ---- Public re-exports ----

pub use core::queue;
pub use core::{
    Config, DEFAULT_GRACE, LiveSlots, SlotExit, SlotParams, SlotSupervisor, supervise,
    wait_for_shutdown_signal,
};
pub use error::{MetricsError, QueueError, RuntimeError, StageError, TaskError};
pub use events::{Bus, Event, EventKind};
pub use observers::{
    DURATION_FIELD, FieldValue, Fields, InMemoryLogger, InMemoryMetrics, Level, LogMetrics,
    Logger, Metrics, NoopMetrics, Observers, RETIRED_FIELD, Sample, Tags, TracingLogger,
};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, ShutdownReport};
pub use policies::{BackoffPolicy, DEFAULT_MAX_RESTARTS, JitterPolicy, RestartPolicy};
pub use routines::{BoxRoutineFuture, Routine, RoutineFn, RoutineRef};
pub use stages::{
    Dispatcher, DispatcherBuilder, FetchCollaborator, Fetcher, FetcherBuilder, Handled,
    MAX_CHAIN_LEN, WorkChain, WorkCollaborator, Worker, WorkerBuilder,
};
pub use subscribers::{Subscribe, SubscriberSet};

// Optional: expose a simple built-in event log subscriber (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
