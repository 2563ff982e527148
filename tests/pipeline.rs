//! End-to-end scenarios through the public API.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;

use gorgeous::{
    Config, Event, EventKind, FetchCollaborator, Handled, InMemoryLogger, InMemoryMetrics, Level,
    Orchestrator, StageError, Subscribe, WorkCollaborator, DURATION_FIELD,
};

struct Source {
    name: &'static str,
    payload: &'static str,
}

#[async_trait]
impl FetchCollaborator<String> for Source {
    fn name(&self) -> &str {
        self.name
    }

    fn instance_count(&self) -> usize {
        2
    }

    fn interval(&self) -> Duration {
        Duration::from_millis(5)
    }

    async fn action(&self) -> Result<Option<String>, StageError> {
        Ok(Some(self.payload.to_string()))
    }
}

/// `A` in the `A → B` chain: prefixes every item and flags it.
struct Prefix {
    next: Arc<dyn WorkCollaborator<String>>,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl WorkCollaborator<String> for Prefix {
    fn name(&self) -> &str {
        "A"
    }

    fn instance_count(&self) -> usize {
        2
    }

    async fn handle_data(&self, item: String) -> Handled<String> {
        Handled::partial(format!("forwarded:{item}"), "prefix is advisory")
    }

    fn next(&self) -> Option<Arc<dyn WorkCollaborator<String>>> {
        Some(Arc::clone(&self.next))
    }

    async fn close(&self) -> Result<(), StageError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// End of a chain: reports whatever it receives as an error and sinks it.
struct Sink {
    name: &'static str,
    seen: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicUsize>,
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
        let _ = self.seen.send(item.clone());
        Handled::failed(format!("boom: {item}"))
    }

    async fn close(&self) -> Result<(), StageError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct Kinds(std::sync::Mutex<Vec<EventKind>>);

#[async_trait]
impl Subscribe for Kinds {
    async fn on_event(&self, ev: &Event) {
        if let Ok(mut kinds) = self.0.lock() {
            kinds.push(ev.kind);
        }
    }

    fn name(&self) -> &'static str {
        "kinds"
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_tasks_run_and_stop_in_order() -> anyhow::Result<()> {
    let logger = Arc::new(InMemoryLogger::new());
    let metrics = Arc::new(InMemoryMetrics::default());
    let kinds = Arc::new(Kinds::default());
    let subs: Vec<Arc<dyn Subscribe>> = vec![kinds.clone()];

    let orch = Orchestrator::<String>::builder(Config {
        grace: Duration::from_secs(3),
        ..Config::default()
    })
    .with_logger(logger.clone())
    .with_metrics(metrics.clone())
    .with_subscribers(subs)
    .build()?;

    let closed = Arc::new(AtomicUsize::new(0));
    let (chain_tx, mut chain_rx) = mpsc::unbounded_channel();
    let head = Arc::new(Prefix {
        next: Arc::new(Sink {
            name: "B",
            seen: chain_tx,
            closed: Arc::clone(&closed),
        }),
        closed: Arc::clone(&closed),
    });
    orch.add("chain", Arc::new(Source { name: "data", payload: "data" }), head)?;

    let (hello_tx, mut hello_rx) = mpsc::unbounded_channel();
    let sink = Arc::new(Sink {
        name: "greeting",
        seen: hello_tx,
        closed: Arc::clone(&closed),
    });
    orch.add(
        "hello",
        Arc::new(Source { name: "hello", payload: "hello world" }),
        sink,
    )?;
    assert_eq!(orch.live_tasks(), 2);

    let log = Arc::clone(&logger);
    let signal = async move {
        let chained = timeout(Duration::from_secs(2), chain_rx.recv()).await;
        assert_eq!(chained.ok().flatten().as_deref(), Some("forwarded:data"));
        let greeted = timeout(Duration::from_secs(2), hello_rx.recv()).await;
        assert_eq!(greeted.ok().flatten().as_deref(), Some("hello world"));

        let logged = async {
            while !log.contains(Level::Error, "worker: B got an error: boom: forwarded:data") {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        assert!(timeout(Duration::from_secs(2), logged).await.is_ok());
    };
    let report = orch.run_until(signal, || {}).await?;

    assert!(report.is_clean(), "{report:?}");
    assert_eq!(report.rejected_sends, 0);
    assert_eq!(report.stopped.len(), 2);
    assert_eq!(orch.live_tasks(), 0);
    // A, B and greeting
    assert_eq!(closed.load(Ordering::SeqCst), 3);
    assert!(orch.live_slots().snapshot().await.is_empty());

    assert!(metrics.count("fetcher", "data", DURATION_FIELD) > 0);
    assert!(metrics.count("dispatcher", "chain", DURATION_FIELD) > 0);
    assert!(metrics.count("worker", "A", DURATION_FIELD) > 0);
    assert!(metrics.count("worker", "B", DURATION_FIELD) > 0);

    let kinds = kinds.0.lock().map(|k| k.clone()).unwrap_or_default();
    assert!(kinds.contains(&EventKind::StageStarted));
    assert!(kinds.contains(&EventKind::ShutdownRequested));
    assert!(kinds.contains(&EventKind::AllStoppedWithin));
    assert!(!kinds.contains(&EventKind::GraceExceeded));
    Ok(())
}

#[tokio::test]
async fn orchestrator_runs_once() -> anyhow::Result<()> {
    let orch = Orchestrator::<String>::builder(Config::default())
        .with_logger(Arc::new(InMemoryLogger::new()))
        .build()?;

    let first = orch.run_until(async {}, || {}).await?;
    assert!(first.is_clean());
    assert!(first.stopped.is_empty());

    let again = orch.run_until(async {}, || {}).await;
    assert_eq!(
        again.err().map(|e| e.as_label()),
        Some("runtime_already_started")
    );
    Ok(())
}
