//! # Simple data processing pipeline
//!
//! One task, three stages:
//! - `numbers` fetcher ticks every 500ms and emits a counter
//! - `double` worker fails on multiples of 5 (logged, item still forwarded)
//! - `print` worker prints what reaches the end of the chain
//!
//! Press Ctrl+C to stop; the shutdown report is printed at the end.
//!
//! ```text
//! RUST_LOG=info cargo run --example simple_pipeline --features logging
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing_subscriber::EnvFilter;

use gorgeous::{
    BackoffPolicy, Config, FetchCollaborator, Handled, LogWriter, Orchestrator, RestartPolicy,
    StageError, Subscribe, WorkCollaborator,
};

/// Emits 0, 1, 2, ... once per tick.
#[derive(Default)]
struct Numbers {
    counter: AtomicU64,
}

#[async_trait]
impl FetchCollaborator<u64> for Numbers {
    fn name(&self) -> &str {
        "numbers"
    }

    fn instance_count(&self) -> usize {
        1
    }

    fn interval(&self) -> Duration {
        Duration::from_millis(500)
    }

    async fn action(&self) -> Result<Option<u64>, StageError> {
        Ok(Some(self.counter.fetch_add(1, Ordering::Relaxed)))
    }
}

/// Doubles each number and complains about multiples of 5.
struct Double {
    next: Arc<dyn WorkCollaborator<u64>>,
}

#[async_trait]
impl WorkCollaborator<u64> for Double {
    fn name(&self) -> &str {
        "double"
    }

    fn instance_count(&self) -> usize {
        2
    }

    async fn handle_data(&self, n: u64) -> Handled<u64> {
        if n % 5 == 0 && n != 0 {
            return Handled::partial(n * 2, format!("{n} is divisible by 5"));
        }
        Handled::ok(n * 2)
    }

    fn next(&self) -> Option<Arc<dyn WorkCollaborator<u64>>> {
        Some(Arc::clone(&self.next))
    }
}

/// End of the chain.
struct Print;

#[async_trait]
impl WorkCollaborator<u64> for Print {
    fn name(&self) -> &str {
        "print"
    }

    fn instance_count(&self) -> usize {
        1
    }

    async fn handle_data(&self, n: u64) -> Handled<u64> {
        println!("📝 result: {n}");
        Handled::empty()
    }

    async fn close(&self) -> Result<(), StageError> {
        println!("📝 printer closed");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    println!("🚀 Simple Pipeline Demo");
    println!("   Press Ctrl+C to stop\n");

    let config = Config {
        grace: Duration::from_secs(3),
        restart: RestartPolicy::Bounded { max_restarts: 10 },
        backoff: BackoffPolicy {
            first: Duration::from_millis(200),
            max: Duration::from_secs(2),
            factor: 2.0,
            ..BackoffPolicy::default()
        },
        ..Config::default()
    };

    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter)];
    let orch = Orchestrator::<u64>::builder(config)
        .with_subscribers(subs)
        .build()?;

    let head = Arc::new(Double {
        next: Arc::new(Print),
    });
    orch.add("numbers", Arc::new(Numbers::default()), head)?;

    let report = orch.start(|| println!("\n🛑 shutting down")).await?;
    if report.is_clean() {
        println!("✅ stopped: {:?} in {:?}", report.stopped, report.elapsed);
    } else {
        println!(
            "⚠️  stuck tasks: {:?}, stuck stages: {:?}, rejected sends: {}",
            report.stuck_tasks, report.stuck_stages, report.rejected_sends
        );
    }
    Ok(())
}
