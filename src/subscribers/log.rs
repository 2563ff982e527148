//! # Event log subscriber for debugging and demos.
//!
//! [`LogWriter`] turns runtime events into `tracing` records under the
//! `gorgeous::events` target.
//!
//! ## Output format
//! ```text
//! [slot-starting] stage=fetcher:ingest/orders slot=0 attempt=1
//! [slot-failed] stage=worker:ingest/parse slot=1 attempt=3 reason="parse error"
//! [restart] stage=worker:ingest/parse slot=1 delay_ms=200 after_attempt=3
//! [slot-retired] stage=worker:ingest/parse slot=1 attempt=2001 reason="parse error"
//! [shutdown-requested]
//! [grace-exceeded] stuck="orders"
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Logs every event through `tracing`.
///
/// Failures, retirements and subscriber problems are warnings; the rest is info,
/// except slot starts which are debug.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogWriter;

fn stage(e: &Event) -> &str {
    e.stage.as_deref().unwrap_or("-")
}

fn reason(e: &Event) -> &str {
    e.reason.as_deref().unwrap_or("")
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let slot = e.slot.unwrap_or_default();
        let attempt = e.attempt.unwrap_or_default();
        match e.kind {
            EventKind::SlotStarting => tracing::debug!(
                target: "gorgeous::events",
                "[slot-starting] stage={} slot={slot} attempt={attempt}",
                stage(e)
            ),
            EventKind::SlotStopped => tracing::info!(
                target: "gorgeous::events",
                "[slot-stopped] stage={} slot={slot} attempt={attempt}",
                stage(e)
            ),
            EventKind::SlotFailed => tracing::warn!(
                target: "gorgeous::events",
                "[slot-failed] stage={} slot={slot} attempt={attempt} reason={:?}",
                stage(e),
                reason(e)
            ),
            EventKind::RestartScheduled => tracing::info!(
                target: "gorgeous::events",
                "[restart] stage={} slot={slot} delay_ms={} after_attempt={attempt}",
                stage(e),
                e.delay_ms.unwrap_or_default()
            ),
            EventKind::SlotRetired => tracing::warn!(
                target: "gorgeous::events",
                "[slot-retired] stage={} slot={slot} attempt={attempt} reason={:?}",
                stage(e),
                reason(e)
            ),
            EventKind::StageStarted => {
                tracing::info!(target: "gorgeous::events", "[stage-started] stage={}", stage(e))
            }
            EventKind::StageStopped => {
                tracing::info!(target: "gorgeous::events", "[stage-stopped] stage={}", stage(e))
            }
            EventKind::TaskRegistered => {
                tracing::info!(target: "gorgeous::events", "[task-registered] task={}", stage(e))
            }
            EventKind::ShutdownRequested => {
                tracing::info!(target: "gorgeous::events", "[shutdown-requested]")
            }
            EventKind::AllStoppedWithin => {
                tracing::info!(target: "gorgeous::events", "[all-stopped-within-grace]")
            }
            EventKind::GraceExceeded => tracing::warn!(
                target: "gorgeous::events",
                "[grace-exceeded] stuck={:?}",
                reason(e)
            ),
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked => tracing::warn!(
                target: "gorgeous::events",
                "[subscriber] {:?} subscriber={} reason={:?}",
                e.kind,
                stage(e),
                reason(e)
            ),
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}
