//! # Live slot tracker.
//!
//! Maintains which supervised slots of each stage are still able to run, built
//! purely from bus events. This is where silent capacity loss becomes visible:
//! after a slot retires, [`LiveSlots::live`] for its stage drops by one and stays down.
//!
//! ## Architecture
//! ```text
//! slot supervisors ──► Bus ──► orchestrator listener ──► LiveSlots::update()
//!                                                            │
//!                                                            ▼
//!                                  HashMap<stage, HashMap<slot, SlotState{seq, phase}>>
//! ```
//!
//! ## Rules
//! - `SlotStarting` → running, `SlotFailed` → restarting, `SlotStopped` → stopped,
//!   `SlotRetired` → retired (terminal)
//! - Events with `seq <= last_seq` for a slot are **rejected** (stale)
//! - Reads are **eventually consistent** with the bus
//! - Stages are keyed by their event label; orchestrated stages use `kind:task/name`

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    Restarting,
    Stopped,
    Retired,
}

#[derive(Debug, Clone)]
struct SlotState {
    last_seq: u64,
    phase: Phase,
}

/// Thread-safe tracker of live slots per stage.
#[derive(Default)]
pub struct LiveSlots {
    state: RwLock<HashMap<String, HashMap<u32, SlotState>>>,
}

impl LiveSlots {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a slot event if it is newer than the last one seen for that slot.
    ///
    /// Returns `true` if the slot's phase changed.
    pub async fn update(&self, ev: &Event) -> bool {
        let phase = match ev.kind {
            EventKind::SlotStarting => Phase::Running,
            EventKind::SlotFailed => Phase::Restarting,
            EventKind::SlotStopped => Phase::Stopped,
            EventKind::SlotRetired => Phase::Retired,
            _ => return false,
        };
        let (Some(stage), Some(slot)) = (ev.stage.as_deref(), ev.slot) else {
            return false;
        };

        let mut state = self.state.write().await;
        let entry = state
            .entry(stage.to_string())
            .or_default()
            .entry(slot)
            .or_insert(SlotState {
                last_seq: 0,
                phase: Phase::Stopped,
            });

        if ev.seq <= entry.last_seq || entry.phase == Phase::Retired {
            return false;
        }
        entry.last_seq = ev.seq;
        let changed = entry.phase != phase;
        entry.phase = phase;
        changed
    }

    /// Number of slots of `stage` that are running or about to restart.
    pub async fn live(&self, stage: &str) -> usize {
        self.count(stage, |p| matches!(p, Phase::Running | Phase::Restarting))
            .await
    }

    /// Number of slots of `stage` that exhausted their restart budget.
    pub async fn retired(&self, stage: &str) -> usize {
        self.count(stage, |p| p == Phase::Retired).await
    }

    /// Sorted labels of stages that still have live slots.
    pub async fn snapshot(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut stages: Vec<String> = state
            .iter()
            .filter(|(_, slots)| {
                slots
                    .values()
                    .any(|s| matches!(s.phase, Phase::Running | Phase::Restarting))
            })
            .map(|(stage, _)| stage.clone())
            .collect();
        stages.sort_unstable();
        stages
    }

    async fn count(&self, stage: &str, pred: impl Fn(Phase) -> bool) -> usize {
        self.state
            .read()
            .await
            .get(stage)
            .map(|slots| slots.values().filter(|s| pred(s.phase)).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Subscribe for LiveSlots {
    async fn on_event(&self, event: &Event) {
        self.update(event).await;
    }

    fn name(&self) -> &'static str {
        "live-slots"
    }
}
