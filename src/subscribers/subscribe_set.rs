//! # SubscriberSet: fan-out without waiting on handlers.
//!
//! ```text
//!    emit(&Event)
//!        │                (Arc-clone per subscriber)
//!        ├──────► [queue S1] ─► worker S1 ─► on_event()
//!        ├──────► [queue S2] ─► worker S2 ─► on_event()
//!        └──────► [queue SN] ─► worker SN ─► on_event()
//! ```
//!
//! ## Rules
//! - `emit` never awaits; per-subscriber order is queue order
//! - A full or closed queue drops the event for that subscriber and publishes
//!   `SubscriberOverflow` (never for an overflow event itself)
//! - A panicking handler is reported as `SubscriberPanicked`; its worker keeps going

use std::sync::Arc;

use futures::FutureExt;
use tokio::{sync::mpsc, task::JoinHandle};

use super::Subscribe;
use crate::core::runner::panic_message;
use crate::events::{Bus, Event, EventKind};

struct Channel {
    name: &'static str,
    tx: mpsc::Sender<Arc<Event>>,
}

/// Per-subscriber bounded queues and worker tasks.
pub struct SubscriberSet {
    channels: Vec<Channel>,
    workers: Vec<JoinHandle<()>>,
    bus: Bus,
}

impl SubscriberSet {
    /// Spawns one worker per subscriber.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>, bus: Bus) -> Self {
        let mut channels = Vec::with_capacity(subs.len());
        let mut workers = Vec::with_capacity(subs.len());

        for sub in subs {
            let name = sub.name();
            let (tx, mut rx) = mpsc::channel::<Arc<Event>>(sub.queue_capacity().max(1));
            let bus = bus.clone();

            workers.push(tokio::spawn(async move {
                while let Some(ev) = rx.recv().await {
                    let handled = std::panic::AssertUnwindSafe(sub.on_event(&ev))
                        .catch_unwind()
                        .await;
                    if let Err(payload) = handled {
                        bus.publish(Event::subscriber_panicked(
                            sub.name(),
                            panic_message(payload.as_ref()),
                        ));
                    }
                }
            }));
            channels.push(Channel { name, tx });
        }

        Self {
            channels,
            workers,
            bus,
        }
    }

    /// Queues `event` for every subscriber.
    pub fn emit(&self, event: &Event) {
        let overflow = matches!(event.kind, EventKind::SubscriberOverflow);
        let ev = Arc::new(event.clone());

        for channel in &self.channels {
            let reason = match channel.tx.try_send(Arc::clone(&ev)) {
                Ok(()) => continue,
                Err(mpsc::error::TrySendError::Full(_)) => "full",
                Err(mpsc::error::TrySendError::Closed(_)) => "closed",
            };
            if !overflow {
                self.bus
                    .publish(Event::subscriber_overflow(channel.name, reason));
            }
        }
    }

    /// Closes every queue and waits for the workers to drain them.
    pub async fn shutdown(self) {
        drop(self.channels);
        for worker in self.workers {
            let _ = worker.await;
        }
    }

    /// True if there are no subscribers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Number of subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    #[derive(Default)]
    struct Record(Mutex<Vec<EventKind>>);

    #[async_trait]
    impl Subscribe for Record {
        async fn on_event(&self, ev: &Event) {
            if let Ok(mut seen) = self.0.lock() {
                seen.push(ev.kind);
            }
        }

        fn name(&self) -> &'static str {
            "record"
        }
    }

    struct Explode;

    #[async_trait]
    impl Subscribe for Explode {
        async fn on_event(&self, _ev: &Event) {
            panic!("subscriber blew up");
        }

        fn name(&self) -> &'static str {
            "explode"
        }
    }

    struct Tiny;

    #[async_trait]
    impl Subscribe for Tiny {
        async fn on_event(&self, _ev: &Event) {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        }

        fn name(&self) -> &'static str {
            "tiny"
        }

        fn queue_capacity(&self) -> usize {
            1
        }
    }

    #[tokio::test]
    async fn delivers_in_order_and_isolates_panics() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let record = Arc::new(Record::default());
        let subs: Vec<Arc<dyn Subscribe>> = vec![record.clone(), Arc::new(Explode)];
        let set = SubscriberSet::new(subs, bus);
        assert_eq!(set.len(), 2);

        set.emit(&Event::new(EventKind::StageStarted));
        set.emit(&Event::new(EventKind::StageStopped));
        set.shutdown().await;

        let seen = record.0.lock().map(|s| s.clone()).unwrap_or_default();
        assert_eq!(seen, vec![EventKind::StageStarted, EventKind::StageStopped]);

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::SubscriberPanicked);
        assert_eq!(ev.stage.as_deref(), Some("explode"));
        assert_eq!(ev.reason.as_deref(), Some("subscriber blew up"));
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_publishes_overflow() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let set = SubscriberSet::new(vec![Arc::new(Tiny) as Arc<dyn Subscribe>], bus);

        // the worker takes the first event, the second fills the queue
        set.emit(&Event::new(EventKind::StageStarted));
        tokio::task::yield_now().await;
        set.emit(&Event::new(EventKind::StageStarted));
        set.emit(&Event::new(EventKind::StageStarted));

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::SubscriberOverflow);
        assert_eq!(ev.reason.as_deref(), Some("subscriber=tiny reason=full"));
        assert!(!set.is_empty());
    }
}
