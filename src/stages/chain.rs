//! # Worker chains.
//!
//! A task's processing side is a chain of [`WorkCollaborator`]s. [`WorkChain`] turns
//! the implicit linked list formed by `next()` into an explicit, validated sequence,
//! then builds one [`Worker`] per element and wires them so each worker owns the next.
//!
//! ```text
//! head.next() → b.next() → c.next() → None
//!       │
//!       ▼ from_head
//! WorkChain [head, b, c] ──build──► Worker(head) ─owns─► Worker(b) ─owns─► Worker(c)
//! ```
//!
//! ## Rules
//! - Collaborators are compared by pointer: seeing the same `Arc` twice is a cycle
//! - Chains longer than [`MAX_CHAIN_LEN`] are rejected
//! - Workers are wired tail-first, before anything starts

use std::sync::Arc;

use crate::{
    core::config::Config,
    error::RuntimeError,
    events::Bus,
    observers::Observers,
    stages::collaborator::WorkCollaborator,
    stages::worker::Worker,
};

/// Longest chain accepted by [`WorkChain`].
pub const MAX_CHAIN_LEN: usize = 1024;

/// Ordered, acyclic sequence of work collaborators.
pub struct WorkChain<T: Send + 'static> {
    stages: Vec<Arc<dyn WorkCollaborator<T>>>,
    task: Option<String>,
}

impl<T: Send + 'static> WorkChain<T> {
    /// Follows `next()` from `head` until it returns `None`.
    pub fn from_head(head: Arc<dyn WorkCollaborator<T>>) -> Result<Self, RuntimeError> {
        let mut stages: Vec<Arc<dyn WorkCollaborator<T>>> = Vec::new();
        let mut cursor = Some(head);
        while let Some(stage) = cursor {
            if stages.iter().any(|s| same(s, &stage)) {
                return Err(RuntimeError::CyclicChain {
                    name: stage.name().to_string(),
                });
            }
            if stages.len() == MAX_CHAIN_LEN {
                return Err(too_long());
            }
            cursor = stage.next();
            stages.push(stage);
        }
        Ok(Self { stages, task: None })
    }

    /// Uses `stages` as given, ignoring their `next()`.
    pub fn from_stages(stages: Vec<Arc<dyn WorkCollaborator<T>>>) -> Result<Self, RuntimeError> {
        if stages.is_empty() {
            return Err(RuntimeError::InvalidConfig {
                component: "chain",
                reason: "a chain needs at least one worker".into(),
            });
        }
        if stages.len() > MAX_CHAIN_LEN {
            return Err(too_long());
        }
        for (i, stage) in stages.iter().enumerate() {
            if stages[..i].iter().any(|s| same(s, stage)) {
                return Err(RuntimeError::CyclicChain {
                    name: stage.name().to_string(),
                });
            }
        }
        Ok(Self { stages, task: None })
    }

    /// Scopes every worker's event label to `task`.
    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }

    /// Number of workers in the chain.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Always false for a validated chain.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Collaborator names, head first.
    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Builds every worker and returns the head, which owns the rest.
    pub fn build(
        self,
        config: &Config,
        bus: &Bus,
        observers: &Observers,
    ) -> Result<Worker<T>, RuntimeError> {
        let task = self.task;
        let mut workers = self
            .stages
            .into_iter()
            .map(|stage| {
                let builder = Worker::builder(stage)
                    .with_config(config)
                    .with_bus(bus.clone())
                    .with_observers(observers.clone());
                match &task {
                    Some(task) => builder.with_task(task.as_str()).build(),
                    None => builder.build(),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut head = workers.pop().ok_or_else(|| RuntimeError::InvalidConfig {
            component: "chain",
            reason: "a chain needs at least one worker".into(),
        })?;
        while let Some(mut prev) = workers.pop() {
            prev.set_next(head)?;
            head = prev;
        }
        Ok(head)
    }
}

fn same<T: Send + 'static>(
    a: &Arc<dyn WorkCollaborator<T>>,
    b: &Arc<dyn WorkCollaborator<T>>,
) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

fn too_long() -> RuntimeError {
    RuntimeError::InvalidConfig {
        component: "chain",
        reason: format!("chains are limited to {MAX_CHAIN_LEN} workers"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::stages::collaborator::Handled;

    struct Link {
        name: &'static str,
        next: Mutex<Option<Arc<dyn WorkCollaborator<u8>>>>,
    }

    impl Link {
        fn new(name: &'static str, next: Option<Arc<dyn WorkCollaborator<u8>>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                next: Mutex::new(next),
            })
        }
    }

    #[async_trait]
    impl WorkCollaborator<u8> for Link {
        fn name(&self) -> &str {
            self.name
        }

        fn instance_count(&self) -> usize {
            1
        }

        async fn handle_data(&self, item: u8) -> Handled<u8> {
            Handled::ok(item)
        }

        fn next(&self) -> Option<Arc<dyn WorkCollaborator<u8>>> {
            self.next.lock().ok().and_then(|n| n.clone())
        }
    }

    #[test]
    fn follows_next_from_head() {
        let c = Link::new("c", None);
        let b = Link::new("b", Some(c as Arc<dyn WorkCollaborator<u8>>));
        let a = Link::new("a", Some(b as Arc<dyn WorkCollaborator<u8>>));

        let chain = WorkChain::<u8>::from_head(a).unwrap();
        assert_eq!(chain.names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn rejects_cycles() {
        let b = Link::new("b", None);
        let a = Link::new("a", Some(b.clone() as Arc<dyn WorkCollaborator<u8>>));
        if let Ok(mut next) = b.next.lock() {
            *next = Some(a.clone() as Arc<dyn WorkCollaborator<u8>>);
        }

        let err = WorkChain::<u8>::from_head(a.clone()).err();
        assert_eq!(err, Some(RuntimeError::CyclicChain { name: "a".into() }));

        // break the cycle so the test does not leak
        if let Ok(mut next) = b.next.lock() {
            *next = None;
        }
    }

    #[tokio::test]
    async fn build_wires_tail_first() {
        let chain = WorkChain::from_stages(vec![
            Link::new("a", None) as Arc<dyn WorkCollaborator<u8>>,
            Link::new("b", None) as Arc<dyn WorkCollaborator<u8>>,
            Link::new("c", None) as Arc<dyn WorkCollaborator<u8>>,
        ])
        .unwrap()
        .with_task("orders");
        assert_eq!(chain.len(), 3);

        let head = chain
            .build(&Config::default(), &Bus::new(16), &Observers::default())
            .unwrap();
        let names: Vec<&str> =
            std::iter::successors(Some(&head), |w| w.next()).map(Worker::name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        let labels: Vec<&str> =
            std::iter::successors(Some(&head), |w| w.next()).map(Worker::label).collect();
        assert_eq!(labels, vec!["worker:orders/a", "worker:orders/b", "worker:orders/c"]);
    }

    #[test]
    fn rejects_empty_chain() {
        let err = WorkChain::<u8>::from_stages(Vec::new()).err();
        assert_eq!(err.map(|e| e.as_label()), Some("runtime_invalid_config"));
    }
}
