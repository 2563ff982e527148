use std::marker::PhantomData;
use std::sync::Arc;

use crate::{
    core::config::Config,
    error::RuntimeError,
    events::Bus,
    observers::{Logger, Metrics, Observers},
    subscribers::Subscribe,
};

use super::orchestrator::Orchestrator;

/// Builder for constructing an [`Orchestrator`] carrying items of type `T`.
///
/// Unset observers fall back to [`TracingLogger`](crate::TracingLogger) and
/// [`LogMetrics`](crate::LogMetrics).
pub struct OrchestratorBuilder<T> {
    cfg: Config,
    logger: Option<Arc<dyn Logger>>,
    metrics: Option<Arc<dyn Metrics>>,
    subscribers: Vec<Arc<dyn Subscribe>>,
    _items: PhantomData<fn() -> T>,
}

impl<T> Default for OrchestratorBuilder<T> {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl<T> OrchestratorBuilder<T> {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            logger: None,
            metrics: None,
            subscribers: Vec::new(),
            _items: PhantomData,
        }
    }

    /// Replaces the configuration.
    pub fn with_config(mut self, cfg: Config) -> Self {
        self.cfg = cfg;
        self
    }

    /// Sets the diagnostic logger shared by every stage.
    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Sets the metrics sink shared by every stage.
    pub fn with_metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Sets event subscribers.
    ///
    /// Subscribers receive runtime events (slot restarts, retirements, shutdown)
    /// through dedicated workers with bounded queues, once the orchestrator runs.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Validates the configuration and returns an orchestrator with no tasks.
    ///
    /// Nothing is spawned until [`Orchestrator::start`] or [`Orchestrator::run_until`].
    pub fn build(self) -> Result<Orchestrator<T>, RuntimeError>
    where
        T: Clone + Send + 'static,
    {
        self.cfg.validate()?;
        let defaults = Observers::default();
        let observers = Observers::new(
            self.logger.unwrap_or(defaults.logger),
            self.metrics.unwrap_or(defaults.metrics),
        );
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        Ok(Orchestrator::new_internal(
            self.cfg,
            bus,
            observers,
            self.subscribers,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::BackoffPolicy;

    #[test]
    fn build_validates_config() {
        let err = OrchestratorBuilder::<String>::new(Config {
            backoff: BackoffPolicy {
                factor: -1.0,
                ..BackoffPolicy::default()
            },
            ..Config::default()
        })
        .build()
        .err();
        assert_eq!(err.map(|e| e.as_label()), Some("runtime_invalid_config"));
    }

    #[test]
    fn item_type_comes_from_the_builder() {
        let orch = OrchestratorBuilder::<u32>::default().build();
        assert!(orch.is_ok_and(|o| o.live_tasks() == 0));
    }
}
