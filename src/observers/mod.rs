//! # Logging and metrics observers.
//!
//! Stages call into two opaque observers:
//! - [`Logger`] formatted diagnostics (`debug` / `info` / `warn` / `error`)
//! - [`Metrics`] one sample per completed unit of work
//!
//! [`Observers`] bundles both so builders can pass them around as one value.
//! The default pair is [`TracingLogger`] + [`LogMetrics`].

mod logger;
mod metrics;

use std::sync::Arc;

pub use logger::{InMemoryLogger, Level, Logger, TracingLogger};
pub use metrics::{
    DURATION_FIELD, FieldValue, Fields, InMemoryMetrics, LogMetrics, Metrics, NoopMetrics,
    RETIRED_FIELD, Sample, Tags,
};
pub(crate) use metrics::{record_duration, record_retired};

/// Logger and metrics sink shared by every stage of a pipeline.
#[derive(Clone)]
pub struct Observers {
    /// Diagnostic sink.
    pub logger: Arc<dyn Logger>,
    /// Metrics sink.
    pub metrics: Arc<dyn Metrics>,
}

impl Observers {
    /// Bundles the given observers.
    pub fn new(logger: Arc<dyn Logger>, metrics: Arc<dyn Metrics>) -> Self {
        Self { logger, metrics }
    }
}

impl Default for Observers {
    fn default() -> Self {
        Self {
            logger: Arc::new(TracingLogger),
            metrics: Arc::new(LogMetrics),
        }
    }
}
