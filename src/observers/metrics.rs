//! # Metrics observer.
//!
//! Every completed unit of work is reported once through [`Metrics::measure`]:
//!
//! ```text
//! tags   = { "<stage kind>": "<name>" }     e.g. { "fetcher": "orders" }
//! fields = { "duration": <microseconds> }
//! ```
//!
//! Slot retirement is reported as `{ "<stage kind>": "<name>" }` / `{ "retired": 1 }`,
//! so capacity loss shows up next to throughput instead of going unnoticed.
//!
//! Implementations shipped here:
//! - [`LogMetrics`] writes samples with `tracing` (default)
//! - [`NoopMetrics`] discards everything
//! - [`InMemoryMetrics`] keeps samples for inspection

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::error::MetricsError;
use crate::observers::Logger;

/// Sample tags.
pub type Tags = BTreeMap<String, String>;
/// Sample fields.
pub type Fields = BTreeMap<String, FieldValue>;

/// Field name carrying elapsed microseconds.
pub const DURATION_FIELD: &str = "duration";
/// Field name carrying a slot retirement.
pub const RETIRED_FIELD: &str = "retired";

/// A single field value.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    /// Signed integer.
    Int(i64),
    /// Unsigned integer.
    UInt(u64),
    /// Floating point.
    Float(f64),
    /// Boolean.
    Bool(bool),
    /// Free text.
    Text(String),
}

impl FieldValue {
    /// Returns the value as `u64` if it is a non-negative integer.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            FieldValue::UInt(v) => Some(v),
            FieldValue::Int(v) => u64::try_from(v).ok(),
            _ => None,
        }
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::UInt(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

/// Metrics sink.
///
/// Called from run loops; implementations should return quickly.
pub trait Metrics: Send + Sync + 'static {
    /// Records one sample.
    fn measure(&self, tags: &Tags, fields: &Fields) -> Result<(), MetricsError>;
}

/// Writes each sample as a `tracing` event at info level.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogMetrics;

impl Metrics for LogMetrics {
    fn measure(&self, tags: &Tags, fields: &Fields) -> Result<(), MetricsError> {
        tracing::info!(target: "gorgeous::metrics", ?tags, ?fields, "measure");
        Ok(())
    }
}

/// Discards every sample.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn measure(&self, _tags: &Tags, _fields: &Fields) -> Result<(), MetricsError> {
        Ok(())
    }
}

/// One recorded sample.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    /// Tags as passed to `measure`.
    pub tags: Tags,
    /// Fields as passed to `measure`.
    pub fields: Fields,
}

/// Keeps every sample in memory.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    samples: Mutex<Vec<Sample>>,
}

impl InMemoryMetrics {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every sample recorded so far.
    pub fn samples(&self) -> Vec<Sample> {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Counts samples tagged `kind = name` that carry `field`.
    pub fn count(&self, kind: &str, name: &str, field: &str) -> usize {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.tags.get(kind).map(String::as_str) == Some(name))
            .filter(|s| s.fields.contains_key(field))
            .count()
    }
}

impl Metrics for InMemoryMetrics {
    fn measure(&self, tags: &Tags, fields: &Fields) -> Result<(), MetricsError> {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Sample {
                tags: tags.clone(),
                fields: fields.clone(),
            });
        Ok(())
    }
}

/// Reports `duration` for one unit of work; a failing sink is logged, never propagated.
pub(crate) fn record_duration(
    metrics: &dyn Metrics,
    logger: &dyn Logger,
    kind: &str,
    name: &str,
    elapsed: Duration,
) {
    let micros = elapsed.as_micros().min(u128::from(u64::MAX)) as u64;
    record(metrics, logger, kind, name, DURATION_FIELD, micros.into());
}

/// Reports a permanently retired slot.
pub(crate) fn record_retired(metrics: &dyn Metrics, logger: &dyn Logger, kind: &str, name: &str) {
    record(metrics, logger, kind, name, RETIRED_FIELD, 1u64.into());
}

fn record(
    metrics: &dyn Metrics,
    logger: &dyn Logger,
    kind: &str,
    name: &str,
    field: &str,
    value: FieldValue,
) {
    let tags = Tags::from([(kind.to_string(), name.to_string())]);
    let fields = Fields::from([(field.to_string(), value)]);
    if let Err(e) = metrics.measure(&tags, &fields) {
        logger.warn(format_args!("{kind}: {name} metrics {}: {e}", e.as_label()));
    }
}
