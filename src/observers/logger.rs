//! # Diagnostic logger observer.
//!
//! Stages report run-loop diagnostics (instance started, collaborator errors,
//! stage done) through a [`Logger`]. Calls are fire-and-forget: a logger must not
//! block and must not fail.
//!
//! [`TracingLogger`] forwards to `tracing` under the `gorgeous` target and is the
//! default everywhere. [`InMemoryLogger`] keeps every line, which is how tests
//! assert on what a stage reported.
//!
//! ```rust
//! use gorgeous::{Logger, TracingLogger};
//!
//! let log = TracingLogger;
//! log.info(format_args!("fetcher: {} is running.", "orders"));
//! ```

use std::fmt;
use std::sync::{Mutex, PoisonError};

/// Formatted diagnostic sink.
pub trait Logger: Send + Sync + 'static {
    /// Verbose lifecycle detail.
    fn debug(&self, args: fmt::Arguments<'_>);
    /// Normal operation.
    fn info(&self, args: fmt::Arguments<'_>);
    /// Degraded but still running.
    fn warn(&self, args: fmt::Arguments<'_>);
    /// A unit of work or collaborator failed.
    fn error(&self, args: fmt::Arguments<'_>);
}

/// [`Logger`] backed by `tracing` macros.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn debug(&self, args: fmt::Arguments<'_>) {
        tracing::debug!(target: "gorgeous", "{}", args);
    }

    fn info(&self, args: fmt::Arguments<'_>) {
        tracing::info!(target: "gorgeous", "{}", args);
    }

    fn warn(&self, args: fmt::Arguments<'_>) {
        tracing::warn!(target: "gorgeous", "{}", args);
    }

    fn error(&self, args: fmt::Arguments<'_>) {
        tracing::error!(target: "gorgeous", "{}", args);
    }
}

/// Severity of a line kept by [`InMemoryLogger`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// `debug`
    Debug,
    /// `info`
    Info,
    /// `warn`
    Warn,
    /// `error`
    Error,
}

/// [`Logger`] that keeps every formatted line in memory.
#[derive(Debug, Default)]
pub struct InMemoryLogger {
    lines: Mutex<Vec<(Level, String)>>,
}

impl InMemoryLogger {
    /// Creates an empty logger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines logged at `level`, oldest first.
    pub fn lines(&self, level: Level) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, line)| line.clone())
            .collect()
    }

    /// True if any line at `level` contains `needle`.
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|(l, line)| *l == level && line.contains(needle))
    }

    fn push(&self, level: Level, args: fmt::Arguments<'_>) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((level, args.to_string()));
    }
}

impl Logger for InMemoryLogger {
    fn debug(&self, args: fmt::Arguments<'_>) {
        self.push(Level::Debug, args);
    }

    fn info(&self, args: fmt::Arguments<'_>) {
        self.push(Level::Info, args);
    }

    fn warn(&self, args: fmt::Arguments<'_>) {
        self.push(Level::Warn, args);
    }

    fn error(&self, args: fmt::Arguments<'_>) {
        self.push(Level::Error, args);
    }
}
