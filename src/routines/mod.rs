//! # Supervised run-loop bodies.
//!
//! - [`Routine`] trait for fallible, cancelable, restartable bodies
//! - [`RoutineFn`] closure-backed implementation
//! - [`RoutineRef`] shared handle (`Arc<dyn Routine>`)

mod routine;
mod routine_fn;

pub use routine::{BoxRoutineFuture, Routine, RoutineRef};
pub use routine_fn::RoutineFn;
