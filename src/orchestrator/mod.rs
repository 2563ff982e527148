//! Orchestrator: task registry, startup and bounded shutdown.
//!
//! - [`OrchestratorBuilder`] validates configuration and collects observers and subscribers.
//! - [`Orchestrator`] registers named tasks and runs them until a termination request.
//! - [`ShutdownReport`] describes how shutdown went.

mod builder;
#[allow(clippy::module_inception)]
mod orchestrator;

pub use builder::OrchestratorBuilder;
pub use orchestrator::{Orchestrator, ShutdownReport};
