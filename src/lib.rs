//! # cirunner - CI/CD pipeline step runner
//!
//! Resolves step inputs from global, stage and cross-stage variables, runs
//! shell and container steps in order, and drives the CI and CD lifecycles
//! around them.
//!
//! ## Layout
//!
//! - [`pipeline`]: request model, steps, variables, conditions, plugins
//! - [`executor`]: variable resolution and step/stage execution
//! - [`orchestrator`]: CI and CD lifecycles over collaborator traits
//! - [`infrastructure`]: docker, git, HTTP, storage adapters plus config and logging

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod executor;
pub mod infrastructure;
pub mod orchestrator;
pub mod pipeline;

// Prelude module for common imports
pub mod prelude;

// Re-export commonly used types
pub use executor::{StageRunner, StepExecutor, StepOutcome, Workspace};
pub use infrastructure::{Config, PipelineMetrics, init_logging};
pub use orchestrator::{CdOrchestrator, CiOrchestrator, Collaborators, RunSettings, handle_event};
pub use pipeline::{
    ExitStatus, GlobalEnv, PipelineError, PipelineResult, Step, StepKind, TriggerEvent,
    Validate, Variable, WorkflowRequest,
};

/// Version of the cirunner crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
