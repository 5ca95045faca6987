//! Step execution layer
//!
//! Variable resolution, single-step dispatch and sequential stage runs,
//! plus the host shell runner and per-invocation workspaces.

mod resolver;
mod shell;
mod stage;
mod step;
mod traits;
mod workspace;

pub use resolver::{Scopes, StageOutputs, resolve_inputs};
pub use shell::{
    LocalShellRunner, ShellCommand, ShellConfig, ShellResult, parse_env_file, read_env_file,
    with_output_trailer,
};
pub use stage::{StageFailure, StageRunner};
pub use step::{StageContext, StepExecutor, StepOutcome, populate_outputs};
pub use traits::{ConditionEvaluator, ContainerRunConfig, ContainerRunner, ScriptRequest, ShellRunner};
pub use workspace::{Workspace, contained, copy_recursive};
