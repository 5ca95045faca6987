//! Prelude module for common imports

pub use crate::pipeline::conditions::{Condition, ConditionType, ExpressionEvaluator, Operator};
pub use crate::pipeline::env::GlobalEnv;
pub use crate::pipeline::errors::{PipelineError, ValidationError};
pub use crate::pipeline::request::{EventType, Task, TriggerEvent, WorkflowRequest};
pub use crate::pipeline::steps::{Step, StepKind};
pub use crate::pipeline::types::{ExitStatus, Phase, PipelineResult, StageType, Validate};
pub use crate::pipeline::variables::{Format, TypedValue, Variable, VariableSource};

pub use crate::executor::{
    ConditionEvaluator, ContainerRunner, ShellRunner, StageContext, StageRunner, StepExecutor,
    Workspace,
};

pub use crate::orchestrator::{Collaborators, RunSettings, handle_event};
