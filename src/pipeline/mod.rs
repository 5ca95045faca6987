//! Pipeline domain types and logic

pub mod conditions;
pub mod env;
pub mod errors;
pub mod plugins;
pub mod request;
pub mod steps;
pub mod types;
pub mod variables;

pub use conditions::{Condition, ConditionType, ExpressionEvaluator, Operator};
pub use env::GlobalEnv;
pub use errors::{PipelineError, ValidationError};
pub use plugins::PluginRegistry;
pub use request::{
    BuildConfig, BuildType, CiArtifact, DockerBuildConfig, EventType, PipelineType,
    ProjectDetails, RefPluginDefinition, StorageConfig, Task, TaskYaml, TriggerEvent,
    WorkflowRequest,
};
pub use steps::{ContainerStep, MountPath, ShellStep, Step, StepKind};
pub use types::{ExitStatus, Phase, PipelineResult, StageType, Validate};
pub use variables::{Format, StepRef, TypedValue, Variable, VariableSource, is_env_name};

impl WorkflowRequest {
    /// Builds the plugin registry and checks every stage's plugin references
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] found in the plugin graph or in
    /// a stage.
    pub fn plugin_registry(&self) -> Result<PluginRegistry, ValidationError> {
        let registry = PluginRegistry::new(self.ref_plugins.clone())?;
        for steps in [
            &self.pre_ci_steps,
            &self.post_ci_steps,
            &self.pre_post_deploy_steps,
        ] {
            registry.validate_steps(steps)?;
        }
        Ok(registry)
    }
}

impl Validate for WorkflowRequest {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), Self::Error> {
        self.plugin_registry().map(|_| ())
    }
}
