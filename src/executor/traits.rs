//! Step execution traits
//!
//! Collaborators the step executor delegates to. Each is a narrow seam so
//! tests can substitute recording fakes for real processes.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use crate::pipeline::{
    Condition, ExpressionEvaluator, MountPath, PipelineError, PipelineResult, Variable,
};

/// One script run on the host
#[derive(Debug, Clone)]
pub struct ScriptRequest {
    /// Directory the script file and its env file are written to
    pub workdir: PathBuf,
    /// Working directory the script runs in
    pub cwd: PathBuf,
    /// Unique id within the stage, used for file names
    pub script_id: String,
    /// Script body
    pub script: String,
    /// Environment for the script
    pub env: HashMap<String, String>,
    /// Output variables to collect after the run
    pub output_names: Vec<String>,
}

/// Everything needed to run a script inside a container
#[derive(Debug, Clone)]
pub struct ContainerRunConfig {
    /// Image reference
    pub image: String,
    /// Entrypoint override
    pub command: Option<String>,
    /// Entrypoint arguments
    pub args: Vec<String>,
    /// Script body
    pub script: String,
    /// Unique id within the stage, used for file names
    pub script_id: String,
    /// Where the script is mounted, defaults to the runner's choice
    pub script_mount: Option<MountPath>,
    /// Environment for the container
    pub env: HashMap<String, String>,
    /// Host port to container port bindings
    pub exposed_ports: BTreeMap<u16, u16>,
    /// Checked out source binding
    pub source_mount: Option<MountPath>,
    /// Extra and artifact output bindings
    pub mounts: Vec<MountPath>,
    /// Host directory for the script and its env file
    pub workdir: PathBuf,
    /// Output variables to collect after the run
    pub output_names: Vec<String>,
}

/// Runs inline shell scripts
#[allow(clippy::missing_errors_doc)]
pub trait ShellRunner: Send + Sync {
    /// Runs the script and returns the raw values of the declared outputs
    fn run_script(&self, request: &ScriptRequest) -> PipelineResult<HashMap<String, String>>;
}

/// Runs scripts inside container images
#[allow(clippy::missing_errors_doc)]
pub trait ContainerRunner: Send + Sync {
    /// Runs the container and returns the raw values of the declared outputs
    fn run_container(&self, config: &ContainerRunConfig)
    -> PipelineResult<HashMap<String, String>>;
}

/// Evaluates skip and success condition lists
#[allow(clippy::missing_errors_doc)]
pub trait ConditionEvaluator: Send + Sync {
    /// Returns `true` when the step should run, or when it succeeded
    fn evaluate(
        &self,
        conditions: &[Condition],
        variables: &[Variable],
    ) -> Result<bool, PipelineError>;
}

impl ConditionEvaluator for ExpressionEvaluator {
    fn evaluate(
        &self,
        conditions: &[Condition],
        variables: &[Variable],
    ) -> Result<bool, PipelineError> {
        Self::evaluate_all(conditions, variables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{ConditionType, Operator};

    #[test]
    fn test_expression_evaluator_as_trait_object() {
        let evaluator: &dyn ConditionEvaluator = &ExpressionEvaluator;
        let conditions = vec![Condition::new(
            ConditionType::Trigger,
            "BRANCH",
            Operator::Eq,
            "main",
        )];
        let variables = vec![Variable::literal("BRANCH", "main")];
        assert!(evaluator.evaluate(&conditions, &variables).unwrap());
        assert!(evaluator.evaluate(&[], &variables).unwrap());
    }
}
