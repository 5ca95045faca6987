//! Error types for pipeline domain

use thiserror::Error;

use super::types::Phase;

/// Errors that can occur during pipeline operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Validation failed with specified reason
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// A referenced stage output could not be found
    #[error("RUNTIME_ERROR_{variable}_not_found")]
    ReferenceNotFound {
        /// Name of the input variable whose reference is missing.
        variable: String,
    },

    /// A value could not be coerced to its declared format
    #[error("value '{value}' of variable '{variable}' is not a valid {format}")]
    TypeMismatch {
        /// Name of the variable.
        variable: String,
        /// Declared format.
        format: String,
        /// Raw value that failed coercion.
        value: String,
    },

    /// Success conditions evaluated to false
    #[error("stage not successful because of condition failure in step '{step}'")]
    ConditionGateFailed {
        /// Name of the gated step.
        step: String,
    },

    /// A condition could not be evaluated
    #[error("condition evaluation failed: {0}")]
    Condition(String),

    /// The underlying shell or container run failed
    #[error("step '{step}' execution failed: {reason}")]
    StepExecution {
        /// Name of the step.
        step: String,
        /// Error message describing the failure.
        reason: String,
    },

    /// Command execution failed
    #[error("Command failed with exit code {code}: {stderr}")]
    CommandFailed {
        /// Exit code returned by the command.
        code: i32,
        /// Standard error output from the command.
        stderr: String,
    },

    /// A REF_PLUGIN step names a plugin that is not registered
    #[error("referenced plugin {plugin_id} not found")]
    PluginNotFound {
        /// Id of the missing plugin.
        plugin_id: u32,
    },

    /// A step tried to rewrite outputs already recorded for its index
    #[error("outputs for step index {step_index} were already recorded")]
    DuplicateStepOutput {
        /// Index of the step.
        step_index: usize,
    },

    /// Stage execution failed at a specific step
    #[error("Stage '{stage}' failed at step '{step}': {error}")]
    StageFailed {
        /// Name of the stage that failed.
        stage: String,
        /// Name of the step that failed.
        step: String,
        /// Error message describing the failure.
        error: String,
    },

    /// A surrounding infrastructure phase failed
    #[error("{phase} failed: {reason}")]
    Infrastructure {
        /// Phase that failed.
        phase: Phase,
        /// Error message describing the failure.
        reason: String,
    },

    /// The notification collaborator failed
    #[error("notification failed: {0}")]
    Notification(String),

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(String),
}

impl PipelineError {
    /// Wraps any displayable error as an infrastructure failure of `phase`.
    pub fn infrastructure(phase: Phase, reason: impl std::fmt::Display) -> Self {
        Self::Infrastructure {
            phase,
            reason: reason.to_string(),
        }
    }

    /// Returns true when the failure happened inside step execution
    #[must_use]
    pub fn is_step_failure(&self) -> bool {
        matches!(self, Self::StageFailed { .. })
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Validation errors for pipeline definitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Unknown step type on the wire
    #[error("step '{step}': unsupported step type '{value}'")]
    UnknownStepType {
        /// Name of the step.
        step: String,
        /// Offending value.
        value: String,
    },

    /// Unknown executor type on the wire
    #[error("step '{step}': unsupported executor type '{value}'")]
    UnknownExecutorType {
        /// Name of the step.
        step: String,
        /// Offending value.
        value: String,
    },

    /// Container step without an image
    #[error("step '{step}': container step requires an image")]
    MissingImage {
        /// Name of the step.
        step: String,
    },

    /// Plugin step without a plugin id
    #[error("step '{step}': referenced plugin step requires a plugin id")]
    MissingPluginId {
        /// Name of the step.
        step: String,
    },

    /// Unknown variable type on the wire
    #[error("variable '{variable}': unsupported variable type '{value}'")]
    UnknownVariableType {
        /// Name of the variable.
        variable: String,
        /// Offending value.
        value: String,
    },

    /// Unknown variable format on the wire
    #[error("variable '{variable}': unsupported format '{value}'")]
    UnknownFormat {
        /// Name of the variable.
        variable: String,
        /// Offending value.
        value: String,
    },

    /// Output name that is not a shell identifier
    #[error("step '{step}': output '{variable}' is not a valid variable name")]
    InvalidOutputName {
        /// Name of the step.
        step: String,
        /// Offending output name.
        variable: String,
    },

    /// A step or plugin references a plugin id that is not defined
    #[error("plugin {plugin_id} is referenced but not defined")]
    UnknownPlugin {
        /// The missing plugin id.
        plugin_id: u32,
    },

    /// Plugin definitions reference each other in a cycle
    #[error("plugin reference cycle: {}", format_cycle(.cycle))]
    PluginCycle {
        /// Plugin ids along the cycle, first id repeated at the end.
        cycle: Vec<u32>,
    },
}

fn format_cycle(cycle: &[u32]) -> String {
    cycle
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_not_found_names_variable() {
        let err = PipelineError::ReferenceNotFound {
            variable: "IMAGE".to_string(),
        };
        assert!(err.to_string().contains("IMAGE"));
    }

    #[test]
    fn test_stage_failed_is_step_failure() {
        let err = PipelineError::StageFailed {
            stage: "PRE".to_string(),
            step: "lint".to_string(),
            error: "exit 1".to_string(),
        };
        assert!(err.is_step_failure());
        assert!(!PipelineError::Io("x".to_string()).is_step_failure());
    }

    #[test]
    fn test_infrastructure_prefix() {
        let err = PipelineError::infrastructure(Phase::Push, "denied");
        assert_eq!(err.to_string(), "Docker push failed: denied");
    }

    #[test]
    fn test_plugin_cycle_display() {
        let err = ValidationError::PluginCycle {
            cycle: vec![1, 2, 1],
        };
        assert_eq!(err.to_string(), "plugin reference cycle: 1 -> 2 -> 1");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: PipelineError = io.into();
        assert!(matches!(err, PipelineError::Io(_)));
    }
}
