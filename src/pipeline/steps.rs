//! Step types for pipeline execution
//!
//! A [`Step`] is the atomic unit of a stage. Its execution mode is a
//! [`StepKind`] variant carrying only the fields that mode needs; the flat
//! wire form is converted at deserialization time.

#![allow(clippy::must_use_candidate, clippy::return_self_not_must_use)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::conditions::Condition;
use super::errors::ValidationError;
use super::variables::{Variable, is_env_name};

/// A host/container path binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountPath {
    /// Path on the host
    #[serde(default)]
    pub src_path: String,
    /// Path inside the container
    pub dst_path: String,
}

impl MountPath {
    /// Creates a mount binding
    pub fn new(src: impl Into<String>, dst: impl Into<String>) -> Self {
        Self {
            src_path: src.into(),
            dst_path: dst.into(),
        }
    }
}

/// Inline script run by the host shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellStep {
    /// Script body
    pub script: String,
    /// Paths copied into artifact staging after the run
    pub artifact_paths: Vec<String>,
}

/// Inline script run inside a container image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerStep {
    /// Image reference
    pub image: String,
    /// Script body, mounted into the container
    pub script: String,
    /// Entrypoint override
    pub command: Option<String>,
    /// Arguments passed to the entrypoint
    pub args: Vec<String>,
    /// Host port to container port bindings
    pub exposed_ports: BTreeMap<u16, u16>,
    /// Where the script is mounted inside the container
    pub script_mount: Option<MountPath>,
    /// Where the checked out source is mounted inside the container
    pub source_mount: Option<MountPath>,
    /// Additional volume bindings
    pub extra_mounts: Vec<MountPath>,
    /// Container paths collected as artifacts after the run
    pub artifact_paths: Vec<String>,
}

/// Execution mode of a step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepKind {
    /// Inline shell script on the host
    Shell(ShellStep),
    /// Inline script in a container image
    Container(ContainerStep),
    /// Reusable plugin expanded into sub-steps
    RefPlugin {
        /// Id of the referenced plugin
        plugin_id: u32,
    },
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shell(_) => write!(f, "shell"),
            Self::Container(step) => write!(f, "container({})", step.image),
            Self::RefPlugin { plugin_id } => write!(f, "plugin({plugin_id})"),
        }
    }
}

/// One executable unit of a stage
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawStep")]
pub struct Step {
    /// Position within the stage, the key later steps reference it by
    pub index: usize,
    /// Step name
    pub name: String,
    /// Execution mode
    pub kind: StepKind,
    /// Declared inputs, resolved in order before dispatch
    pub input_vars: Vec<Variable>,
    /// Declared outputs, valueless until the step completes
    pub output_vars: Vec<Variable>,
    /// Conditions deciding whether the step runs
    pub skip_conditions: Vec<Condition>,
    /// Conditions deciding whether a completed step succeeded
    pub success_conditions: Vec<Condition>,
    /// Run even when the owning pipeline already failed (post stage only)
    pub run_on_parent_failure: bool,
}

impl Step {
    fn new(index: usize, name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            index,
            name: name.into(),
            kind,
            input_vars: Vec::new(),
            output_vars: Vec::new(),
            skip_conditions: Vec::new(),
            success_conditions: Vec::new(),
            run_on_parent_failure: false,
        }
    }

    /// Creates an inline shell step
    pub fn shell(index: usize, name: impl Into<String>, script: impl Into<String>) -> Self {
        Self::new(
            index,
            name,
            StepKind::Shell(ShellStep {
                script: script.into(),
                artifact_paths: Vec::new(),
            }),
        )
    }

    /// Creates an inline container step
    pub fn container(
        index: usize,
        name: impl Into<String>,
        image: impl Into<String>,
        script: impl Into<String>,
    ) -> Self {
        Self::new(
            index,
            name,
            StepKind::Container(ContainerStep {
                image: image.into(),
                script: script.into(),
                command: None,
                args: Vec::new(),
                exposed_ports: BTreeMap::new(),
                script_mount: None,
                source_mount: None,
                extra_mounts: Vec::new(),
                artifact_paths: Vec::new(),
            }),
        )
    }

    /// Creates a referenced plugin step
    pub fn ref_plugin(index: usize, name: impl Into<String>, plugin_id: u32) -> Self {
        Self::new(index, name, StepKind::RefPlugin { plugin_id })
    }

    /// Sets the input variables
    pub fn with_inputs(mut self, vars: Vec<Variable>) -> Self {
        self.input_vars = vars;
        self
    }

    /// Sets the output declarations
    pub fn with_outputs(mut self, vars: Vec<Variable>) -> Self {
        self.output_vars = vars;
        self
    }

    /// Sets the skip conditions
    pub fn with_skip_conditions(mut self, conditions: Vec<Condition>) -> Self {
        self.skip_conditions = conditions;
        self
    }

    /// Sets the success conditions
    pub fn with_success_conditions(mut self, conditions: Vec<Condition>) -> Self {
        self.success_conditions = conditions;
        self
    }

    /// Sets the artifact paths of an inline step
    pub fn with_artifact_paths(mut self, paths: Vec<String>) -> Self {
        match &mut self.kind {
            StepKind::Shell(step) => step.artifact_paths = paths,
            StepKind::Container(step) => step.artifact_paths = paths,
            StepKind::RefPlugin { .. } => {}
        }
        self
    }

    /// Marks the step to run even when the build failed
    pub fn run_on_parent_failure(mut self) -> Self {
        self.run_on_parent_failure = true;
        self
    }

    /// Referenced plugin id, if this is a plugin step
    pub fn plugin_id(&self) -> Option<u32> {
        match self.kind {
            StepKind::RefPlugin { plugin_id } => Some(plugin_id),
            _ => None,
        }
    }

    /// Names of the declared outputs
    pub fn output_names(&self) -> Vec<String> {
        self.output_vars.iter().map(|v| v.name.clone()).collect()
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{} [{}]", self.name, self.index, self.kind)
    }
}

/// Wire form of a step
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStep {
    #[serde(default)]
    index: usize,
    name: String,
    #[serde(default)]
    step_type: String,
    #[serde(default)]
    executor_type: String,
    #[serde(default)]
    ref_plugin_id: u32,
    #[serde(default)]
    script: String,
    #[serde(default)]
    input_vars: Vec<Variable>,
    #[serde(default)]
    output_vars: Vec<Variable>,
    #[serde(default)]
    trigger_skip_conditions: Vec<Condition>,
    #[serde(default)]
    success_failure_conditions: Vec<Condition>,
    #[serde(default)]
    docker_image: String,
    #[serde(default)]
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    exposed_ports: BTreeMap<u16, u16>,
    #[serde(default)]
    custom_script_mount: Option<MountPath>,
    #[serde(default)]
    source_code_mount: Option<MountPath>,
    #[serde(default)]
    extra_volume_mounts: Vec<MountPath>,
    #[serde(default)]
    artifact_paths: Vec<String>,
    #[serde(default)]
    trigger_if_parent_stage_fail: bool,
}

impl TryFrom<RawStep> for Step {
    type Error = ValidationError;

    fn try_from(raw: RawStep) -> Result<Self, Self::Error> {
        // output names end up in the env-file trailer
        if let Some(bad) = raw.output_vars.iter().find(|v| !is_env_name(&v.name)) {
            return Err(ValidationError::InvalidOutputName {
                step: raw.name,
                variable: bad.name.clone(),
            });
        }

        let kind = match raw.step_type.as_str() {
            "" | "INLINE" => match raw.executor_type.as_str() {
                "" | "SHELL" => StepKind::Shell(ShellStep {
                    script: raw.script,
                    artifact_paths: raw.artifact_paths,
                }),
                "CONTAINER_IMAGE" => {
                    if raw.docker_image.is_empty() {
                        return Err(ValidationError::MissingImage { step: raw.name });
                    }
                    StepKind::Container(ContainerStep {
                        image: raw.docker_image,
                        script: raw.script,
                        command: Some(raw.command).filter(|c| !c.trim().is_empty()),
                        args: raw.args,
                        exposed_ports: raw.exposed_ports,
                        script_mount: raw.custom_script_mount,
                        source_mount: raw.source_code_mount,
                        extra_mounts: raw.extra_volume_mounts,
                        artifact_paths: raw.artifact_paths,
                    })
                }
                other => {
                    return Err(ValidationError::UnknownExecutorType {
                        step: raw.name,
                        value: other.to_string(),
                    });
                }
            },
            "REF_PLUGIN" => {
                if raw.ref_plugin_id == 0 {
                    return Err(ValidationError::MissingPluginId { step: raw.name });
                }
                StepKind::RefPlugin {
                    plugin_id: raw.ref_plugin_id,
                }
            }
            other => {
                return Err(ValidationError::UnknownStepType {
                    step: raw.name,
                    value: other.to_string(),
                });
            }
        };

        Ok(Self {
            index: raw.index,
            name: raw.name,
            kind,
            input_vars: raw.input_vars,
            output_vars: raw.output_vars,
            skip_conditions: raw.trigger_skip_conditions,
            success_conditions: raw.success_failure_conditions,
            run_on_parent_failure: raw.trigger_if_parent_stage_fail,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_shell_step() {
        let json = r#"{
            "index": 1,
            "name": "lint",
            "stepType": "INLINE",
            "executorType": "SHELL",
            "script": "make lint",
            "outputVars": [{"name": "REPORT"}],
            "artifactPaths": ["reports"]
        }"#;
        let step: Step = serde_json::from_str(json).unwrap();
        assert_eq!(step.index, 1);
        assert_eq!(step.output_names(), vec!["REPORT".to_string()]);
        match step.kind {
            StepKind::Shell(shell) => {
                assert_eq!(shell.script, "make lint");
                assert_eq!(shell.artifact_paths, vec!["reports".to_string()]);
            }
            other => panic!("unexpected kind {other}"),
        }
    }

    #[test]
    fn test_deserialize_container_step() {
        let json = r#"{
            "name": "test",
            "executorType": "CONTAINER_IMAGE",
            "dockerImage": "alpine:3.19",
            "script": "echo hi",
            "command": "",
            "exposedPorts": {"8080": 80},
            "sourceCodeMount": {"dstPath": "/src"}
        }"#;
        let step: Step = serde_json::from_str(json).unwrap();
        match step.kind {
            StepKind::Container(container) => {
                assert_eq!(container.image, "alpine:3.19");
                assert_eq!(container.command, None);
                assert_eq!(container.exposed_ports.get(&8080), Some(&80));
                assert_eq!(container.source_mount.unwrap().dst_path, "/src");
            }
            other => panic!("unexpected kind {other}"),
        }
    }

    #[test]
    fn test_container_step_requires_image() {
        let json = r#"{"name": "test", "executorType": "CONTAINER_IMAGE"}"#;
        let err = serde_json::from_str::<Step>(json).unwrap_err();
        assert!(err.to_string().contains("requires an image"));
    }

    #[test]
    fn test_deserialize_plugin_step() {
        let json = r#"{
            "name": "scan",
            "stepType": "REF_PLUGIN",
            "refPluginId": 7,
            "triggerIfParentStageFail": true
        }"#;
        let step: Step = serde_json::from_str(json).unwrap();
        assert_eq!(step.plugin_id(), Some(7));
        assert!(step.run_on_parent_failure);
    }

    #[test]
    fn test_output_name_must_be_identifier() {
        let json = r#"{
            "name": "report",
            "outputVars": [{"name": "OK"}, {"name": "X'; rm -rf /; '"}]
        }"#;
        let err = serde_json::from_str::<Step>(json).unwrap_err();
        assert!(err.to_string().contains("is not a valid variable name"));

        let json = r#"{"name": "report", "outputVars": [{"name": "_OK_2"}]}"#;
        assert!(serde_json::from_str::<Step>(json).is_ok());
    }

    #[test]
    fn test_unknown_step_type_rejected() {
        let json = r#"{"name": "x", "stepType": "MAGIC"}"#;
        assert!(serde_json::from_str::<Step>(json).is_err());
    }

    #[test]
    fn test_with_artifact_paths_ignored_for_plugin() {
        let step = Step::ref_plugin(0, "p", 3).with_artifact_paths(vec!["out".to_string()]);
        assert_eq!(step.kind, StepKind::RefPlugin { plugin_id: 3 });
    }
}
