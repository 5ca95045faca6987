//! Single step execution
//!
//! Resolves a step's inputs, applies its skip conditions, dispatches it to
//! the shell runner, the container runner or a nested plugin run, then
//! types its outputs and applies its success conditions.

use std::collections::HashMap;
use std::io;

use crate::pipeline::{
    ContainerStep, GlobalEnv, MountPath, PipelineError, PipelineResult, PluginRegistry, ShellStep,
    StageType, Step, StepKind, Variable,
};

use super::resolver::{Scopes, StageOutputs, resolve_inputs};
use super::stage::StageRunner;
use super::traits::{
    ConditionEvaluator, ContainerRunConfig, ContainerRunner, ScriptRequest, ShellRunner,
};
use super::workspace::{Workspace, contained, copy_recursive};

/// Scope a stage runs in
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    /// Stage type, selects which output maps a step may reference
    pub stage: StageType,
    /// Global environment for this stage
    pub global: &'a GlobalEnv,
    /// Pre-CI outputs, visible to post stages
    pub pre_ci: Option<&'a StageOutputs>,
}

impl<'a> StageContext<'a> {
    /// Creates a context without pre-CI outputs
    #[must_use]
    pub fn new(stage: StageType, global: &'a GlobalEnv) -> Self {
        Self {
            stage,
            global,
            pre_ci: None,
        }
    }

    /// Makes pre-CI outputs visible
    #[must_use]
    pub fn with_pre_ci(mut self, outputs: Option<&'a StageOutputs>) -> Self {
        self.pre_ci = outputs;
        self
    }

    fn scopes<'b>(&self, current: &'b StageOutputs) -> Scopes<'b>
    where
        'a: 'b,
    {
        match self.stage {
            StageType::Pre => Scopes {
                pre_ci: Some(current),
                ..Scopes::default()
            },
            StageType::Post => Scopes {
                pre_ci: self.pre_ci,
                post_ci: Some(current),
                plugin: None,
            },
            StageType::RefPlugin => Scopes {
                plugin: Some(current),
                ..Scopes::default()
            },
        }
    }
}

/// What happened to a step
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Skip conditions said not to run
    Skipped,
    /// Step ran; carries its typed outputs
    Completed(Vec<Variable>),
}

/// Runs one step through the matching collaborator
#[derive(Clone, Copy)]
pub struct StepExecutor<'a> {
    shell: &'a dyn ShellRunner,
    container: &'a dyn ContainerRunner,
    conditions: &'a dyn ConditionEvaluator,
    plugins: &'a PluginRegistry,
    workspace: &'a Workspace,
}

impl<'a> StepExecutor<'a> {
    /// Creates an executor over the given collaborators
    #[must_use]
    pub fn new(
        shell: &'a dyn ShellRunner,
        container: &'a dyn ContainerRunner,
        conditions: &'a dyn ConditionEvaluator,
        plugins: &'a PluginRegistry,
        workspace: &'a Workspace,
    ) -> Self {
        Self {
            shell,
            container,
            conditions,
            plugins,
            workspace,
        }
    }

    /// Workspace the executor writes to
    #[must_use]
    pub fn workspace(&self) -> &'a Workspace {
        self.workspace
    }

    /// Shell collaborator
    #[must_use]
    pub fn shell(&self) -> &'a dyn ShellRunner {
        self.shell
    }

    /// Executes `step`, the `position`-th step of its stage
    ///
    /// The step's input variables are replaced by their resolved values and,
    /// on completion, its output variables by the typed outputs.
    ///
    /// # Errors
    ///
    /// Returns resolution, condition, execution and output typing errors.
    /// A false success condition yields [`PipelineError::ConditionGateFailed`].
    pub fn execute(
        &self,
        ctx: StageContext<'_>,
        position: usize,
        step: &mut Step,
        current: &StageOutputs,
    ) -> PipelineResult<StepOutcome> {
        if ctx.stage != StageType::RefPlugin {
            tracing::info!(step = %step.name, stage = %ctx.stage, "Running step");
        }
        step.input_vars = resolve_inputs(&step.input_vars, ctx.global, ctx.scopes(current))?;

        let mut env: HashMap<String, String> = step
            .input_vars
            .iter()
            .map(|v| (v.name.clone(), v.value.clone()))
            .collect();
        env.extend(ctx.global.iter().map(|(k, v)| (k.clone(), v.clone())));

        if ctx.stage != StageType::RefPlugin {
            let empty: Vec<&str> = step
                .input_vars
                .iter()
                .filter(|v| v.value.is_empty())
                .map(|v| v.name.as_str())
                .collect();
            tracing::info!(step = %step.name, variables = ?empty, "Variables with empty value");
        }

        if !step.skip_conditions.is_empty()
            && !self
                .conditions
                .evaluate(&step.skip_conditions, &step.input_vars)?
        {
            tracing::info!(step = %step.name, "Skipping step as per conditions");
            return Ok(StepOutcome::Skipped);
        }

        self.workspace.reset_process_dir()?;
        let script_id = format!("stage-{position}");

        let raw = match &step.kind {
            StepKind::Shell(shell) => {
                self.run_shell(&step.name, shell, script_id, env, step.output_names())?
            }
            StepKind::Container(container) => {
                self.run_container(&step.name, container, script_id, env, step.output_names())?
            }
            StepKind::RefPlugin { plugin_id } => {
                self.run_plugin(ctx.global, *plugin_id, &step.input_vars, &step.output_vars)?
            }
        };

        let outputs = populate_outputs(&raw, &step.output_vars)?;
        step.output_vars.clone_from(&outputs);

        if !step.success_conditions.is_empty()
            && !self
                .conditions
                .evaluate(&step.success_conditions, &outputs)?
        {
            return Err(PipelineError::ConditionGateFailed {
                step: step.name.clone(),
            });
        }

        Ok(StepOutcome::Completed(outputs))
    }

    fn run_shell(
        &self,
        name: &str,
        step: &ShellStep,
        script_id: String,
        env: HashMap<String, String>,
        output_names: Vec<String>,
    ) -> PipelineResult<HashMap<String, String>> {
        let request = ScriptRequest {
            workdir: self.workspace.process_dir().to_path_buf(),
            cwd: self.workspace.source_dir().to_path_buf(),
            script_id,
            script: step.script.clone(),
            env,
            output_names,
        };
        let outputs = self.shell.run_script(&request)?;

        for path in &step.artifact_paths {
            let src = self.workspace.source_path(path);
            let dst = self.workspace.artifact_path(name, path);
            match copy_recursive(&src, &dst) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    tracing::warn!(step = %name, path = %path, "Artifact path does not exist, skipping");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(outputs)
    }

    fn run_container(
        &self,
        name: &str,
        step: &ContainerStep,
        script_id: String,
        env: HashMap<String, String>,
        output_names: Vec<String>,
    ) -> PipelineResult<HashMap<String, String>> {
        let opt_dir = self.workspace.process_dir().join("opt");
        let mut mounts = step.extra_mounts.clone();
        for artifact in &step.artifact_paths {
            let host = opt_dir.join(contained(artifact));
            std::fs::create_dir_all(&host)?;
            mounts.push(MountPath::new(host.display().to_string(), artifact.clone()));
        }

        let source_mount = step.source_mount.as_ref().map(|mount| {
            MountPath::new(
                self.workspace.source_dir().display().to_string(),
                mount.dst_path.clone(),
            )
        });

        let config = ContainerRunConfig {
            image: step.image.clone(),
            command: step.command.clone(),
            args: step.args.clone(),
            script: step.script.clone(),
            script_id,
            script_mount: step.script_mount.clone(),
            env,
            exposed_ports: step.exposed_ports.clone(),
            source_mount,
            mounts,
            workdir: self.workspace.process_dir().to_path_buf(),
            output_names,
        };
        let outputs = self.container.run_container(&config)?;

        match copy_recursive(&opt_dir, &self.workspace.artifact_path(name, "")) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(step = %name, "No container artifacts to collect");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(outputs)
    }

    fn run_plugin(
        &self,
        global: &GlobalEnv,
        plugin_id: u32,
        inputs: &[Variable],
        outputs: &[Variable],
    ) -> PipelineResult<HashMap<String, String>> {
        let mut sub_steps = self.plugins.expand(plugin_id)?;
        apply_overrides(&mut sub_steps, inputs);

        let nested = StageContext::new(StageType::RefPlugin, global);
        let produced = StageRunner::new(*self)
            .run(nested, &mut sub_steps)
            .map_err(|failure| {
                tracing::error!(plugin_id, step = %failure.step.name, "Plugin step failed");
                failure.error
            })?;

        Ok(outputs
            .iter()
            .filter_map(|out| {
                produced
                    .get(out.plugin_step_index, &out.name)
                    .map(|found| (out.name.clone(), found.value.clone()))
            })
            .collect())
    }
}

/// Copies the outer step's input values onto matching plugin sub-step inputs
///
/// Matching is by `(plugin_step_index, name)` against `(sub_step.index,
/// input.name)`.
fn apply_overrides(sub_steps: &mut [Step], inputs: &[Variable]) {
    let mut by_step: HashMap<usize, HashMap<&str, &str>> = HashMap::new();
    for input in inputs {
        by_step
            .entry(input.plugin_step_index)
            .or_default()
            .insert(input.name.as_str(), input.value.as_str());
    }

    for sub_step in sub_steps {
        let Some(overrides) = by_step.get(&sub_step.index) else {
            continue;
        };
        for input in &mut sub_step.input_vars {
            if let Some(value) = overrides.get(input.name.as_str()) {
                input.value = (*value).to_string();
            }
        }
    }
}

/// Matches raw outputs against the declared outputs and types them
///
/// Declared outputs with a missing or empty raw value are dropped, as are
/// raw values nobody declared.
///
/// # Errors
///
/// Returns [`PipelineError::TypeMismatch`] if a value does not match its
/// declared format.
pub fn populate_outputs(
    raw: &HashMap<String, String>,
    declared: &[Variable],
) -> PipelineResult<Vec<Variable>> {
    let mut outputs = Vec::with_capacity(declared.len());
    for decl in declared {
        let value = raw.get(&decl.name).map(String::as_str).unwrap_or_default();
        if value.is_empty() {
            tracing::info!(variable = %decl.name, "Output not present");
            continue;
        }
        let mut out = decl.clone();
        out.value = value.to_string();
        out.type_check()?;
        outputs.push(out);
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Format, TypedValue};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_populate_outputs_drops_missing_and_undeclared() {
        let raw = HashMap::from([
            ("COUNT".to_string(), "3".to_string()),
            ("EMPTY".to_string(), String::new()),
            ("EXTRA".to_string(), "x".to_string()),
        ]);
        let declared = vec![
            Variable::output("COUNT").with_format(Format::Number),
            Variable::output("EMPTY"),
            Variable::output("ABSENT"),
        ];
        let outputs = populate_outputs(&raw, &declared).unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].typed_value, Some(TypedValue::Number(3.0)));
    }

    #[test]
    fn test_populate_outputs_rejects_bad_format() {
        let raw = HashMap::from([("OK".to_string(), "maybe".to_string())]);
        let declared = vec![Variable::output("OK").with_format(Format::Bool)];
        assert!(matches!(
            populate_outputs(&raw, &declared),
            Err(PipelineError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_apply_overrides_by_step_and_name() {
        let mut sub_steps = vec![
            Step::shell(1, "first", "true").with_inputs(vec![Variable::literal("TARGET", "dev")]),
            Step::shell(2, "second", "true").with_inputs(vec![Variable::literal("TARGET", "dev")]),
        ];
        let inputs = vec![Variable::literal("TARGET", "prod").in_plugin_step(2)];
        apply_overrides(&mut sub_steps, &inputs);
        assert_eq!(sub_steps[0].input_vars[0].value, "dev");
        assert_eq!(sub_steps[1].input_vars[0].value, "prod");
    }

    fn format_strategy() -> impl Strategy<Value = Format> {
        prop_oneof![
            Just(Format::String),
            Just(Format::Number),
            Just(Format::Bool),
        ]
    }

    proptest! {
        #[test]
        fn prop_populate_outputs_is_idempotent(
            value in "[0-9.tfTF]{1,12}",
            format in format_strategy(),
        ) {
            let raw = HashMap::from([("OUT".to_string(), value)]);
            let declared = vec![Variable::output("OUT").with_format(format)];
            if let Ok(first) = populate_outputs(&raw, &declared) {
                let second = populate_outputs(&raw, &first).unwrap();
                prop_assert_eq!(first, second);
            }
        }
    }
}
