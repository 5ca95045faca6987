//! Sequential stage execution
//!
//! Steps of a stage run strictly in declaration order: a step may consume
//! the outputs of any earlier step, so there is no parallelism within a
//! stage. The first failing step stops the stage.

use std::collections::HashSet;
use std::fmt;

use crate::pipeline::{GlobalEnv, PipelineError, PipelineResult, Step, Task};

use super::resolver::StageOutputs;
use super::step::{StageContext, StepExecutor, StepOutcome};
use super::traits::ScriptRequest;

/// First failing step of a stage and its error
#[derive(Debug, Clone)]
pub struct StageFailure {
    /// The failed step, with whatever inputs were resolved
    pub step: Step,
    /// Why it failed
    pub error: PipelineError,
}

impl StageFailure {
    /// Converts into the stage-level error reported to the orchestrator
    #[must_use]
    pub fn into_error(self, stage: impl fmt::Display) -> PipelineError {
        PipelineError::StageFailed {
            stage: stage.to_string(),
            step: self.step.name,
            error: self.error.to_string(),
        }
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step '{}' failed: {}", self.step.name, self.error)
    }
}

/// Runs the steps of one stage
#[derive(Clone, Copy)]
pub struct StageRunner<'a> {
    executor: StepExecutor<'a>,
}

impl<'a> StageRunner<'a> {
    /// Creates a runner over `executor`
    #[must_use]
    pub fn new(executor: StepExecutor<'a>) -> Self {
        Self { executor }
    }

    /// Runs `steps` in order and returns the accumulated outputs
    ///
    /// Skipped steps leave no entry in the returned map.
    ///
    /// # Errors
    ///
    /// Returns the first failing step together with its error. Later steps
    /// are not executed.
    pub fn run(
        &self,
        ctx: StageContext<'_>,
        steps: &mut [Step],
    ) -> Result<StageOutputs, StageFailure> {
        let mut outputs = StageOutputs::new();
        tracing::debug!(stage = %ctx.stage, steps = steps.len(), "Starting stage");

        for (position, step) in steps.iter_mut().enumerate() {
            let result = match self.executor.execute(ctx, position, step, &outputs) {
                Ok(StepOutcome::Completed(vars)) => outputs.record(step.index, vars),
                Ok(StepOutcome::Skipped) => Ok(()),
                Err(e) => Err(e),
            };

            if let Err(error) = result {
                tracing::error!(stage = %ctx.stage, step = %step.name, error = %error, "Step failed");
                return Err(StageFailure {
                    step: step.clone(),
                    error,
                });
            }
        }

        Ok(outputs)
    }

    /// Runs legacy tasks through the shell collaborator
    ///
    /// Tasks carry only a literal script; the global environment is their
    /// whole environment. A task whose name already ran is skipped.
    /// Every task that was started, including a failing one, is appended
    /// to `executed` in order.
    ///
    /// # Errors
    ///
    /// Returns the first task failure.
    pub fn run_tasks(
        &self,
        tasks: &[Task],
        global: &GlobalEnv,
        executed: &mut Vec<Task>,
    ) -> PipelineResult {
        let workspace = self.executor.workspace();
        workspace.reset_process_dir()?;

        let env = global
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<std::collections::HashMap<_, _>>();
        let mut seen = HashSet::new();

        for (position, task) in tasks.iter().enumerate() {
            if !seen.insert(task.name.as_str()) {
                tracing::warn!(task = %task.name, "Duplicate task already ran, ignoring");
                continue;
            }
            tracing::info!(task = %task.name, "Running task");
            executed.push(task.clone());

            let request = ScriptRequest {
                workdir: workspace.process_dir().to_path_buf(),
                cwd: workspace.source_dir().to_path_buf(),
                script_id: format!("stage-{position}"),
                script: task.script.clone(),
                env: env.clone(),
                output_names: Vec::new(),
            };
            self.executor
                .shell()
                .run_script(&request)
                .map_err(|e| PipelineError::StepExecution {
                    step: task.name.clone(),
                    reason: e.to_string(),
                })?;
        }

        Ok(())
    }
}
