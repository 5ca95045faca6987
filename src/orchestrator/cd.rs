//! CD lifecycle
//!
//! Structured pre/post-deploy steps run through the stage runner; requests
//! without them fall back to the legacy task list from the stage YAML.

use crate::executor::{StageContext, StageRunner, StepExecutor, Workspace};
use crate::pipeline::env::{DEST, DIGEST};
use crate::pipeline::{
    ExitStatus, GlobalEnv, Phase, PipelineError, PipelineResult, StageType, Task, TaskYaml,
    TriggerEvent, WorkflowRequest,
};

use super::artifacts::{collect_task_artifacts, zip_and_upload};
use super::collaborators::{CdCompletionEvent, Collaborators};
use super::{RunSettings, as_notification_error, as_phase_error};

/// Drives CD events
#[derive(Clone, Copy)]
pub struct CdOrchestrator<'a> {
    collab: Collaborators<'a>,
    settings: &'a RunSettings,
}

impl<'a> CdOrchestrator<'a> {
    /// Creates an orchestrator over `collab`
    #[must_use]
    pub fn new(collab: Collaborators<'a>, settings: &'a RunSettings) -> Self {
        Self { collab, settings }
    }

    /// Runs the CD lifecycle for `event` inside `workspace`
    pub fn handle(&self, event: &TriggerEvent, workspace: &Workspace) -> ExitStatus {
        let request = &event.workflow_request;
        let mut executed = Vec::new();
        let outcome = self.run_stages(event, workspace, &mut executed);
        let upload = self.collect_and_upload(request, workspace, &executed);

        if let Err(error) = outcome {
            if let Err(e) = upload {
                tracing::warn!(error = %e, "Artifact upload failed");
            }
            return ExitStatus::from(&error);
        }

        match upload {
            Err(e) if !request.is_ext_run => {
                tracing::error!(error = %e, "Artifact upload failed");
                ExitStatus::Failure
            }
            Err(e) => {
                tracing::warn!(error = %e, "Artifact upload failed, ignored for external run");
                ExitStatus::Success
            }
            Ok(()) => {
                tracing::info!(workflow_runner_id = request.workflow_runner_id, "CD stage finished");
                ExitStatus::Success
            }
        }
    }

    fn run_stages(
        &self,
        event: &TriggerEvent,
        workspace: &Workspace,
        executed: &mut Vec<Task>,
    ) -> PipelineResult {
        let request = &event.workflow_request;
        let stage = request.stage_type.unwrap_or(StageType::Pre);
        tracing::info!(workflow_runner_id = request.workflow_runner_id, stage = %stage, "Starting CD stage");

        let plugins = request
            .plugin_registry()
            .map_err(|e| self.fail(request, Phase::PluginValidation, e.into()))?;

        if request.is_job() {
            tracing::info!("Job pipeline, skipping checkout");
        } else {
            self.collab
                .source
                .clone_and_checkout(&request.ci_project_details, workspace.source_dir())
                .map_err(|e| self.fail(request, Phase::Checkout, e))?;
        }

        self.collab
            .engine
            .start_daemon(request)
            .map_err(|e| self.fail(request, Phase::DaemonStart, e))?;
        self.collab
            .engine
            .login(request)
            .map_err(|e| self.fail(request, Phase::Login, e))?;

        let global = GlobalEnv::from_event(
            event,
            workspace.source_dir(),
            &self.settings.scanner_endpoint,
        )
        .map_err(|e| self.fail(request, Phase::Environment, e))?;

        let runner = StageRunner::new(StepExecutor::new(
            self.collab.shell,
            self.collab.container,
            self.collab.conditions,
            &plugins,
            workspace,
        ));

        if request.pre_post_deploy_steps.is_empty() {
            let yaml = TaskYaml::parse(&request.stage_yaml)
                .map_err(|e| self.fail(request, Phase::StageYaml, e))?;
            if let Err(e) = runner.run_tasks(&yaml.tasks(), &global, executed) {
                let task = executed.last().map(|t| t.name.clone()).unwrap_or_default();
                let reason = format!("{stage} task failed: {task}");
                let error = PipelineError::StageFailed {
                    stage: stage.to_string(),
                    step: task,
                    error: e.to_string(),
                };
                return Err(self.fail_with(request, reason, error));
            }
        } else {
            let env = global
                .with(DEST, request.ci_artifact.image.as_str())
                .with(DIGEST, request.ci_artifact.image_digest.as_str());
            let mut steps = request.pre_post_deploy_steps.clone();
            if let Err(failure) = runner.run(StageContext::new(stage, &env), &mut steps) {
                let reason = format!("{stage} task failed: {}", failure.step.name);
                return Err(self.fail_with(request, reason, failure.into_error(stage)));
            }
        }

        if request.is_dry_run {
            tracing::info!("Dry run, completion event not sent");
        } else {
            self.collab
                .notifier
                .send_cd_event(&CdCompletionEvent::new(request, None))
                .map_err(as_notification_error)?;
        }

        self.collab
            .engine
            .stop_daemon()
            .map_err(|e| as_phase_error(Phase::DaemonStop, e))
    }

    /// Stages legacy task outputs if needed, then zips and uploads
    fn collect_and_upload(
        &self,
        request: &WorkflowRequest,
        workspace: &Workspace,
        executed: &[Task],
    ) -> PipelineResult {
        if request.pre_post_deploy_steps.is_empty() {
            let staged = collect_task_artifacts(executed, workspace)?;
            tracing::debug!(staged, "Collected task outputs");
        }
        zip_and_upload(self.collab.storage, request, workspace).map(|_| ())
    }

    fn fail(&self, request: &WorkflowRequest, phase: Phase, error: PipelineError) -> PipelineError {
        self.fail_with(request, phase.failure_message(), as_phase_error(phase, error))
    }

    /// Sends the failure event unless this is a dry run
    fn fail_with(
        &self,
        request: &WorkflowRequest,
        reason: String,
        error: PipelineError,
    ) -> PipelineError {
        tracing::error!(reason = %reason, error = %error, "CD stage failed");
        if request.is_dry_run {
            return error;
        }
        match self
            .collab
            .notifier
            .send_cd_event(&CdCompletionEvent::new(request, Some(reason)))
        {
            Ok(()) => error,
            Err(e) => {
                tracing::error!(error = %e, "Failed to send failure event");
                as_notification_error(e)
            }
        }
    }
}
