//! CI lifecycle
//!
//! Cache pull, checkout, daemon start, pre-CI steps, build, push and
//! digest, post-CI steps, artifact upload, optional scan, completion event
//! and daemon stop. Every fatal path sends exactly one failure event before
//! the error is returned.

use std::fs;
use std::time::Duration;

use crate::executor::{StageContext, StageOutputs, StageRunner, StepExecutor, Workspace, contained};
use crate::infrastructure::{MetricPhase, PipelineMetrics};
use crate::pipeline::env::{BUILD_SUCCESS, DEST, DIGEST};
use crate::pipeline::{
    BuildType, EventType, ExitStatus, GlobalEnv, Phase, PipelineError, PipelineResult,
    StageType, Step, TriggerEvent, WorkflowRequest,
};

use super::artifacts::zip_and_upload;
use super::collaborators::{CiCompletionEvent, Collaborators, ScanEvent};
use super::results::{ResultsError, read_plugin_results};
use super::{RunSettings, as_phase_error, as_notification_error};

/// State accumulated over one CI run, reported with the completion event
#[derive(Debug, Default)]
struct CiRun {
    metrics: PipelineMetrics,
    image: String,
    digest: String,
    uploaded: bool,
    plugin_results: Option<serde_json::Value>,
}

/// Drives CI and JOB events
#[derive(Clone, Copy)]
pub struct CiOrchestrator<'a> {
    collab: Collaborators<'a>,
    settings: &'a RunSettings,
}

impl<'a> CiOrchestrator<'a> {
    /// Creates an orchestrator over `collab`
    #[must_use]
    pub fn new(collab: Collaborators<'a>, settings: &'a RunSettings) -> Self {
        Self { collab, settings }
    }

    /// Runs the CI lifecycle for `event` inside `workspace`
    pub fn handle(&self, event: &TriggerEvent, workspace: &Workspace) -> ExitStatus {
        let request = &event.workflow_request;
        let mut run = CiRun::default();
        let outcome = self.run_stages(event, workspace, &mut run);

        let upload = if run.uploaded {
            Ok(())
        } else {
            zip_and_upload(self.collab.storage, request, workspace).map(|uploaded| {
                run.uploaded = uploaded;
            })
        };

        if let Err(error) = outcome {
            if let Err(e) = upload {
                tracing::warn!(error = %e, "Artifact upload failed");
            }
            return ExitStatus::from(&error);
        }

        if let Err(e) = upload {
            if request.is_ext_run {
                tracing::warn!(error = %e, "Artifact upload failed, ignored for external run");
            } else {
                tracing::error!(error = %e, "Artifact upload failed");
                return ExitStatus::Failure;
            }
        }

        if event.event_type == EventType::Ci {
            if let Err(e) = self.collab.cache.push(request) {
                if request.is_ext_run {
                    tracing::warn!(error = %e, "Cache upload failed, ignored for external run");
                } else {
                    tracing::error!(error = %e, "Cache upload failed");
                    return ExitStatus::Failure;
                }
            }
        }

        tracing::info!(pipeline_id = request.pipeline_id, "CI pipeline finished");
        ExitStatus::Success
    }

    fn run_stages(
        &self,
        event: &TriggerEvent,
        workspace: &Workspace,
        run: &mut CiRun,
    ) -> PipelineResult {
        let request = &event.workflow_request;
        run.metrics.start(MetricPhase::Total);
        tracing::info!(pipeline_id = request.pipeline_id, event = %event.event_type, "Starting CI pipeline");

        let plugins = request
            .plugin_registry()
            .map_err(|e| self.fail(request, run, Phase::PluginValidation, e.into()))?;

        run.metrics.start(MetricPhase::CachePull);
        let pulled = self.collab.cache.pull(request);
        run.metrics.finish(MetricPhase::CachePull);
        pulled.map_err(|e| self.fail(request, run, Phase::CachePull, e))?;

        if request.is_job() {
            tracing::info!("Job pipeline, skipping checkout");
        } else {
            self.collab
                .source
                .clone_and_checkout(&request.ci_project_details, workspace.source_dir())
                .map_err(|e| self.fail(request, run, Phase::Checkout, e))?;
        }

        self.collab
            .engine
            .start_daemon(request)
            .map_err(|e| self.fail(request, run, Phase::DaemonStart, e))?;

        let global = GlobalEnv::from_event(
            event,
            workspace.source_dir(),
            &self.settings.scanner_endpoint,
        )
        .map_err(|e| self.fail(request, run, Phase::Environment, e))?;

        if request.build_type() == BuildType::ManagedDockerfile {
            write_managed_dockerfile(request, workspace)
                .map_err(|e| self.fail(request, run, Phase::Dockerfile, e))?;
        }

        let runner = StageRunner::new(StepExecutor::new(
            self.collab.shell,
            self.collab.container,
            self.collab.conditions,
            &plugins,
            workspace,
        ));

        let pre_outputs = self.run_pre_ci(&runner, request, &global, run)?;
        self.load_plugin_results(run);

        if request.build_type() == BuildType::SkipBuild {
            tracing::info!("Build skipped");
        } else {
            self.build(&runner, request, workspace, &global, &pre_outputs, run)?;
        }

        if !request.post_ci_steps.is_empty() {
            let env = global
                .with(BUILD_SUCCESS, "true")
                .with(DEST, run.image.as_str())
                .with(DIGEST, run.digest.as_str());
            let mut steps = request.post_ci_steps.clone();

            run.metrics.start(MetricPhase::PostCi);
            let result = runner.run(
                StageContext::new(StageType::Post, &env).with_pre_ci(Some(&pre_outputs)),
                &mut steps,
            );
            run.metrics.finish(MetricPhase::PostCi);

            if let Err(failure) = result {
                let reason = format!("Post-CI task failed: {}", failure.step.name);
                return Err(self.fail_with(request, run, reason, failure.into_error(StageType::Post)));
            }
        }

        match zip_and_upload(self.collab.storage, request, workspace) {
            Ok(uploaded) => run.uploaded = uploaded,
            Err(e) => tracing::warn!(error = %e, "Artifact upload failed, retrying after the run"),
        }

        if event.event_type.is_scan_eligible() && request.scan_enabled {
            let scan = ScanEvent::new(request, &run.image, &run.digest);
            self.collab
                .scanner
                .scan(&scan)
                .map_err(|e| self.fail(request, run, Phase::Scan, e))?;
        }

        run.metrics.finish(MetricPhase::Total);
        let completed = completion_event(request, run, None);
        self.collab
            .notifier
            .send_ci_event(&completed)
            .map_err(as_notification_error)?;

        self.collab
            .engine
            .stop_daemon()
            .map_err(|e| as_phase_error(Phase::DaemonStop, e))
    }

    fn run_pre_ci(
        &self,
        runner: &StageRunner<'_>,
        request: &WorkflowRequest,
        global: &GlobalEnv,
        run: &mut CiRun,
    ) -> PipelineResult<StageOutputs> {
        if request.pre_ci_steps.is_empty() {
            return Ok(StageOutputs::new());
        }

        let mut steps = request.pre_ci_steps.clone();
        run.metrics.start(MetricPhase::PreCi);
        let result = runner.run(StageContext::new(StageType::Pre, global), &mut steps);
        run.metrics.finish(MetricPhase::PreCi);

        result.map_err(|failure| {
            let reason = format!("Pre-CI task failed: {}", failure.step.name);
            self.fail_with(request, run, reason, failure.into_error(StageType::Pre))
        })
    }

    fn build(
        &self,
        runner: &StageRunner<'_>,
        request: &WorkflowRequest,
        workspace: &Workspace,
        global: &GlobalEnv,
        pre_outputs: &StageOutputs,
        run: &mut CiRun,
    ) -> PipelineResult {
        self.collab
            .engine
            .login(request)
            .map_err(|e| self.fail(request, run, Phase::Login, e))?;

        run.metrics.start(MetricPhase::Build);
        let built = self
            .collab
            .engine
            .build_artifact(request, workspace.source_dir());
        run.metrics.finish(MetricPhase::Build);

        match built {
            Ok(dest) => run.image = dest,
            Err(e) => {
                Self::run_fail_safe_post_steps(runner, request, global, pre_outputs);
                return Err(self.fail(request, run, Phase::Build, e));
            }
        }

        let buildx = request.is_buildx();
        if !buildx {
            self.push_with_retry(request, &run.image)
                .map_err(|e| self.fail(request, run, Phase::Push, e))?;
        }
        let digest = self
            .collab
            .engine
            .extract_digest(&run.image, buildx)
            .map_err(|e| self.fail(request, run, Phase::Digest, e))?;
        tracing::info!(image = %run.image, digest = %digest, "Image ready");
        run.digest = digest;
        Ok(())
    }

    /// Runs post-CI steps flagged to run when the build failed
    ///
    /// Their own failures are logged; the build error is what gets
    /// reported.
    fn run_fail_safe_post_steps(
        runner: &StageRunner<'_>,
        request: &WorkflowRequest,
        global: &GlobalEnv,
        pre_outputs: &StageOutputs,
    ) {
        let mut steps: Vec<Step> = request
            .post_ci_steps
            .iter()
            .filter(|s| s.run_on_parent_failure)
            .cloned()
            .collect();
        if steps.is_empty() {
            return;
        }

        tracing::info!(steps = steps.len(), "Running post-CI steps after build failure");
        let env = global.with(BUILD_SUCCESS, "false");
        let ctx = StageContext::new(StageType::Post, &env).with_pre_ci(Some(pre_outputs));
        if let Err(failure) = runner.run(ctx, &mut steps) {
            tracing::warn!(step = %failure.step.name, error = %failure.error, "Post-CI step after build failure failed");
        }
    }

    /// Pushes `image`, retrying `image_retry_count` times
    fn push_with_retry(&self, request: &WorkflowRequest, image: &str) -> PipelineResult {
        let attempts = request.image_retry_count.saturating_add(1);
        let interval = Duration::from_secs(request.image_retry_interval);
        let mut last = PipelineError::infrastructure(Phase::Push, "no push attempted");

        for attempt in 1..=attempts {
            match self.collab.engine.push_artifact(image) {
                Ok(()) => {
                    tracing::info!(image, attempt, "Image pushed");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(image, attempt, attempts, error = %e, "Image push failed");
                    last = e;
                    if attempt < attempts && !interval.is_zero() {
                        std::thread::sleep(interval);
                    }
                }
            }
        }
        Err(as_phase_error(Phase::Push, last))
    }

    fn load_plugin_results(&self, run: &mut CiRun) {
        let path = &self.settings.results_file;
        match read_plugin_results(path) {
            Ok(Some(results)) => {
                tracing::info!(path = %path.display(), "Loaded plugin results");
                run.plugin_results = Some(results);
            }
            Ok(None) => tracing::debug!(path = %path.display(), "No plugin results file"),
            Err(ResultsError::Malformed(e)) => {
                tracing::warn!(path = %path.display(), error = %e, "Plugin results file is malformed, ignoring");
            }
            Err(ResultsError::Io(e)) => {
                tracing::warn!(path = %path.display(), error = %e, "Plugin results file is unreadable, ignoring");
            }
        }
    }

    fn fail(
        &self,
        request: &WorkflowRequest,
        run: &CiRun,
        phase: Phase,
        error: PipelineError,
    ) -> PipelineError {
        self.fail_with(
            request,
            run,
            phase.failure_message(),
            as_phase_error(phase, error),
        )
    }

    /// Sends the failure event for `error` and returns the error to raise
    fn fail_with(
        &self,
        request: &WorkflowRequest,
        run: &CiRun,
        reason: String,
        error: PipelineError,
    ) -> PipelineError {
        tracing::error!(reason = %reason, error = %error, "CI pipeline failed");
        let event = completion_event(request, run, Some(reason));
        match self.collab.notifier.send_ci_event(&event) {
            Ok(()) => error,
            Err(e) => {
                tracing::error!(error = %e, "Failed to send failure event");
                as_notification_error(e)
            }
        }
    }
}

fn completion_event(
    request: &WorkflowRequest,
    run: &CiRun,
    failure_reason: Option<String>,
) -> CiCompletionEvent {
    let mut metrics = run.metrics.clone();
    metrics.finish(MetricPhase::Total);
    CiCompletionEvent {
        pipeline_id: request.pipeline_id,
        triggered_by: request.triggered_by,
        image: run.image.clone(),
        digest: run.digest.clone(),
        metrics,
        artifact_uploaded: run.uploaded,
        failure_reason,
        plugin_results: run.plugin_results.clone(),
        is_ext_run: request.is_ext_run,
    }
}

/// Writes the configured Dockerfile content into the build context
fn write_managed_dockerfile(request: &WorkflowRequest, workspace: &Workspace) -> PipelineResult {
    let content = request
        .ci_build_config
        .as_ref()
        .map(|c| c.docker_build_config.dockerfile_content.as_str())
        .unwrap_or_default();
    let dir = workspace.source_dir().join(contained(request.checkout_root()));
    fs::create_dir_all(&dir)?;
    fs::write(dir.join("Dockerfile"), content)?;
    tracing::info!(path = %dir.join("Dockerfile").display(), "Wrote managed Dockerfile");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{BuildConfig, DockerBuildConfig, ProjectDetails};
    use tempfile::TempDir;

    #[test]
    fn test_managed_dockerfile_lands_in_checkout() {
        let dir = TempDir::new().unwrap();
        let workspace = Workspace::create(dir.path()).unwrap();
        let request = WorkflowRequest {
            ci_project_details: vec![ProjectDetails {
                checkout_path: "./app".to_string(),
                ..ProjectDetails::default()
            }],
            ci_build_config: Some(BuildConfig {
                build_type: BuildType::ManagedDockerfile,
                docker_build_config: DockerBuildConfig {
                    dockerfile_content: "FROM alpine\n".to_string(),
                    ..DockerBuildConfig::default()
                },
            }),
            ..WorkflowRequest::default()
        };

        write_managed_dockerfile(&request, &workspace).unwrap();
        let written = fs::read_to_string(workspace.source_dir().join("app/Dockerfile")).unwrap();
        assert_eq!(written, "FROM alpine\n");
    }

    #[test]
    fn test_completion_event_finishes_total() {
        let mut run = CiRun::default();
        run.metrics.start(MetricPhase::Total);
        run.image = "reg/app:1".to_string();
        let event = completion_event(&WorkflowRequest::default(), &run, Some("Docker build failed".to_string()));
        assert!(event.is_failure());
        assert!(event.metrics.total.duration_secs.is_some());
        assert_eq!(event.image, "reg/app:1");
    }
}
