//! Collaborator contracts of the orchestrators
//!
//! Everything outside step execution is reached through these traits:
//! source checkout, the container daemon, blob storage, the build cache,
//! completion notifications and image scanning. The default adapters live
//! in `crate::infrastructure`; tests substitute recording fakes.

use serde::Serialize;
use std::path::Path;

use crate::executor::{ConditionEvaluator, ContainerRunner, ShellRunner};
use crate::infrastructure::PipelineMetrics;
use crate::pipeline::{PipelineResult, ProjectDetails, StageType, StorageConfig, WorkflowRequest};

/// Source control checkout
pub trait SourceControl: Send + Sync {
    /// Clones every project under `dest` and checks out its revision
    fn clone_and_checkout(&self, projects: &[ProjectDetails], dest: &Path) -> PipelineResult;
}

/// Container daemon and image operations
pub trait ContainerEngine: Send + Sync {
    /// Makes sure a daemon is running
    fn start_daemon(&self, request: &WorkflowRequest) -> PipelineResult;

    /// Stops a daemon started by [`ContainerEngine::start_daemon`]
    fn stop_daemon(&self) -> PipelineResult;

    /// Logs in to the request's registry
    fn login(&self, request: &WorkflowRequest) -> PipelineResult;

    /// Builds the artifact from the checkout under `source_dir` and returns
    /// the destination image reference
    fn build_artifact(&self, request: &WorkflowRequest, source_dir: &Path)
    -> PipelineResult<String>;

    /// Pushes `image` to its registry
    fn push_artifact(&self, image: &str) -> PipelineResult;

    /// Returns the content digest of `image`
    fn extract_digest(&self, image: &str, buildx: bool) -> PipelineResult<String>;
}

/// Blob storage for artifact archives
pub trait BlobStorage: Send + Sync {
    /// Uploads the file at `local` under `remote_key`
    fn upload(&self, config: &StorageConfig, local: &Path, remote_key: &str) -> PipelineResult;
}

/// Build cache synchronization
pub trait CacheStore: Send + Sync {
    /// Restores the build cache before the run
    fn pull(&self, request: &WorkflowRequest) -> PipelineResult;

    /// Saves the build cache after a successful run
    fn push(&self, request: &WorkflowRequest) -> PipelineResult;
}

/// Completion events for the control plane
pub trait EventNotifier: Send + Sync {
    /// Reports the outcome of a CI run
    fn send_ci_event(&self, event: &CiCompletionEvent) -> PipelineResult;

    /// Reports the outcome of a CD run
    fn send_cd_event(&self, event: &CdCompletionEvent) -> PipelineResult;
}

/// Vulnerability scanning of built images
pub trait ImageScanner: Send + Sync {
    /// Requests a scan of the image in `event`
    fn scan(&self, event: &ScanEvent) -> PipelineResult;
}

/// Outcome of a CI run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CiCompletionEvent {
    /// Pipeline that ran
    pub pipeline_id: i64,
    /// User that triggered it
    pub triggered_by: i64,
    /// Destination image, empty when no build ran
    pub image: String,
    /// Image digest, empty when not extracted
    pub digest: String,
    /// Phase timings gathered so far
    pub metrics: PipelineMetrics,
    /// True once the artifact archive was uploaded
    pub artifact_uploaded: bool,
    /// Human readable reason, `None` on success
    pub failure_reason: Option<String>,
    /// Contents of the plugin results file
    pub plugin_results: Option<serde_json::Value>,
    /// Run was triggered outside the control plane
    pub is_ext_run: bool,
}

impl CiCompletionEvent {
    /// True when the event reports a failure
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.failure_reason.is_some()
    }
}

/// Outcome of a CD run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CdCompletionEvent {
    /// Runner that executed the stage
    pub workflow_runner_id: i64,
    /// Pipeline the stage belongs to
    pub pipeline_id: i64,
    /// Pre or post deploy
    pub stage_type: Option<StageType>,
    /// User that triggered the deployment
    pub triggered_by: String,
    /// Human readable reason, `None` on success
    pub failure_reason: Option<String>,
}

impl CdCompletionEvent {
    /// Event for `request`, failed when `failure_reason` is set
    #[must_use]
    pub fn new(request: &WorkflowRequest, failure_reason: Option<String>) -> Self {
        Self {
            workflow_runner_id: request.workflow_runner_id,
            pipeline_id: request.pipeline_id,
            stage_type: request.stage_type,
            triggered_by: request.deployment_triggered_by.clone(),
            failure_reason,
        }
    }
}

/// Scan request for a pushed image
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanEvent {
    /// Image reference
    pub image: String,
    /// Image digest
    pub image_digest: String,
    /// Pipeline that built the image
    pub pipeline_id: i64,
    /// User that triggered the build
    pub user_id: i64,
    /// Registry the image lives in
    pub docker_registry_id: String,
    /// Scanner retry budget
    pub image_scan_max_retries: u32,
    /// Seconds between scanner retries
    pub image_scan_retry_delay: u64,
}

impl ScanEvent {
    /// Scan request for `image@digest` built by `request`
    #[must_use]
    pub fn new(request: &WorkflowRequest, image: &str, digest: &str) -> Self {
        Self {
            image: image.to_string(),
            image_digest: digest.to_string(),
            pipeline_id: request.pipeline_id,
            user_id: request.triggered_by,
            docker_registry_id: request.docker_registry_id.clone(),
            image_scan_max_retries: request.image_scan_max_retries,
            image_scan_retry_delay: request.image_scan_retry_delay,
        }
    }
}

/// Every collaborator an orchestrator needs
#[derive(Clone, Copy)]
#[allow(missing_docs)]
pub struct Collaborators<'a> {
    pub source: &'a dyn SourceControl,
    pub engine: &'a dyn ContainerEngine,
    pub storage: &'a dyn BlobStorage,
    pub cache: &'a dyn CacheStore,
    pub notifier: &'a dyn EventNotifier,
    pub scanner: &'a dyn ImageScanner,
    pub shell: &'a dyn ShellRunner,
    pub container: &'a dyn ContainerRunner,
    pub conditions: &'a dyn ConditionEvaluator,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_event_payload() {
        let request = WorkflowRequest {
            pipeline_id: 4,
            triggered_by: 9,
            docker_registry_id: "ecr".to_string(),
            image_scan_max_retries: 3,
            ..WorkflowRequest::default()
        };
        let event = ScanEvent::new(&request, "registry/app:1", "sha256:abc");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["imageDigest"], "sha256:abc");
        assert_eq!(json["userId"], 9);
        assert_eq!(json["imageScanMaxRetries"], 3);
    }

    #[test]
    fn test_cd_event_carries_failure() {
        let request = WorkflowRequest {
            workflow_runner_id: 11,
            stage_type: Some(StageType::Post),
            ..WorkflowRequest::default()
        };
        let event = CdCompletionEvent::new(&request, Some("POST task failed: smoke".to_string()));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["workflowRunnerId"], 11);
        assert_eq!(json["stageType"], "POST");
        assert_eq!(json["failureReason"], "POST task failed: smoke");
    }
}
