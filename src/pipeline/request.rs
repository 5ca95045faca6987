//! Trigger event model
//!
//! The upstream control plane hands the runner one [`TriggerEvent`] per
//! invocation. Only the fields the engine consumes are modelled; unknown
//! fields are ignored.

#![allow(clippy::must_use_candidate, clippy::struct_excessive_bools)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::errors::PipelineError;
use super::steps::Step;
use super::types::StageType;

/// Kind of pipeline an event triggers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    /// Continuous integration build
    Ci,
    /// CI job without an image build contract
    Job,
    /// Pre or post deployment stage
    Cd,
}

impl EventType {
    /// Events that run through the CI orchestrator
    pub fn is_ci_like(self) -> bool {
        matches!(self, Self::Ci | Self::Job)
    }

    /// Events whose image may be handed to the scanner
    pub fn is_scan_eligible(self) -> bool {
        matches!(self, Self::Ci)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ci => write!(f, "CI"),
            Self::Job => write!(f, "JOB"),
            Self::Cd => write!(f, "CD"),
        }
    }
}

/// Top-level event handed to the runner
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerEvent {
    /// Event kind
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Pipeline description and credentials
    pub workflow_request: WorkflowRequest,
}

impl TriggerEvent {
    /// Parses an event from its JSON form
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Io`] carrying the serde message when the
    /// document or one of its steps or variables is malformed.
    pub fn from_json(raw: &str) -> Result<Self, PipelineError> {
        serde_json::from_str(raw).map_err(|e| PipelineError::Io(format!("invalid trigger event: {e}")))
    }
}

/// How the artifact is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildType {
    /// Dockerfile lives in the checked out sources
    #[default]
    SelfDockerfile,
    /// Dockerfile content is supplied by configuration
    ManagedDockerfile,
    /// No artifact build at all
    SkipBuild,
}

/// Pipeline flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineType {
    /// Regular CI pipeline
    #[default]
    Normal,
    /// Job pipeline without source material
    #[serde(rename = "CI_JOB")]
    Job,
}

/// Container build options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DockerBuildConfig {
    /// Path of the Dockerfile relative to the checkout
    pub dockerfile_path: String,
    /// Dockerfile body for managed builds
    pub dockerfile_content: String,
    /// Comma separated target platforms
    pub target_platform: String,
    /// Build arguments
    pub args: BTreeMap<String, String>,
    /// Use a multi-platform builder
    pub buildx: bool,
}

/// Artifact build settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildConfig {
    /// Build flavour
    #[serde(rename = "type")]
    pub build_type: BuildType,
    /// Container build options
    pub docker_build_config: DockerBuildConfig,
}

/// One source repository to check out
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectDetails {
    /// Clone URL
    pub git_repository: String,
    /// Directory the repository is checked out into
    pub checkout_path: String,
    /// Branch, tag or other source selector
    pub source_value: String,
    /// Commit to check out
    pub commit_hash: String,
}

impl ProjectDetails {
    /// Repository name derived from the clone URL
    pub fn repo_name(&self) -> &str {
        let last = self.git_repository.rsplit('/').next().unwrap_or_default();
        last.split('.').next().unwrap_or_default()
    }
}

/// Reusable plugin definition
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefPluginDefinition {
    /// Plugin id referenced by REF_PLUGIN steps
    pub id: u32,
    /// Steps the plugin expands to
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// Blob storage settings for artifact archives
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageConfig {
    /// Whether artifact upload is enabled at all
    pub storage_module_configured: bool,
    /// Bucket or container name
    pub bucket: String,
    /// Key prefix inside the bucket
    pub prefix: String,
}

/// Image produced by CI, consumed by CD
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CiArtifact {
    /// Image reference
    pub image: String,
    /// Content digest
    pub image_digest: String,
}

/// Legacy CD task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Task {
    /// Task name, unique per run
    pub name: String,
    /// Script body
    pub script: String,
    /// Path collected as artifact when the task ran
    pub output_location: String,
}

/// Legacy stage group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskGroup {
    /// Tasks run before deployment
    pub before_stages: Vec<Task>,
    /// Tasks run after deployment
    pub after_stages: Vec<Task>,
}

/// Legacy stage YAML document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskYaml {
    /// Document version
    pub version: String,
    /// Stage groups in execution order
    pub cd_pipeline_conf: Vec<TaskGroup>,
}

impl TaskYaml {
    /// Parses the legacy stage YAML
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Io`] when the document is not valid YAML.
    pub fn parse(raw: &str) -> Result<Self, PipelineError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).map_err(|e| PipelineError::Io(format!("invalid stage yaml: {e}")))
    }

    /// All tasks in execution order, before tasks first within each group
    pub fn tasks(&self) -> Vec<Task> {
        self.cd_pipeline_conf
            .iter()
            .flat_map(|group| group.before_stages.iter().chain(&group.after_stages))
            .cloned()
            .collect()
    }
}

/// Pipeline description and credentials carried by an event
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkflowRequest {
    /// Pipeline id
    pub pipeline_id: i64,
    /// Id of the user that triggered the run
    pub triggered_by: i64,
    /// Application name
    pub app_name: String,
    /// Commit author that triggered the run
    pub trigger_by_author: String,
    /// Tag of the image to build
    pub docker_image_tag: String,
    /// Repository of the image to build
    pub docker_repository: String,
    /// Registry URL, may carry a scheme
    #[serde(rename = "dockerRegistryURL")]
    pub docker_registry_url: String,
    /// Registry id
    pub docker_registry_id: String,
    /// Registry user
    pub docker_username: String,
    /// Registry password
    pub docker_password: String,
    /// Cloud region
    pub aws_region: String,
    /// Cloud access key
    pub access_key: String,
    /// Cloud secret key
    pub secret_key: String,
    /// Repositories to check out
    pub ci_project_details: Vec<ProjectDetails>,
    /// Artifact build settings; absent means no build
    pub ci_build_config: Option<BuildConfig>,
    /// Pipeline flavour
    pub ci_pipeline_type: PipelineType,
    /// Steps run before the build
    pub pre_ci_steps: Vec<Step>,
    /// Steps run after the build
    pub post_ci_steps: Vec<Step>,
    /// Structured deployment stage steps
    pub pre_post_deploy_steps: Vec<Step>,
    /// Scope of the deployment stage steps
    pub stage_type: Option<StageType>,
    /// Reusable plugin definitions
    pub ref_plugins: Vec<RefPluginDefinition>,
    /// Extra push attempts after the first
    pub image_retry_count: u32,
    /// Seconds between push attempts
    pub image_retry_interval: u64,
    /// Whether the image is scanned after the build
    pub scan_enabled: bool,
    /// Scanner attempts
    pub image_scan_max_retries: u32,
    /// Seconds between scanner attempts
    pub image_scan_retry_delay: u64,
    /// Name of the uploaded artifact archive
    pub ci_artifact_file_name: String,
    /// Blob storage settings
    pub blob_storage: StorageConfig,
    /// Run was started outside the control plane
    pub is_ext_run: bool,
    /// Suppress the completion event
    pub is_dry_run: bool,
    /// User supplied variables merged into the global environment
    pub extra_environment_variables: BTreeMap<String, String>,
    /// Destination images per registry
    pub registry_destination_image_map: BTreeMap<String, Vec<String>>,
    /// Credentials per registry
    pub registry_credential_map: BTreeMap<String, serde_json::Value>,
    /// Image built by CI, for CD events
    #[serde(rename = "ciArtifactDTO")]
    pub ci_artifact: CiArtifact,
    /// Deployment release counter
    pub deployment_release_counter: i64,
    /// Workflow runner id
    pub workflow_runner_id: i64,
    /// User that triggered the deployment
    pub deployment_triggered_by: String,
    /// Time the deployment was triggered
    pub deployment_trigger_time: Option<DateTime<Utc>>,
    /// Legacy stage YAML
    pub stage_yaml: String,
    /// Time the polling plugin last fetched artifacts
    pub ci_artifact_last_fetch: Option<DateTime<Utc>>,
}

impl WorkflowRequest {
    /// True when the run has no source material to check out
    pub fn is_job(&self) -> bool {
        self.ci_pipeline_type == PipelineType::Job
    }

    /// Build flavour, `SkipBuild` when no build config is present
    pub fn build_type(&self) -> BuildType {
        self.ci_build_config
            .as_ref()
            .map_or(BuildType::SkipBuild, |c| c.build_type)
    }

    /// True when the build uses a multi-platform builder
    pub fn is_buildx(&self) -> bool {
        self.ci_build_config
            .as_ref()
            .is_some_and(|c| c.docker_build_config.buildx)
    }

    /// Checkout path of the first project, the build context
    pub fn checkout_root(&self) -> &str {
        self.ci_project_details
            .first()
            .map_or("", |p| p.checkout_path.as_str())
    }

    /// Registry URL with its scheme, if any, stripped
    pub fn registry_host(&self) -> &str {
        let registry = self.docker_registry_url.trim_end_matches('/');
        match url::Url::parse(registry) {
            Ok(parsed) => registry
                .strip_prefix(&format!("{}://", parsed.scheme()))
                .unwrap_or(registry),
            Err(_) => registry,
        }
    }

    /// Destination image reference, `host/repository:tag`
    pub fn image_path(&self) -> String {
        format!(
            "{}/{}:{}",
            self.registry_host(),
            self.docker_repository,
            self.docker_image_tag
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ci_event() {
        let json = r#"{
            "type": "CI",
            "workflowRequest": {
                "pipelineId": 12,
                "dockerRegistryURL": "https://registry.example.com",
                "dockerRepository": "team/app",
                "dockerImageTag": "abc123",
                "ciBuildConfig": {
                    "type": "managed-dockerfile",
                    "dockerBuildConfig": {"dockerfileContent": "FROM scratch", "buildx": true}
                },
                "preCiSteps": [{"name": "lint", "index": 1, "script": "true"}],
                "refPlugins": [{"id": 3, "steps": []}],
                "imageRetryCount": 2
            }
        }"#;
        let event = TriggerEvent::from_json(json).unwrap();
        assert_eq!(event.event_type, EventType::Ci);
        let request = &event.workflow_request;
        assert_eq!(request.pipeline_id, 12);
        assert_eq!(request.build_type(), BuildType::ManagedDockerfile);
        assert!(request.is_buildx());
        assert_eq!(request.pre_ci_steps.len(), 1);
        assert_eq!(request.ref_plugins[0].id, 3);
        assert_eq!(request.image_retry_count, 2);
    }

    #[test]
    fn test_missing_build_config_skips_build() {
        let request = WorkflowRequest::default();
        assert_eq!(request.build_type(), BuildType::SkipBuild);
        assert!(!request.is_buildx());
    }

    #[test]
    fn test_job_pipeline_type() {
        let json = r#"{"type": "JOB", "workflowRequest": {"ciPipelineType": "CI_JOB"}}"#;
        let event = TriggerEvent::from_json(json).unwrap();
        assert!(event.workflow_request.is_job());
        assert!(event.event_type.is_ci_like());
        assert!(!event.event_type.is_scan_eligible());
    }

    #[test]
    fn test_image_path_strips_scheme() {
        let mut request = WorkflowRequest {
            docker_registry_url: "https://registry.example.com/".to_string(),
            docker_repository: "team/app".to_string(),
            docker_image_tag: "v1".to_string(),
            ..WorkflowRequest::default()
        };
        assert_eq!(request.image_path(), "registry.example.com/team/app:v1");

        request.docker_registry_url = "localhost:5000".to_string();
        assert_eq!(request.image_path(), "localhost:5000/team/app:v1");
    }

    #[test]
    fn test_repo_name() {
        let project = ProjectDetails {
            git_repository: "https://github.com/acme/widgets.git".to_string(),
            ..ProjectDetails::default()
        };
        assert_eq!(project.repo_name(), "widgets");
    }

    #[test]
    fn test_task_yaml_order() {
        let yaml = r"
version: '0.0.1'
cdPipelineConf:
  - beforeStages:
      - name: a
        script: echo a
    afterStages:
      - name: b
        script: echo b
";
        let tasks = TaskYaml::parse(yaml).unwrap().tasks();
        let names: Vec<_> = tasks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_invalid_event_is_error() {
        assert!(TriggerEvent::from_json("{not json").is_err());
    }
}
