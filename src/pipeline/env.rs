//! Global environment of one pipeline invocation
//!
//! Built once from the trigger event and never mutated. Phases that need
//! extra keys (`BUILD_SUCCESS`, `DEST`, `DIGEST`) derive a copy with
//! [`GlobalEnv::with`].

#![allow(clippy::must_use_candidate, clippy::return_self_not_must_use)]

use std::collections::BTreeMap;
use std::path::Path;

use super::errors::PipelineError;
use super::request::{EventType, TriggerEvent, WorkflowRequest};
use super::types::Phase;

/// Set to `true` or `false` for post-build steps
pub const BUILD_SUCCESS: &str = "BUILD_SUCCESS";
/// Destination image of the build
pub const DEST: &str = "DEST";
/// Digest of the built image
pub const DIGEST: &str = "DIGEST";

/// Read-only `name -> value` map visible to every step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalEnv {
    vars: BTreeMap<String, String>,
}

impl GlobalEnv {
    /// Builds the environment for `event`
    ///
    /// # Errors
    ///
    /// Returns an [`Phase::Environment`] infrastructure error if the registry
    /// maps cannot be serialized.
    pub fn from_event(
        event: &TriggerEvent,
        working_dir: &Path,
        scanner_endpoint: &str,
    ) -> Result<Self, PipelineError> {
        let request = &event.workflow_request;
        let mut vars = BTreeMap::new();
        vars.insert(
            "WORKING_DIRECTORY".to_string(),
            working_dir.display().to_string(),
        );

        if event.event_type == EventType::Cd {
            insert_cd_vars(&mut vars, request);
        } else {
            insert_ci_vars(&mut vars, request);
        }

        vars.insert("TRIGGERED_BY".to_string(), request.triggered_by.to_string());
        vars.insert(
            "DOCKER_REGISTRY_ID".to_string(),
            request.docker_registry_id.clone(),
        );
        vars.insert(
            "IMAGE_SCANNER_ENDPOINT".to_string(),
            scanner_endpoint.to_string(),
        );

        for (key, value) in &request.extra_environment_variables {
            vars.insert(key.clone(), value.clone());
        }

        let destinations = serde_json::to_string(&request.registry_destination_image_map)
            .map_err(|e| PipelineError::infrastructure(Phase::Environment, e))?;
        let credentials = serde_json::to_string(&request.registry_credential_map)
            .map_err(|e| PipelineError::infrastructure(Phase::Environment, e))?;
        vars.insert("REGISTRY_DESTINATION_IMAGE_MAP".to_string(), destinations);
        vars.insert("REGISTRY_CREDENTIALS".to_string(), credentials);

        Ok(Self { vars })
    }

    /// Builds an environment from explicit pairs
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Copy of this environment with `key` set to `value`
    pub fn with(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut vars = self.vars.clone();
        vars.insert(key.into(), value.into());
        Self { vars }
    }

    /// Value of `key`, if present
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// All entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.vars.iter()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Returns true if the environment is empty
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

fn insert_ci_vars(vars: &mut BTreeMap<String, String>, request: &WorkflowRequest) {
    let materials: String = request
        .ci_project_details
        .iter()
        .map(|p| {
            format!(
                "{},{},{},{}|",
                p.repo_name(),
                p.checkout_path,
                p.source_value,
                p.commit_hash
            )
        })
        .collect();

    let entries = [
        ("DOCKER_IMAGE_TAG", request.docker_image_tag.clone()),
        ("DOCKER_REPOSITORY", request.docker_repository.clone()),
        ("DOCKER_REGISTRY_URL", request.docker_registry_url.clone()),
        ("APP_NAME", request.app_name.clone()),
        ("TRIGGER_BY_AUTHOR", request.trigger_by_author.clone()),
        ("DOCKER_IMAGE", request.image_path()),
        ("GIT_MATERIAL_REQUEST", materials),
        ("ACCESS_KEY", request.access_key.clone()),
        ("SECRET_KEY", request.secret_key.clone()),
        ("AWS_REGION", request.aws_region.clone()),
        (
            "LAST_FETCHED_TIME",
            request
                .ci_artifact_last_fetch
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
        ),
        ("PIPELINE_ID", request.pipeline_id.to_string()),
    ];
    for (key, value) in entries {
        vars.insert(key.to_string(), value);
    }
}

fn insert_cd_vars(vars: &mut BTreeMap<String, String>, request: &WorkflowRequest) {
    let entries = [
        ("DOCKER_IMAGE", request.ci_artifact.image.clone()),
        (
            "DEPLOYMENT_RELEASE_ID",
            request.deployment_release_counter.to_string(),
        ),
        ("DEPLOYMENT_UNIQUE_ID", request.workflow_runner_id.to_string()),
        ("CD_TRIGGERED_BY", request.deployment_triggered_by.clone()),
        (
            "CD_TRIGGER_TIME",
            request
                .deployment_trigger_time
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
        ),
    ];
    for (key, value) in entries {
        vars.insert(key.to_string(), value);
    }
}
