//! Core types for pipeline domain
//!
//! This module contains the fundamental enums shared by the executor
//! and the orchestrators: stage scopes, lifecycle phases and the
//! process exit signal.

#![allow(clippy::must_use_candidate)]

use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::PipelineError;

/// Result type for pipeline operations
pub type PipelineResult<T = ()> = std::result::Result<T, PipelineError>;

/// Variable scope a group of steps runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageType {
    /// Steps before the artifact build (or pre-deploy)
    #[serde(rename = "PRE")]
    Pre,
    /// Steps after the artifact build (or post-deploy)
    #[serde(rename = "POST")]
    Post,
    /// Sub-steps of an expanded referenced plugin
    #[serde(rename = "REF_PLUGIN")]
    RefPlugin,
}

impl fmt::Display for StageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pre => write!(f, "PRE"),
            Self::Post => write!(f, "POST"),
            Self::RefPlugin => write!(f, "REF_PLUGIN"),
        }
    }
}

/// Infrastructure phases of the CI and CD lifecycles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Build cache download
    CachePull,
    /// Source checkout
    Checkout,
    /// Container daemon start
    DaemonStart,
    /// Registry login
    Login,
    /// Global environment construction
    Environment,
    /// Managed Dockerfile generation
    Dockerfile,
    /// Plugin definition validation
    PluginValidation,
    /// Artifact build
    Build,
    /// Image push
    Push,
    /// Digest extraction
    Digest,
    /// Artifact archive upload
    ArtifactUpload,
    /// Image vulnerability scan
    Scan,
    /// Build cache upload
    CachePush,
    /// Container daemon stop
    DaemonStop,
    /// Legacy stage YAML parsing
    StageYaml,
}

impl Phase {
    /// Human readable failure message handed to the notification collaborator
    pub fn failure_message(self) -> String {
        format!("{self} failed")
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::CachePull => "Cache download",
            Self::Checkout => "Git checkout",
            Self::DaemonStart => "Docker daemon start",
            Self::Login => "Docker login",
            Self::Environment => "Environment setup",
            Self::Dockerfile => "Dockerfile generation",
            Self::PluginValidation => "Plugin validation",
            Self::Build => "Docker build",
            Self::Push => "Docker push",
            Self::Digest => "Digest extraction",
            Self::ArtifactUpload => "Artifact upload",
            Self::Scan => "Image scan",
            Self::CachePush => "Cache upload",
            Self::DaemonStop => "Docker daemon stop",
            Self::StageYaml => "Stage YAML parsing",
        };
        f.write_str(label)
    }
}

/// Process-level outcome of one pipeline invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Pipeline completed
    Success,
    /// Infrastructure or generic failure
    Failure,
    /// A step inside a stage failed
    StepFailure,
}

impl ExitStatus {
    /// Numeric exit code
    pub fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::StepFailure => 2,
        }
    }

    /// Returns true if the pipeline completed
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl From<&PipelineError> for ExitStatus {
    fn from(err: &PipelineError) -> Self {
        if err.is_step_failure() {
            Self::StepFailure
        } else {
            Self::Failure
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "SUCCESS"),
            Self::Failure => write!(f, "FAILURE"),
            Self::StepFailure => write!(f, "STEP_FAILURE"),
        }
    }
}

/// Trait for types that can be validated
#[allow(clippy::missing_errors_doc)]
pub trait Validate {
    /// Type of validation error
    type Error;

    /// Validates this type
    fn validate(&self) -> std::result::Result<(), Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct() {
        assert_eq!(ExitStatus::Success.code(), 0);
        assert_eq!(ExitStatus::Failure.code(), 1);
        assert_eq!(ExitStatus::StepFailure.code(), 2);
    }

    #[test]
    fn test_exit_status_from_error() {
        let step = PipelineError::StageFailed {
            stage: "POST".to_string(),
            step: "notify".to_string(),
            error: "boom".to_string(),
        };
        assert_eq!(ExitStatus::from(&step), ExitStatus::StepFailure);

        let infra = PipelineError::infrastructure(Phase::Checkout, "auth");
        assert_eq!(ExitStatus::from(&infra), ExitStatus::Failure);
    }

    #[test]
    fn test_phase_failure_message() {
        assert_eq!(Phase::Build.failure_message(), "Docker build failed");
        assert_eq!(Phase::Push.failure_message(), "Docker push failed");
        assert_eq!(Phase::Scan.failure_message(), "Image scan failed");
    }

    #[test]
    fn test_stage_type_serde() {
        let json = serde_json::to_string(&StageType::Post).unwrap();
        assert_eq!(json, r#""POST""#);
        let parsed: StageType = serde_json::from_str(r#""REF_PLUGIN""#).unwrap();
        assert_eq!(parsed, StageType::RefPlugin);
    }
}
