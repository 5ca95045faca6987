//! Pipeline orchestration
//!
//! The CI and CD lifecycles around step execution, written against the
//! collaborator traits in [`collaborators`].

mod artifacts;
mod cd;
mod ci;
pub mod collaborators;
mod results;

use std::path::PathBuf;

use crate::executor::Workspace;
use crate::infrastructure::Config;
use crate::pipeline::{EventType, ExitStatus, Phase, PipelineError, TriggerEvent};

pub use artifacts::{DEFAULT_ARCHIVE_NAME, collect_task_artifacts, zip_and_upload};
pub use cd::CdOrchestrator;
pub use ci::CiOrchestrator;
pub use collaborators::{
    BlobStorage, CacheStore, CdCompletionEvent, CiCompletionEvent, Collaborators,
    ContainerEngine, EventNotifier, ImageScanner, ScanEvent, SourceControl,
};
pub use results::{ResultsError, read_plugin_results};

/// Settings the orchestrators read besides the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    /// Plugin results file read after pre-CI
    pub results_file: PathBuf,
    /// Image scanner base URL, exported to steps
    pub scanner_endpoint: String,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for RunSettings {
    fn from(config: &Config) -> Self {
        Self {
            results_file: config.results_file.clone(),
            scanner_endpoint: config.scanner_endpoint.clone(),
        }
    }
}

/// Dispatches `event` to the CI or CD lifecycle
pub fn handle_event(
    collab: Collaborators<'_>,
    settings: &RunSettings,
    event: &TriggerEvent,
    workspace: &Workspace,
) -> ExitStatus {
    match event.event_type {
        EventType::Ci | EventType::Job => CiOrchestrator::new(collab, settings).handle(event, workspace),
        EventType::Cd => CdOrchestrator::new(collab, settings).handle(event, workspace),
    }
}

/// Attributes a collaborator error to `phase`
///
/// Errors that already name their category are kept as they are.
fn as_phase_error(phase: Phase, error: PipelineError) -> PipelineError {
    match error {
        PipelineError::Infrastructure { .. }
        | PipelineError::Validation(_)
        | PipelineError::Notification(_) => error,
        other => PipelineError::infrastructure(phase, other),
    }
}

fn as_notification_error(error: PipelineError) -> PipelineError {
    match error {
        PipelineError::Notification(_) => error,
        other => PipelineError::Notification(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_phase_error_wraps_plain_errors() {
        let wrapped = as_phase_error(Phase::Push, PipelineError::Io("denied".to_string()));
        assert_eq!(
            wrapped,
            PipelineError::Infrastructure {
                phase: Phase::Push,
                reason: "IO error: denied".to_string(),
            }
        );

        let kept = PipelineError::infrastructure(Phase::Build, "oom");
        assert_eq!(as_phase_error(Phase::Push, kept.clone()), kept);
    }

    #[test]
    fn test_run_settings_from_config() {
        let settings = RunSettings::default();
        assert_eq!(
            settings.results_file,
            PathBuf::from("/polling-plugin/results.json")
        );
    }
}
