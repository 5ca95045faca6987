//! Artifact archive and upload

use std::fs;
use std::path::Path;

use crate::executor::{ShellCommand, ShellConfig, Workspace, copy_recursive};
use crate::pipeline::{Phase, PipelineError, PipelineResult, Task, WorkflowRequest};

use super::collaborators::BlobStorage;

/// Archive name used when the request does not set one
pub const DEFAULT_ARCHIVE_NAME: &str = "job-artifact.zip";

/// End-of-central-directory record of a zip with no entries
const EMPTY_ZIP: [u8; 22] = [
    0x50, 0x4b, 0x05, 0x06, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
];

/// Zips the staging directory and uploads the archive
///
/// Returns `false` without doing anything when the storage module is not
/// configured. An empty staging directory still uploads an empty archive.
///
/// # Errors
///
/// Returns a [`Phase::ArtifactUpload`] error if zipping or the upload
/// fails.
pub fn zip_and_upload(
    storage: &dyn BlobStorage,
    request: &WorkflowRequest,
    workspace: &Workspace,
) -> PipelineResult<bool> {
    if !request.blob_storage.storage_module_configured {
        tracing::info!("Storage module not configured, skipping artifact upload");
        return Ok(false);
    }
    let name = archive_name(request);
    let archive = workspace.root().join(&name);
    let zipped = if workspace.artifacts_empty()? {
        // zip refuses empty input
        tracing::info!("No artifacts staged, uploading an empty archive");
        fs::write(&archive, EMPTY_ZIP).map_err(PipelineError::from)
    } else {
        let config = ShellConfig {
            cwd: workspace.artifacts_dir().to_path_buf(),
            streaming: false,
            ..ShellConfig::default()
        };
        let command = format!("zip -r {} .", shell_words::quote(&archive.to_string_lossy()));
        ShellCommand::new(&config).execute(&command).map(|_| ())
    };
    zipped.map_err(|e| PipelineError::infrastructure(Phase::ArtifactUpload, e))?;

    storage.upload(&request.blob_storage, &archive, &name)?;
    tracing::info!(archive = %name, "Artifacts uploaded");
    Ok(true)
}

fn archive_name(request: &WorkflowRequest) -> String {
    Path::new(&request.ci_artifact_file_name)
        .file_name()
        .map_or_else(
            || DEFAULT_ARCHIVE_NAME.to_string(),
            |n| n.to_string_lossy().to_string(),
        )
}

/// Stages the output of executed legacy tasks
///
/// Each task's `output_location`, resolved against the checkout, is copied
/// to `artifacts/<task name>/`. Tasks without one, or whose output does not
/// exist, are skipped. Returns how many outputs were staged.
///
/// # Errors
///
/// Returns [`PipelineError::Io`] if a copy fails.
pub fn collect_task_artifacts(tasks: &[Task], workspace: &Workspace) -> PipelineResult<usize> {
    let mut staged = 0;
    for task in tasks.iter().filter(|t| !t.output_location.is_empty()) {
        let src = workspace.source_path(&task.output_location);
        if !src.exists() {
            tracing::info!(task = %task.name, path = %task.output_location, "Task output not found, skipping");
            continue;
        }
        let file_name = src
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        copy_recursive(&src, &workspace.artifact_path(&task.name, &file_name))?;
        staged += 1;
    }
    Ok(staged)
}
