//! `cirunner run` - execute a trigger event with the default adapters

use anyhow::{Context, Result};
use std::time::Duration;

use cirunner::executor::{LocalShellRunner, Workspace};
use cirunner::infrastructure::{
    Config, DockerCli, GitCli, HttpNotifier, HttpScanner, LocalBlobStorage, NoopCache,
};
use cirunner::orchestrator::{Collaborators, RunSettings, handle_event};
use cirunner::pipeline::{ExitStatus, ExpressionEvaluator, TriggerEvent};

/// Runs `event` in a fresh workspace and returns the pipeline outcome
pub fn run_event(event: &TriggerEvent, config: &Config) -> Result<ExitStatus> {
    let docker =
        DockerCli::new().with_start_wait(Duration::from_secs(config.docker_start_wait_secs));
    let shell = LocalShellRunner::new(config.shell.as_str());
    let git = GitCli::new();
    let storage = LocalBlobStorage::new(config.blob_root.clone());
    let notifier = HttpNotifier::new(config.event_endpoint.as_str())?;
    let scanner = HttpScanner::new(&config.scanner_endpoint)?;

    let collab = Collaborators {
        source: &git,
        engine: &docker,
        storage: &storage,
        cache: &NoopCache,
        notifier: &notifier,
        scanner: &scanner,
        shell: &shell,
        container: &docker,
        conditions: &ExpressionEvaluator,
    };

    let workspace = Workspace::create(&config.workspace_root).with_context(|| {
        format!(
            "Failed to create workspace under {}",
            config.workspace_root.display()
        )
    })?;
    tracing::info!(workspace = %workspace.id(), root = %workspace.root().display(), "Workspace ready");

    let status = handle_event(collab, &RunSettings::from(config), event, &workspace);

    if let Err(e) = workspace.remove() {
        tracing::warn!(error = %e, "Failed to remove workspace");
    }
    Ok(status)
}
