//! `cirunner validate` - check a trigger event without running it

use anyhow::{Context, Result};

use cirunner::pipeline::{TriggerEvent, Validate};

/// Validates plugin references and step definitions of `event`
pub fn validate_event(event: &TriggerEvent) -> Result<()> {
    let request = &event.workflow_request;
    request
        .validate()
        .context("Trigger event failed validation")?;

    println!(
        "{} event is valid: {} pre-CI, {} post-CI, {} deploy steps, {} plugins",
        event.event_type,
        request.pre_ci_steps.len(),
        request.post_ci_steps.len(),
        request.pre_post_deploy_steps.len(),
        request.ref_plugins.len(),
    );
    Ok(())
}
