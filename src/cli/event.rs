//! Trigger event loading

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use cirunner::pipeline::TriggerEvent;

/// Environment variable holding the trigger event JSON
pub const EVENT_ENV: &str = "CI_CD_EVENT";

/// Loads the trigger event from `path`, or from [`EVENT_ENV`] when no path
/// is given
pub fn load_event(path: Option<&Path>) -> Result<TriggerEvent> {
    let raw = match path {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read event file {}", path.display()))?,
        None => std::env::var(EVENT_ENV)
            .with_context(|| format!("No --event given and {EVENT_ENV} is not set"))?,
    };
    parse_event(&raw)
}

/// Parses a trigger event document
pub fn parse_event(raw: &str) -> Result<TriggerEvent> {
    let event = TriggerEvent::from_json(raw)?;
    tracing::info!(
        event = %event.event_type,
        pipeline_id = event.workflow_request.pipeline_id,
        "Loaded trigger event"
    );
    Ok(event)
}
