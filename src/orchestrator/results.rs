//! Plugin results file
//!
//! Pre-CI plugins may leave a JSON document at a well-known path. Its
//! absence is normal; an unreadable or malformed file is reported as an
//! error so the caller can log it distinctly.

use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

/// Problems with a results file that exists
#[derive(Debug, Error)]
pub enum ResultsError {
    /// The file exists but could not be read
    #[error("cannot read plugin results: {0}")]
    Io(#[from] io::Error),

    /// The file is not valid JSON
    #[error("malformed plugin results: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Reads the results file at `path`
///
/// # Errors
///
/// Returns [`ResultsError::Io`] if the file exists but cannot be read and
/// [`ResultsError::Malformed`] if it does not hold JSON.
pub fn read_plugin_results(path: &Path) -> Result<Option<serde_json::Value>, ResultsError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_str(&content)?))
}
