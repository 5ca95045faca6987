//! Logging configuration
//!
//! Installs the global tracing subscriber. `RUST_LOG` takes precedence over
//! the configured level.

use tracing_subscriber::{EnvFilter, fmt};

/// Initializes logging with the specified level
///
/// Returns false when a global subscriber was already installed, which
/// happens when several runs share one process.
pub fn init_logging(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_twice_is_harmless() {
        init_logging("debug");
        assert!(!init_logging("info"));
    }
}
