//! Infrastructure layer
//!
//! Configuration, logging, metrics and the default adapters behind the
//! orchestrator's collaborator traits.

mod config;
pub mod container;
mod git;
mod http;
mod logging;
mod metrics;
mod storage;

pub use config::Config;
pub use container::{CONTAINER_PROCESS_DIR, DockerCli, parse_digest};
pub use git::GitCli;
pub use http::{HttpNotifier, HttpScanner};
pub use logging::init_logging;
pub use metrics::{MetricPhase, PhaseTiming, PipelineMetrics};
pub use storage::{LocalBlobStorage, NoopCache};
