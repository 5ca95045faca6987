//! Metrics collection
//!
//! Phase timings of one CI run, reported with the completion event.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Timed phases of a CI run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricPhase {
    /// Build cache download
    CachePull,
    /// Pre-CI steps
    PreCi,
    /// Artifact build
    Build,
    /// Post-CI steps
    PostCi,
    /// Whole run
    Total,
}

/// Start time and duration of one phase
///
/// Both fields are write-once: the first `start` and the first `finish`
/// win, so a phase that is re-entered keeps its original timing.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseTiming {
    /// When the phase started
    pub start_time: Option<DateTime<Utc>>,
    /// Seconds the phase took
    pub duration_secs: Option<f64>,
}

impl PhaseTiming {
    fn start(&mut self) {
        if self.start_time.is_none() {
            self.start_time = Some(Utc::now());
        }
    }

    fn finish(&mut self) {
        if self.duration_secs.is_some() {
            return;
        }
        if let Some(start) = self.start_time {
            let elapsed = Utc::now() - start;
            #[allow(clippy::cast_precision_loss)]
            let secs = elapsed.num_milliseconds() as f64 / 1000.0;
            self.duration_secs = Some(secs);
        }
    }
}

/// Metrics for a pipeline execution
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineMetrics {
    /// Build cache download
    pub cache_pull: PhaseTiming,
    /// Pre-CI steps
    pub pre_ci: PhaseTiming,
    /// Artifact build
    pub build: PhaseTiming,
    /// Post-CI steps
    pub post_ci: PhaseTiming,
    /// Whole run
    pub total: PhaseTiming,
}

impl PipelineMetrics {
    /// Creates empty metrics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the start of `phase` unless already recorded
    pub fn start(&mut self, phase: MetricPhase) {
        self.timing_mut(phase).start();
    }

    /// Records the duration of `phase` unless already recorded
    ///
    /// Finishing a phase that never started records nothing.
    pub fn finish(&mut self, phase: MetricPhase) {
        self.timing_mut(phase).finish();
    }

    /// Timing of `phase`
    #[must_use]
    pub fn timing(&self, phase: MetricPhase) -> &PhaseTiming {
        match phase {
            MetricPhase::CachePull => &self.cache_pull,
            MetricPhase::PreCi => &self.pre_ci,
            MetricPhase::Build => &self.build,
            MetricPhase::PostCi => &self.post_ci,
            MetricPhase::Total => &self.total,
        }
    }

    fn timing_mut(&mut self, phase: MetricPhase) -> &mut PhaseTiming {
        match phase {
            MetricPhase::CachePull => &mut self.cache_pull,
            MetricPhase::PreCi => &mut self.pre_ci,
            MetricPhase::Build => &mut self.build,
            MetricPhase::PostCi => &mut self.post_ci,
            MetricPhase::Total => &mut self.total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_start_empty() {
        let metrics = PipelineMetrics::new();
        assert!(metrics.timing(MetricPhase::Total).start_time.is_none());
        assert!(metrics.timing(MetricPhase::Build).duration_secs.is_none());
    }

    #[test]
    fn test_timings_are_write_once() {
        let mut metrics = PipelineMetrics::new();
        metrics.start(MetricPhase::Build);
        let first = metrics.timing(MetricPhase::Build).start_time;
        metrics.start(MetricPhase::Build);
        assert_eq!(metrics.timing(MetricPhase::Build).start_time, first);

        metrics.finish(MetricPhase::Build);
        let duration = metrics.timing(MetricPhase::Build).duration_secs;
        assert!(duration.is_some());
        metrics.finish(MetricPhase::Build);
        assert_eq!(metrics.timing(MetricPhase::Build).duration_secs, duration);
    }

    #[test]
    fn test_finish_without_start_records_nothing() {
        let mut metrics = PipelineMetrics::new();
        metrics.finish(MetricPhase::PostCi);
        assert!(metrics.timing(MetricPhase::PostCi).duration_secs.is_none());
    }

    #[test]
    fn test_metrics_serialize_camel_case() {
        let json = serde_json::to_value(PipelineMetrics::new()).unwrap();
        assert!(json.get("cachePull").is_some());
        assert!(json["preCi"].get("durationSecs").is_some());
    }
}
