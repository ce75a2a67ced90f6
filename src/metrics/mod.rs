//! Per-agent training metrics.
//!
//! Every key is prefixed with the agent id (`<agent>/<metric>`), so the
//! metrics of all agents share one flat map.

mod analyzer;
mod sink;
mod stats;

use std::collections::BTreeMap;

pub use analyzer::{split_episodes, Episode, EpisodeAnalyzer, TerminalRewardRatios};
#[cfg(feature = "tensorboard")]
pub use sink::TensorBoardSink;
pub use sink::{ConsoleSink, MetricSink, SinkError};
pub use stats::{Spread, Summary};

/// Flat metric map, keyed `<agent>/<metric>`.
pub type TrainingMetrics = BTreeMap<String, f64>;

/// Builds the prefixed metrics of a single agent.
pub(crate) struct AgentMetrics<'a> {
    agent: &'a str,
    metrics: TrainingMetrics,
}

impl<'a> AgentMetrics<'a> {
    pub(crate) fn new(agent: &'a str) -> Self {
        Self {
            agent,
            metrics: TrainingMetrics::new(),
        }
    }

    pub(crate) fn record(&mut self, name: &str, value: f64) {
        self.metrics.insert(format!("{}/{name}", self.agent), value);
    }

    /// Records `<prefix>_{mean,median,min,max,std}`; nothing when `values` is empty.
    pub(crate) fn record_summary(&mut self, prefix: &str, values: &[f64], spread: Spread) {
        if let Some(summary) = Summary::of(values) {
            for (suffix, value) in summary.entries(spread) {
                self.record(&format!("{prefix}_{suffix}"), value);
            }
        }
    }

    pub(crate) fn finish(self) -> TrainingMetrics {
        self.metrics
    }
}
