//! ppoptim - Proximal Policy Optimization for fixed sets of independent agents
//!
//! Takes batches of multi-agent interaction data, turns them into discounted
//! return targets and normalized advantages, and runs bounded clipped-surrogate
//! gradient steps per agent with KL-based early stopping.

pub mod agent;
pub mod batch;
pub mod config;
pub mod error;
pub mod metrics;
pub mod optim;
pub mod optimizer;
pub mod returns;
pub mod schedule;
pub mod sequence;
pub mod update;

pub use agent::{Agent, DevicePlacement, Evaluation, MlpAgent, MlpAgentConfig, PolicyOutput};
pub use batch::{
    transpose_batch, untranspose, Action, AgentDataBatch, AgentStep, GlobalDataBatch, TimeStep,
};
pub use config::{OptimizerKwargs, PpoConfig};
pub use error::{PpoError, Result};
pub use metrics::{ConsoleSink, EpisodeAnalyzer, MetricSink, TerminalRewardRatios, TrainingMetrics};
pub use optimizer::PpoOptimizer;
pub use schedule::EntropySchedule;
pub use update::{LoopState, UpdateOutcome};

/// Identifier of one trainable agent.
pub type AgentId = String;
