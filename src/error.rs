use thiserror::Error;

use crate::AgentId;

/// Errors raised while preparing data for, or running, a PPO update.
#[derive(Debug, Error)]
pub enum PpoError {
    #[error("Malformed batch for agent `{agent}`: {problem} (field `{field}`, timestep {timestep:?})")]
    MalformedBatch {
        agent: AgentId,
        field: &'static str,
        timestep: Option<usize>,
        problem: String,
    },

    #[error("Unknown optimizer kind: {0}")]
    UnknownOptimizer(String),

    #[error("Unsupported configuration: {0}")]
    UnsupportedConfig(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Non-finite {quantity} for agent `{agent}` at PPO iteration {iteration}")]
    NumericDivergence {
        agent: AgentId,
        iteration: usize,
        quantity: &'static str,
    },

    #[error("Shape mismatch: {0}")]
    Shape(String),

    #[error(transparent)]
    Torch(#[from] tch::TchError),
}

impl PpoError {
    pub(crate) fn malformed(
        agent: &str,
        field: &'static str,
        timestep: Option<usize>,
        problem: impl Into<String>,
    ) -> Self {
        PpoError::MalformedBatch {
            agent: agent.to_string(),
            field,
            timestep,
            problem: problem.into(),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PpoError>;
