//! Per-timestep records produced by rollout collection.

use std::collections::HashMap;

use crate::AgentId;

/// Action taken by one agent at one timestep.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Index into a discrete action set.
    Discrete(i64),
    /// Real-valued action vector.
    Continuous(Vec<f32>),
}

/// Everything recorded for one agent at one timestep.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentStep {
    /// Observation seen by the agent.
    pub observation: Vec<f32>,
    /// Action taken.
    pub action: Action,
    /// Reward obtained.
    pub reward: f32,
    /// Log-probability of `action` under the acting policy.
    pub logprob: f32,
    /// Whether this step ended the episode.
    pub done: bool,
    /// Recurrent state at this step (empty for feed-forward agents).
    pub state: Vec<f32>,
    /// Ground-truth skill value of the other agent.
    pub tom: Vec<f32>,
}

/// One timestep: a sub-record per agent.
pub type TimeStep = HashMap<AgentId, AgentStep>;

/// Time-ordered rollout data for all agents.
pub type GlobalDataBatch = Vec<TimeStep>;
