//! Rollout data as collected (time-major, per agent) and as trained on
//! (per agent, per field).

pub mod record;
pub mod transpose;

pub use record::{Action, AgentStep, GlobalDataBatch, TimeStep};
pub use transpose::{transpose_batch, untranspose, ActionKind, AgentDataBatch};
