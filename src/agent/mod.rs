//! Agent capability contract consumed by the optimizer.

pub mod device;
pub mod mlp;

use tch::{nn, Device, Tensor};

use crate::batch::AgentDataBatch;
use crate::error::Result;

pub use device::DevicePlacement;
pub use mlp::{MlpAgent, MlpAgentConfig};

/// Policy and value outputs for every step of a batch.
///
/// All three tensors share the leading dims of the batch's rewards.
#[derive(Debug)]
pub struct PolicyOutput {
    /// Log-probability of the recorded action under the current policy.
    pub log_prob: Tensor,
    /// State value estimate.
    pub value: Tensor,
    /// Entropy of the action distribution.
    pub entropy: Tensor,
}

/// Result of re-evaluating an agent on a batch.
#[derive(Debug)]
pub enum Evaluation {
    /// Policy and value heads only.
    Policy(PolicyOutput),
    /// Policy and value heads plus a skill-model prediction shaped like the
    /// batch's `toms`.
    WithSkill(PolicyOutput, Tensor),
}

impl Evaluation {
    /// Policy and value outputs, regardless of skill support.
    pub fn policy(&self) -> &PolicyOutput {
        match self {
            Evaluation::Policy(out) | Evaluation::WithSkill(out, _) => out,
        }
    }

    /// Skill-model prediction, if the agent produced one.
    pub fn skill_prediction(&self) -> Option<&Tensor> {
        match self {
            Evaluation::Policy(_) => None,
            Evaluation::WithSkill(_, skill) => Some(skill),
        }
    }
}

/// A trainable agent: a parameterized model the optimizer can re-evaluate
/// and step.
pub trait Agent {
    /// Re-evaluates the recorded actions in `batch` with gradients enabled.
    ///
    /// `padded` tells the agent whether `batch` uses the `[L, E, ...]`
    /// layout.
    fn evaluate(&self, batch: &AgentDataBatch, padded: bool) -> Result<Evaluation>;

    /// Whether [`evaluate`](Agent::evaluate) returns [`Evaluation::WithSkill`].
    fn supports_skill_model(&self) -> bool {
        false
    }

    /// Variable store holding every trainable parameter.
    fn var_store(&self) -> &nn::VarStore;

    /// Mutable access to the variable store.
    fn var_store_mut(&mut self) -> &mut nn::VarStore;

    /// Device the parameters currently live on.
    fn device(&self) -> Device {
        self.var_store().device()
    }

    /// Moves all parameters to `device`.
    fn set_device(&mut self, device: Device) {
        if self.device() != device {
            self.var_store_mut().set_device(device);
        }
    }
}
