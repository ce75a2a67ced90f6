//! Feed-forward agent with policy, value, and optional skill-model heads.

use tch::{nn, nn::Module, Device, Kind, Tensor};

use super::{Agent, Evaluation, PolicyOutput};
use crate::batch::{ActionKind, AgentDataBatch};
use crate::error::{PpoError, Result};

/// Layer sizes for an [`MlpAgent`].
#[derive(Debug, Clone, PartialEq)]
pub struct MlpAgentConfig {
    /// Observation width.
    pub obs_dim: usize,
    /// Number of discrete actions.
    pub action_dim: usize,
    /// Hidden layer widths of the shared body.
    pub hidden: Vec<usize>,
    /// Width of the skill-model head; `None` builds no head.
    pub skill_dim: Option<usize>,
}

impl MlpAgentConfig {
    /// Two hidden layers of 64 units, no skill head.
    pub fn new(obs_dim: usize, action_dim: usize) -> Self {
        Self {
            obs_dim,
            action_dim,
            hidden: vec![64, 64],
            skill_dim: None,
        }
    }

    /// Sets the hidden layer widths.
    pub fn with_hidden(mut self, hidden: Vec<usize>) -> Self {
        self.hidden = hidden;
        self
    }

    /// Adds a skill-model head predicting a `skill_dim`-wide vector.
    pub fn with_skill_dim(mut self, skill_dim: usize) -> Self {
        self.skill_dim = Some(skill_dim);
        self
    }
}

/// MLP agent over discrete actions.
///
/// Architecture: `obs_dim → hidden... (tanh)` shared body feeding a
/// log-softmax policy head, a scalar value head and, optionally, a linear
/// skill-model head.
pub struct MlpAgent {
    obs_dim: i64,
    action_dim: i64,
    vs: nn::VarStore,
    body: nn::Sequential,
    policy_head: nn::Linear,
    value_head: nn::Linear,
    skill_head: Option<nn::Linear>,
}

impl MlpAgent {
    /// Creates a freshly initialized agent on `device`.
    pub fn new(config: &MlpAgentConfig, device: Device) -> Self {
        let vs = nn::VarStore::new(device);
        let p = &vs.root();

        let mut body = nn::seq();
        let mut in_dim = config.obs_dim as i64;
        for (i, &width) in config.hidden.iter().enumerate() {
            body = body
                .add(nn::linear(
                    p / format!("body{i}"),
                    in_dim,
                    width as i64,
                    Default::default(),
                ))
                .add_fn(|x| x.tanh());
            in_dim = width as i64;
        }

        let policy_head = nn::linear(
            p / "policy",
            in_dim,
            config.action_dim as i64,
            Default::default(),
        );
        let value_head = nn::linear(p / "value", in_dim, 1, Default::default());
        let skill_head = config
            .skill_dim
            .map(|dim| nn::linear(p / "skill", in_dim, dim as i64, Default::default()));

        Self {
            obs_dim: config.obs_dim as i64,
            action_dim: config.action_dim as i64,
            vs,
            body,
            policy_head,
            value_head,
            skill_head,
        }
    }

    /// Log-probabilities over actions for a batch of observations.
    pub fn action_log_probs(&self, observations: &Tensor) -> Tensor {
        let features = self.body.forward(&observations.to_kind(Kind::Float));
        self.policy_head
            .forward(&features)
            .log_softmax(-1, Kind::Float)
    }

    /// Samples an action for a single observation.
    ///
    /// Returns the action and its log-probability, computed without
    /// gradients.
    pub fn sample_action(&self, observation: &[f32]) -> (i64, f32) {
        tch::no_grad(|| {
            let obs = Tensor::from_slice(observation)
                .unsqueeze(0)
                .to_device(self.vs.device());
            let log_probs = self.action_log_probs(&obs);
            let action = log_probs.exp().multinomial(1, true);
            let log_prob = log_probs.gather(-1, &action, false);
            (action.int64_value(&[0, 0]), log_prob.double_value(&[0, 0]) as f32)
        })
    }
}

impl Agent for MlpAgent {
    fn evaluate(&self, batch: &AgentDataBatch, _padded: bool) -> Result<Evaluation> {
        if batch.action_kind != ActionKind::Discrete {
            return Err(PpoError::Shape(format!(
                "MlpAgent needs discrete actions, got {:?}",
                batch.action_kind
            )));
        }

        let obs_width = batch.observations.size().last().copied().unwrap_or(0);
        if obs_width != self.obs_dim {
            return Err(PpoError::Shape(format!(
                "MlpAgent expects observations of width {}, got {obs_width}",
                self.obs_dim
            )));
        }
        if batch.actions.numel() > 0 {
            let lowest = batch.actions.min().int64_value(&[]);
            let highest = batch.actions.max().int64_value(&[]);
            if lowest < 0 || highest >= self.action_dim {
                return Err(PpoError::Shape(format!(
                    "MlpAgent has {} actions, batch holds indices in {lowest}..={highest}",
                    self.action_dim
                )));
            }
        }

        let features = self.body.forward(&batch.observations.to_kind(Kind::Float));
        let log_probs = self
            .policy_head
            .forward(&features)
            .log_softmax(-1, Kind::Float);
        let log_prob = log_probs
            .gather(-1, &batch.actions.unsqueeze(-1), false)
            .squeeze_dim(-1);
        let entropy =
            -(log_probs.exp() * &log_probs).sum_dim_intlist([-1].as_slice(), false, Kind::Float);
        let value = self.value_head.forward(&features).squeeze_dim(-1);

        let output = PolicyOutput {
            log_prob,
            value,
            entropy,
        };
        Ok(match &self.skill_head {
            Some(head) => Evaluation::WithSkill(output, head.forward(&features)),
            None => Evaluation::Policy(output),
        })
    }

    fn supports_skill_model(&self) -> bool {
        self.skill_head.is_some()
    }

    fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    fn var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.vs
    }
}
