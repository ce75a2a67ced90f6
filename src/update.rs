//! Clipped-surrogate PPO update loop for a single agent.

use tch::{nn, Kind, Tensor};
use tracing::debug;

use crate::agent::{Agent, Evaluation};
use crate::batch::AgentDataBatch;
use crate::error::{PpoError, Result};
use crate::optim::{clip_grad_norm, grad_norm};
use crate::returns::masked_mean;

/// State of the update loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Still iterating.
    Running,
    /// Stopped because the KL estimate exceeded the target.
    EarlyStopped,
    /// Ran the full step budget.
    Exhausted,
}

/// Inputs shared by every iteration, fixed before the loop starts.
#[derive(Debug)]
pub struct UpdateInputs<'a> {
    /// Prepared (possibly padded) agent batch.
    pub batch: &'a AgentDataBatch,
    /// Validity mask over the batch's leading dims.
    pub mask: &'a Tensor,
    /// Discounted return targets.
    pub returns: &'a Tensor,
    /// Normalized advantages (no gradient).
    pub advantages: &'a Tensor,
    /// Whether `batch` is padded.
    pub padded: bool,
}

/// Hyperparameters for one agent's update.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateSettings {
    /// Step budget.
    pub ppo_steps: usize,
    /// Clip parameter ε.
    pub eps: f64,
    /// KL limit for early stopping.
    pub target_kl: f64,
    /// Value loss weight.
    pub value_loss_coeff: f64,
    /// Entropy bonus weight for this training call.
    pub entropy_coeff: f64,
    /// Skill-model loss weight; `None` disables the auxiliary loss.
    pub sm_coeff: Option<f64>,
    /// Gradient norm cap.
    pub max_grad_norm: Option<f64>,
}

/// Masked means of the loss terms from the last applied step.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LossComponents {
    pub policy: f64,
    pub value: f64,
    pub sm: f64,
    pub total: f64,
}

/// What the loop did.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOutcome {
    /// Terminal state, `EarlyStopped` or `Exhausted`.
    pub state: LoopState,
    /// Gradient steps applied.
    pub steps_made: usize,
    /// KL estimate from the last evaluation.
    pub kl_divergence: f64,
    /// Loss terms of the last applied step (zeros if none was applied).
    pub losses: LossComponents,
    /// Masked mean entropy from the last evaluation.
    pub entropy: f64,
}

/// Loss tensor and its scalar components for one iteration.
struct Losses {
    total: Tensor,
    components: LossComponents,
}

/// Runs up to `settings.ppo_steps` gradient steps on `agent`.
///
/// Each iteration re-evaluates the agent, stops before stepping if the KL
/// estimate exceeds `settings.target_kl`, and otherwise applies one clipped
/// surrogate step. A non-finite loss or gradient norm aborts with
/// [`PpoError::NumericDivergence`] before the optimizer is stepped.
pub fn run_update(
    agent_id: &str,
    agent: &mut dyn Agent,
    optimizer: &mut nn::Optimizer,
    inputs: &UpdateInputs<'_>,
    settings: &UpdateSettings,
) -> Result<UpdateOutcome> {
    let mut state = if settings.ppo_steps == 0 {
        LoopState::Exhausted
    } else {
        LoopState::Running
    };
    let mut iteration = 0;
    let mut kl_divergence = 0.0;
    let mut entropy = 0.0;
    let mut losses = LossComponents::default();

    while state == LoopState::Running {
        let evaluation = agent.evaluate(inputs.batch, inputs.padded)?;
        check_shapes(
            agent_id,
            &evaluation,
            inputs.batch,
            inputs.mask,
            settings.sm_coeff.is_some(),
        )?;
        let output = evaluation.policy();

        kl_divergence =
            masked_mean(&(&inputs.batch.logprobs - &output.log_prob), inputs.mask).double_value(&[]);
        entropy = masked_mean(&output.entropy, inputs.mask).double_value(&[]);
        if kl_divergence > settings.target_kl {
            debug!(
                agent = agent_id,
                iteration, kl_divergence, "KL target exceeded, stopping early"
            );
            state = LoopState::EarlyStopped;
            continue;
        }

        let step = compute_losses(agent_id, &evaluation, inputs, settings)?;
        if !step.components.total.is_finite() {
            return Err(PpoError::NumericDivergence {
                agent: agent_id.to_string(),
                iteration,
                quantity: "loss",
            });
        }

        optimizer.zero_grad();
        step.total.backward();
        let variables = agent.var_store().trainable_variables();
        let norm = match settings.max_grad_norm {
            Some(max_norm) => clip_grad_norm(&variables, max_norm),
            None => grad_norm(&variables),
        };
        if !norm.is_finite() {
            return Err(PpoError::NumericDivergence {
                agent: agent_id.to_string(),
                iteration,
                quantity: "gradient norm",
            });
        }
        optimizer.step();

        losses = step.components;
        debug!(
            agent = agent_id,
            iteration,
            kl_divergence,
            loss = losses.total,
            grad_norm = norm,
            "PPO step"
        );

        iteration += 1;
        if iteration >= settings.ppo_steps {
            state = LoopState::Exhausted;
        }
    }

    Ok(UpdateOutcome {
        state,
        steps_made: iteration,
        kl_divergence,
        losses,
        entropy,
    })
}

/// Checks an evaluation against the batch layout.
///
/// With `skill_targets` set, a skill prediction must match the shape of
/// `batch.toms` exactly.
pub(crate) fn check_shapes(
    agent_id: &str,
    evaluation: &Evaluation,
    batch: &AgentDataBatch,
    mask: &Tensor,
    skill_targets: bool,
) -> Result<()> {
    let expected = mask.size();
    let output = evaluation.policy();
    for (name, tensor) in [
        ("log_prob", &output.log_prob),
        ("value", &output.value),
        ("entropy", &output.entropy),
    ] {
        if tensor.size() != expected {
            return Err(PpoError::Shape(format!(
                "agent `{agent_id}` returned {name} of shape {:?}, expected {expected:?}",
                tensor.size()
            )));
        }
    }

    if skill_targets {
        if let Some(prediction) = evaluation.skill_prediction() {
            let target = batch.toms.size();
            if prediction.size() != target {
                return Err(PpoError::malformed(
                    agent_id,
                    "tom",
                    None,
                    format!(
                        "skill prediction has shape {:?}, targets have {target:?}",
                        prediction.size()
                    ),
                ));
            }
        }
    }
    Ok(())
}

fn compute_losses(
    agent_id: &str,
    evaluation: &Evaluation,
    inputs: &UpdateInputs<'_>,
    settings: &UpdateSettings,
) -> Result<Losses> {
    let output = evaluation.policy();
    let mask = inputs.mask;
    let advantages = inputs.advantages;

    let ratio = (&output.log_prob - &inputs.batch.logprobs).exp();
    let surr1 = &ratio * advantages;
    let surr2 = (advantages * (1.0 + settings.eps))
        .where_self(&advantages.gt(0.0), &(advantages * (1.0 - settings.eps)));

    let policy_loss = masked_mean(&-surr1.min_other(&surr2), mask);
    let value_loss = masked_mean(&(&output.value - inputs.returns).pow_tensor_scalar(2), mask);
    let entropy = masked_mean(&output.entropy, mask);

    let mut total =
        &policy_loss + settings.value_loss_coeff * &value_loss - settings.entropy_coeff * &entropy;

    let mut sm = 0.0;
    if let Some(sm_coeff) = settings.sm_coeff {
        let prediction = evaluation.skill_prediction().ok_or_else(|| {
            PpoError::UnsupportedConfig(format!(
                "skill modeling is enabled but agent `{agent_id}` returned no skill prediction"
            ))
        })?;
        let sm_loss = masked_mean(
            &(prediction - &inputs.batch.toms)
                .pow_tensor_scalar(2)
                .sum_dim_intlist([-1].as_slice(), false, Kind::Float),
            mask,
        );
        sm = sm_loss.double_value(&[]);
        total = total + sm_coeff * &sm_loss;
    }

    let components = LossComponents {
        policy: policy_loss.double_value(&[]),
        value: value_loss.double_value(&[]),
        sm,
        total: total.double_value(&[]),
    };
    Ok(Losses { total, components })
}
