//! Reorganizes time-major rollout records into per-agent tensors.

use std::collections::HashMap;

use tch::{Device, Kind, Tensor};

use super::record::{Action, AgentStep, GlobalDataBatch, TimeStep};
use crate::error::{PpoError, Result};
use crate::AgentId;

/// How the `actions` tensor of an [`AgentDataBatch`] is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// `[T]` int64 indices.
    Discrete,
    /// `[T, width]` float vectors.
    Continuous { width: usize },
}

/// One agent's data with every field stacked along dimension 0 (time).
///
/// After padding, the leading dimensions become `[L, E]` (longest episode,
/// episode count) and the per-step feature dimensions follow.
#[derive(Debug)]
pub struct AgentDataBatch {
    /// `[T, obs]` float.
    pub observations: Tensor,
    /// `[T]` int64 or `[T, A]` float, see [`ActionKind`].
    pub actions: Tensor,
    /// `[T]` float.
    pub rewards: Tensor,
    /// `[T]` float, log-probabilities under the acting policy.
    pub logprobs: Tensor,
    /// `[T]` bool.
    pub dones: Tensor,
    /// `[T, S]` float recurrent states.
    pub states: Tensor,
    /// `[T, K]` float ground-truth skill values.
    pub toms: Tensor,
    /// Layout of `actions`.
    pub action_kind: ActionKind,
}

impl AgentDataBatch {
    /// Stacks one agent's per-timestep records.
    ///
    /// Every record must agree on observation, state and skill widths and
    /// on the action variant.
    pub fn from_steps(agent: &str, steps: &[&AgentStep]) -> Result<Self> {
        let first = steps
            .first()
            .ok_or_else(|| PpoError::malformed(agent, "timesteps", None, "batch is empty"))?;

        let obs_dim = first.observation.len();
        let state_dim = first.state.len();
        let tom_dim = first.tom.len();
        let action_kind = match &first.action {
            Action::Discrete(_) => ActionKind::Discrete,
            Action::Continuous(v) => ActionKind::Continuous { width: v.len() },
        };

        let n = steps.len();
        let mut observations = Vec::with_capacity(n * obs_dim);
        let mut discrete_actions = Vec::new();
        let mut continuous_actions = Vec::new();
        let mut rewards = Vec::with_capacity(n);
        let mut logprobs = Vec::with_capacity(n);
        let mut dones = Vec::with_capacity(n);
        let mut states = Vec::with_capacity(n * state_dim);
        let mut toms = Vec::with_capacity(n * tom_dim);

        for (t, step) in steps.iter().enumerate() {
            check_width(agent, "observation", t, obs_dim, step.observation.len())?;
            check_width(agent, "state", t, state_dim, step.state.len())?;
            check_width(agent, "tom", t, tom_dim, step.tom.len())?;

            match (&step.action, action_kind) {
                (Action::Discrete(a), ActionKind::Discrete) => discrete_actions.push(*a),
                (Action::Continuous(v), ActionKind::Continuous { width }) => {
                    check_width(agent, "action", t, width, v.len())?;
                    continuous_actions.extend_from_slice(v);
                }
                _ => {
                    return Err(PpoError::malformed(
                        agent,
                        "action",
                        Some(t),
                        "action variant differs from the first timestep",
                    ))
                }
            }

            observations.extend_from_slice(&step.observation);
            rewards.push(step.reward);
            logprobs.push(step.logprob);
            dones.push(step.done);
            states.extend_from_slice(&step.state);
            toms.extend_from_slice(&step.tom);
        }

        let actions = match action_kind {
            ActionKind::Discrete => Tensor::from_slice(&discrete_actions),
            ActionKind::Continuous { width } => stack_rows(&continuous_actions, n, width),
        };

        Ok(Self {
            observations: stack_rows(&observations, n, obs_dim),
            actions,
            rewards: Tensor::from_slice(&rewards),
            logprobs: Tensor::from_slice(&logprobs),
            dones: Tensor::from_slice(&dones),
            states: stack_rows(&states, n, state_dim),
            toms: stack_rows(&toms, n, tom_dim),
            action_kind,
        })
    }

    /// Number of entries along the time dimension.
    pub fn len(&self) -> usize {
        self.rewards.size().first().copied().unwrap_or(0) as usize
    }

    /// Returns true if the batch holds no timesteps.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Applies `f` to every tensor field, keeping the action layout.
    pub fn try_map(&self, mut f: impl FnMut(&Tensor) -> Result<Tensor>) -> Result<Self> {
        Ok(Self {
            observations: f(&self.observations)?,
            actions: f(&self.actions)?,
            rewards: f(&self.rewards)?,
            logprobs: f(&self.logprobs)?,
            dones: f(&self.dones)?,
            states: f(&self.states)?,
            toms: f(&self.toms)?,
            action_kind: self.action_kind,
        })
    }

    /// Copies every field to `device`.
    pub fn to_device(&self, device: Device) -> Self {
        Self {
            observations: self.observations.to_device(device),
            actions: self.actions.to_device(device),
            rewards: self.rewards.to_device(device),
            logprobs: self.logprobs.to_device(device),
            dones: self.dones.to_device(device),
            states: self.states.to_device(device),
            toms: self.toms.to_device(device),
            action_kind: self.action_kind,
        }
    }

    /// Rewards as a flat vector (CPU copy).
    pub fn rewards_vec(&self) -> Result<Vec<f32>> {
        f32_values(&self.rewards)
    }

    /// Done-flags as a flat vector (CPU copy).
    pub fn dones_vec(&self) -> Result<Vec<bool>> {
        bool_values(&self.dones)
    }

    /// Splits the batch back into per-timestep records.
    ///
    /// Only valid for unpadded batches.
    pub fn to_steps(&self) -> Result<Vec<AgentStep>> {
        if self.observations.dim() != 2 || self.rewards.dim() != 1 {
            return Err(PpoError::Shape(format!(
                "cannot flatten a padded batch (observations {:?})",
                self.observations.size()
            )));
        }
        let n = self.len();
        let observations = f32_rows(&self.observations, n)?;
        let states = f32_rows(&self.states, n)?;
        let toms = f32_rows(&self.toms, n)?;
        let rewards = self.rewards_vec()?;
        let logprobs = f32_values(&self.logprobs)?;
        let dones = self.dones_vec()?;
        let actions: Vec<Action> = match self.action_kind {
            ActionKind::Discrete => i64_values(&self.actions)?
                .into_iter()
                .map(Action::Discrete)
                .collect(),
            ActionKind::Continuous { .. } => f32_rows(&self.actions, n)?
                .into_iter()
                .map(Action::Continuous)
                .collect(),
        };

        let steps = observations
            .into_iter()
            .zip(actions)
            .zip(states.into_iter().zip(toms))
            .enumerate()
            .map(|(t, ((observation, action), (state, tom)))| AgentStep {
                observation,
                action,
                reward: rewards[t],
                logprob: logprobs[t],
                done: dones[t],
                state,
                tom,
            })
            .collect();
        Ok(steps)
    }
}

/// Builds one [`AgentDataBatch`] per agent in `agent_ids`.
///
/// Fails if any timestep lacks one of the agents. Sub-records for agents not
/// in `agent_ids` are ignored.
pub fn transpose_batch(
    batch: &GlobalDataBatch,
    agent_ids: &[AgentId],
) -> Result<HashMap<AgentId, AgentDataBatch>> {
    let mut out = HashMap::with_capacity(agent_ids.len());
    for agent in agent_ids {
        let steps = batch
            .iter()
            .enumerate()
            .map(|(t, record)| {
                record.get(agent).ok_or_else(|| {
                    PpoError::malformed(agent, "agent", Some(t), "missing from timestep record")
                })
            })
            .collect::<Result<Vec<&AgentStep>>>()?;
        out.insert(agent.clone(), AgentDataBatch::from_steps(agent, &steps)?);
    }
    Ok(out)
}

/// Inverse of [`transpose_batch`]: rebuilds the per-timestep records.
pub fn untranspose(batches: &HashMap<AgentId, AgentDataBatch>) -> Result<GlobalDataBatch> {
    let mut len = None;
    let mut per_agent = Vec::with_capacity(batches.len());
    for (agent, batch) in batches {
        let steps = batch.to_steps()?;
        match len {
            None => len = Some(steps.len()),
            Some(n) if n != steps.len() => {
                return Err(PpoError::Shape(format!(
                    "agent `{agent}` has {} timesteps, expected {n}",
                    steps.len()
                )))
            }
            Some(_) => {}
        }
        per_agent.push((agent, steps));
    }

    let mut records: GlobalDataBatch = (0..len.unwrap_or(0)).map(|_| TimeStep::new()).collect();
    for (agent, steps) in per_agent {
        for (record, step) in records.iter_mut().zip(steps) {
            record.insert(agent.clone(), step);
        }
    }
    Ok(records)
}

fn check_width(
    agent: &str,
    field: &'static str,
    t: usize,
    expected: usize,
    actual: usize,
) -> Result<()> {
    if expected != actual {
        return Err(PpoError::malformed(
            agent,
            field,
            Some(t),
            format!("width {actual} differs from {expected} at the first timestep"),
        ));
    }
    Ok(())
}

fn stack_rows(flat: &[f32], rows: usize, width: usize) -> Tensor {
    Tensor::from_slice(flat).reshape([rows as i64, width as i64])
}

pub(crate) fn f32_values(t: &Tensor) -> Result<Vec<f32>> {
    let flat = t.to_device(Device::Cpu).to_kind(Kind::Float).flatten(0, -1);
    Ok(Vec::<f32>::try_from(flat)?)
}

fn i64_values(t: &Tensor) -> Result<Vec<i64>> {
    let flat = t.to_device(Device::Cpu).to_kind(Kind::Int64).flatten(0, -1);
    Ok(Vec::<i64>::try_from(flat)?)
}

pub(crate) fn bool_values(t: &Tensor) -> Result<Vec<bool>> {
    let flat = t.to_device(Device::Cpu).to_kind(Kind::Bool).flatten(0, -1);
    Ok(Vec::<bool>::try_from(flat)?)
}

fn f32_rows(t: &Tensor, rows: usize) -> Result<Vec<Vec<f32>>> {
    let width = t.size().get(1).copied().unwrap_or(0) as usize;
    if width == 0 {
        return Ok(vec![Vec::new(); rows]);
    }
    Ok(f32_values(t)?
        .chunks(width)
        .map(<[f32]>::to_vec)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(obs: f32, action: i64, reward: f32, done: bool) -> AgentStep {
        AgentStep {
            observation: vec![obs, -obs],
            action: Action::Discrete(action),
            reward,
            logprob: -0.7,
            done,
            state: vec![],
            tom: vec![0.25, 0.5, 0.75],
        }
    }

    fn two_agent_batch() -> GlobalDataBatch {
        (0..4)
            .map(|t| {
                let mut record = TimeStep::new();
                record.insert("red".to_string(), step(t as f32, t % 2, 1.0, t == 1));
                record.insert("blue".to_string(), step(0.1 * t as f32, 1, -1.0, t == 3));
                record
            })
            .collect()
    }

    fn ids() -> Vec<AgentId> {
        vec!["red".to_string(), "blue".to_string()]
    }

    #[test]
    fn fields_share_time_dimension() {
        let batches = transpose_batch(&two_agent_batch(), &ids()).unwrap();
        let red = &batches["red"];
        assert_eq!(red.len(), 4);
        assert_eq!(red.observations.size(), &[4, 2]);
        assert_eq!(red.actions.size(), &[4]);
        assert_eq!(red.states.size(), &[4, 0]);
        assert_eq!(red.toms.size(), &[4, 3]);
        assert_eq!(red.dones_vec().unwrap(), vec![false, true, false, false]);
    }

    #[test]
    fn missing_agent_is_malformed() {
        let mut batch = two_agent_batch();
        batch[2].remove("blue");
        let err = transpose_batch(&batch, &ids()).unwrap_err();
        match err {
            PpoError::MalformedBatch {
                agent,
                field,
                timestep,
                ..
            } => {
                assert_eq!(agent, "blue");
                assert_eq!(field, "agent");
                assert_eq!(timestep, Some(2));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn inconsistent_observation_width_is_malformed() {
        let mut batch = two_agent_batch();
        batch[3].get_mut("red").unwrap().observation.push(9.0);
        let err = transpose_batch(&batch, &ids()).unwrap_err();
        assert!(matches!(
            err,
            PpoError::MalformedBatch {
                field: "observation",
                timestep: Some(3),
                ..
            }
        ));
    }

    #[test]
    fn mixed_action_variants_are_malformed() {
        let mut batch = two_agent_batch();
        batch[1].get_mut("red").unwrap().action = Action::Continuous(vec![0.5]);
        let err = transpose_batch(&batch, &ids()).unwrap_err();
        assert!(matches!(err, PpoError::MalformedBatch { field: "action", .. }));
    }

    #[test]
    fn empty_batch_is_malformed() {
        let err = transpose_batch(&Vec::new(), &ids()).unwrap_err();
        assert!(matches!(err, PpoError::MalformedBatch { field: "timesteps", .. }));
    }

    #[test]
    fn unknown_agents_are_ignored() {
        let mut batch = two_agent_batch();
        for record in &mut batch {
            record.insert("green".to_string(), step(0.0, 0, 0.0, false));
        }
        let batches = transpose_batch(&batch, &ids()).unwrap();
        assert_eq!(batches.len(), 2);
    }

    #[test]
    fn untranspose_reproduces_records() {
        let original = two_agent_batch();
        let batches = transpose_batch(&original, &ids()).unwrap();
        let rebuilt = untranspose(&batches).unwrap();
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn untranspose_reproduces_continuous_actions() {
        let original: GlobalDataBatch = (0..3)
            .map(|t| {
                let mut record = TimeStep::new();
                record.insert(
                    "solo".to_string(),
                    AgentStep {
                        observation: vec![0.1 * t as f32],
                        action: Action::Continuous(vec![1.0 / 3.0, -(t as f32)]),
                        reward: 0.3,
                        logprob: -1.25,
                        done: t == 2,
                        state: vec![f32::MIN_POSITIVE, 7.5],
                        tom: vec![],
                    },
                );
                record
            })
            .collect();
        let batches = transpose_batch(&original, &["solo".to_string()]).unwrap();
        assert_eq!(
            batches["solo"].action_kind,
            ActionKind::Continuous { width: 2 }
        );
        assert_eq!(untranspose(&batches).unwrap(), original);
    }
}
