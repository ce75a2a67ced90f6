//! Episode boundaries, padding, and validity masks.

use tch::{Kind, Tensor};

use crate::batch::transpose::f32_values;
use crate::batch::AgentDataBatch;
use crate::error::{PpoError, Result};

/// An agent batch ready for the update loop.
#[derive(Debug)]
pub struct PreparedBatch {
    /// Flat `[T, ...]` or padded `[L, E, ...]` data.
    pub batch: AgentDataBatch,
    /// 0/1 float mask over the leading dims of `batch.rewards`.
    pub mask: Tensor,
    /// Length of every episode, in order of appearance.
    pub episode_lens: Vec<usize>,
    /// Whether `batch` is padded.
    pub padded: bool,
}

impl PreparedBatch {
    /// Number of valid (non-padding) steps.
    pub fn total_steps(&self) -> usize {
        self.episode_lens.iter().sum()
    }
}

/// Splits a flat sequence into episodes at done-flags.
///
/// A trailing run of steps with no closing done-flag counts as one more
/// (unfinished) episode.
pub fn episode_lens(dones: &[bool]) -> Vec<usize> {
    let mut lens = Vec::new();
    let mut current = 0;
    for &done in dones {
        current += 1;
        if done {
            lens.push(current);
            current = 0;
        }
    }
    if current > 0 {
        lens.push(current);
    }
    lens
}

/// Prepares one agent's batch in padded or flat mode.
pub fn prepare(batch: &AgentDataBatch, padded: bool) -> Result<PreparedBatch> {
    let lens = episode_lens(&batch.dones_vec()?);
    if !padded {
        let mask = batch.rewards.ones_like().to_kind(Kind::Float);
        let prepared = PreparedBatch {
            batch: batch.try_map(|t| Ok(t.shallow_clone()))?,
            mask,
            episode_lens: lens,
            padded,
        };
        return Ok(prepared);
    }

    let (padded_batch, mask) = pad_episodes(batch, &lens)?;
    let episode_lens = f32_values(&mask.sum_dim_intlist([0].as_slice(), false, Kind::Float))?
        .into_iter()
        .map(|len| len as usize)
        .collect::<Vec<_>>();
    debug_assert_eq!(episode_lens, lens);

    Ok(PreparedBatch {
        batch: padded_batch,
        mask,
        episode_lens,
        padded,
    })
}

/// Right-pads every episode to the longest one.
///
/// Each field `[T, ...]` becomes `[L, E, ...]` with zeros past the end of
/// each episode. Returns the padded batch and its `[L, E]` mask.
pub fn pad_episodes(batch: &AgentDataBatch, lens: &[usize]) -> Result<(AgentDataBatch, Tensor)> {
    let total: usize = lens.iter().sum();
    if total != batch.len() {
        return Err(PpoError::Shape(format!(
            "episode lengths sum to {total}, batch has {} steps",
            batch.len()
        )));
    }
    let max_len = lens.iter().copied().max().unwrap_or(0) as i64;
    let n_episodes = lens.len() as i64;

    let padded = batch.try_map(|field| {
        let mut shape = vec![max_len, n_episodes];
        shape.extend_from_slice(&field.size()[1..]);
        let out = Tensor::zeros(shape.as_slice(), (field.kind(), field.device()));
        let mut start = 0i64;
        for (episode, &len) in lens.iter().enumerate() {
            let len = len as i64;
            out.narrow(0, 0, len)
                .select(1, episode as i64)
                .copy_(&field.narrow(0, start, len));
            start += len;
        }
        Ok(out)
    })?;

    let mask = Tensor::zeros([max_len, n_episodes], (Kind::Float, batch.rewards.device()));
    for (episode, &len) in lens.iter().enumerate() {
        let _ = mask.narrow(0, 0, len as i64).select(1, episode as i64).fill_(1.0);
    }

    Ok((padded, mask))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{transpose_batch, Action, AgentStep, GlobalDataBatch, TimeStep};

    fn batch_with_dones(dones: &[bool]) -> AgentDataBatch {
        let records: GlobalDataBatch = dones
            .iter()
            .enumerate()
            .map(|(t, &done)| {
                let mut record = TimeStep::new();
                record.insert(
                    "a".to_string(),
                    AgentStep {
                        observation: vec![t as f32, 1.0],
                        action: Action::Discrete(t as i64),
                        reward: (t + 1) as f32,
                        logprob: -0.5,
                        done,
                        state: vec![],
                        tom: vec![t as f32],
                    },
                );
                record
            })
            .collect();
        transpose_batch(&records, &["a".to_string()])
            .unwrap()
            .remove("a")
            .unwrap()
    }

    #[test]
    fn episode_lens_from_dones() {
        assert_eq!(episode_lens(&[false, false, true, false, true]), vec![3, 2]);
        assert_eq!(episode_lens(&[true, true]), vec![1, 1]);
    }

    #[test]
    fn trailing_unfinished_episode_is_counted() {
        assert_eq!(episode_lens(&[false, true, false, false]), vec![2, 2]);
        assert_eq!(episode_lens(&[false]), vec![1]);
        assert!(episode_lens(&[]).is_empty());
    }

    #[test]
    fn unpadded_mask_is_all_ones() {
        let batch = batch_with_dones(&[false, true, false, false, true]);
        let prepared = prepare(&batch, false).unwrap();
        assert_eq!(prepared.mask.size(), &[5]);
        assert_eq!(prepared.mask.sum(Kind::Float).double_value(&[]), 5.0);
        assert_eq!(prepared.episode_lens, vec![2, 3]);
        assert_eq!(prepared.total_steps(), 5);
    }

    #[test]
    fn padded_shapes_and_mask() {
        let batch = batch_with_dones(&[false, true, false, false, true]);
        let prepared = prepare(&batch, true).unwrap();
        assert!(prepared.padded);
        assert_eq!(prepared.batch.rewards.size(), &[3, 2]);
        assert_eq!(prepared.batch.observations.size(), &[3, 2, 2]);
        assert_eq!(prepared.batch.actions.size(), &[3, 2]);
        assert_eq!(prepared.batch.toms.size(), &[3, 2, 1]);
        assert_eq!(prepared.mask.size(), &[3, 2]);
        assert_eq!(prepared.episode_lens, vec![2, 3]);
        assert_eq!(prepared.mask.sum(Kind::Float).double_value(&[]), 5.0);
    }

    #[test]
    fn padded_rewards_land_in_episode_columns() {
        let batch = batch_with_dones(&[false, true, false, false, true]);
        let prepared = prepare(&batch, true).unwrap();
        // Column-major read of [L=3, E=2]: episode 0 = [1, 2, pad], episode 1 = [3, 4, 5].
        let rewards = f32_values(&prepared.batch.rewards.transpose(0, 1)).unwrap();
        assert_eq!(rewards, vec![1.0, 2.0, 0.0, 3.0, 4.0, 5.0]);
        let mask = f32_values(&prepared.mask.transpose(0, 1)).unwrap();
        assert_eq!(mask, vec![1.0, 1.0, 0.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let batch = batch_with_dones(&[false, true]);
        assert!(matches!(
            pad_episodes(&batch, &[1]),
            Err(PpoError::Shape(_))
        ));
    }
}
