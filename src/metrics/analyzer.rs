//! Post-hoc analysis of the episodes in a training batch.

/// One episode recovered from an agent's batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Episode {
    /// Per-step rewards.
    pub rewards: Vec<f64>,
    /// Whether the episode ended with a done-flag inside the batch.
    pub finished: bool,
}

impl Episode {
    /// Number of steps.
    pub fn len(&self) -> usize {
        self.rewards.len()
    }

    /// Returns true if the episode has no steps.
    pub fn is_empty(&self) -> bool {
        self.rewards.is_empty()
    }

    /// Undiscounted sum of rewards.
    pub fn total_reward(&self) -> f64 {
        self.rewards.iter().sum()
    }

    /// Reward of the last step.
    pub fn final_reward(&self) -> Option<f64> {
        self.rewards.last().copied()
    }
}

/// Cuts a flat reward sequence into episodes of the given lengths.
pub fn split_episodes(rewards: &[f32], dones: &[bool], lens: &[usize]) -> Vec<Episode> {
    let mut episodes = Vec::with_capacity(lens.len());
    let mut start = 0;
    for &len in lens {
        let end = (start + len).min(rewards.len());
        episodes.push(Episode {
            rewards: rewards[start..end].iter().map(|&r| r as f64).collect(),
            finished: end > start && dones.get(end - 1).copied().unwrap_or(false),
        });
        start = end;
    }
    episodes
}

/// Task-specific statistics computed from an agent's episodes.
///
/// Returned names are prefixed with the agent id before emission.
pub trait EpisodeAnalyzer {
    fn analyze(&self, episodes: &[Episode]) -> Vec<(String, f64)>;
}

/// Fractions of episodes by how they ended.
///
/// A finished episode falls into the first category (in descending threshold
/// order) whose threshold its final reward reaches; finished episodes below
/// every threshold count toward none. Episodes cut off by the end of the
/// batch count as `unfinished`. Emits `ratio_<name>` per category plus
/// `ratio_unfinished`.
#[derive(Debug, Clone, Default)]
pub struct TerminalRewardRatios {
    categories: Vec<(String, f64)>,
}

impl TerminalRewardRatios {
    /// Creates an analyzer with no categories.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a category for episodes whose final reward is at least
    /// `min_final_reward`.
    pub fn category(mut self, name: impl Into<String>, min_final_reward: f64) -> Self {
        self.categories.push((name.into(), min_final_reward));
        self.categories.sort_by(|a, b| b.1.total_cmp(&a.1));
        self
    }
}

impl EpisodeAnalyzer for TerminalRewardRatios {
    fn analyze(&self, episodes: &[Episode]) -> Vec<(String, f64)> {
        let mut counts = vec![0usize; self.categories.len()];
        let mut unfinished = 0usize;
        for episode in episodes {
            if !episode.finished {
                unfinished += 1;
                continue;
            }
            let Some(last) = episode.final_reward() else {
                continue;
            };
            if let Some(idx) = self
                .categories
                .iter()
                .position(|(_, threshold)| last >= *threshold)
            {
                counts[idx] += 1;
            }
        }

        let n = episodes.len().max(1) as f64;
        let mut out: Vec<(String, f64)> = self
            .categories
            .iter()
            .zip(counts)
            .map(|((name, _), count)| (format!("ratio_{name}"), count as f64 / n))
            .collect();
        out.push(("ratio_unfinished".to_string(), unfinished as f64 / n));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn final_action() -> TerminalRewardRatios {
        TerminalRewardRatios::new()
            .category("nosync", f64::NEG_INFINITY)
            .category("sync", 1.0)
            .category("halfsync", 0.5)
    }

    #[test]
    fn split_marks_trailing_episode_unfinished() {
        let rewards = [1.0f32, 2.0, 3.0, 4.0, 5.0];
        let dones = [false, true, false, false, false];
        let episodes = split_episodes(&rewards, &dones, &[2, 3]);
        assert_eq!(episodes.len(), 2);
        assert!(episodes[0].finished);
        assert!(!episodes[1].finished);
        assert_eq!(episodes[0].total_reward(), 3.0);
        assert_eq!(episodes[1].total_reward(), 12.0);
    }

    #[test]
    fn categories_are_checked_highest_first() {
        let episodes = vec![
            Episode { rewards: vec![0.0, 1.0], finished: true },
            Episode { rewards: vec![0.0, 0.5], finished: true },
            Episode { rewards: vec![-1.0], finished: true },
            Episode { rewards: vec![2.0], finished: false },
        ];
        let ratios: std::collections::HashMap<_, _> =
            final_action().analyze(&episodes).into_iter().collect();
        assert_eq!(ratios["ratio_sync"], 0.25);
        assert_eq!(ratios["ratio_halfsync"], 0.25);
        assert_eq!(ratios["ratio_nosync"], 0.25);
        assert_eq!(ratios["ratio_unfinished"], 0.25);
    }

    #[test]
    fn episodes_below_every_threshold_count_toward_none() {
        let analyzer = TerminalRewardRatios::new().category("win", 1.0);
        let episodes = vec![Episode { rewards: vec![0.0], finished: true }];
        let out = analyzer.analyze(&episodes);
        assert_eq!(
            out,
            vec![
                ("ratio_win".to_string(), 0.0),
                ("ratio_unfinished".to_string(), 0.0)
            ]
        );
    }
}
