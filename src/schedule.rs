//! Entropy bonus schedule.

/// Geometric decay of the entropy coefficient over training steps.
///
/// `coeff(step) = max(base * 0.1^(step / decay_time), min)`. The schedule
/// holds no state: the caller supplies the global training step on every
/// evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntropySchedule {
    base: f64,
    decay_time: f64,
    min: f64,
}

impl EntropySchedule {
    /// Creates a schedule starting at `base`, losing a factor of ten every
    /// `decay_time` steps, and never going below `min`.
    pub fn new(base: f64, decay_time: f64, min: f64) -> Self {
        Self {
            base,
            decay_time,
            min,
        }
    }

    /// Entropy coefficient at the given global training step.
    pub fn coeff(&self, step: u64) -> f64 {
        let decayed = self.base * 0.1f64.powf(step as f64 / self.decay_time);
        decayed.max(self.min)
    }
}
