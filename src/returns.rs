//! Discounted returns, masked statistics, and advantage normalization.

use tch::{Kind, Tensor};

/// Stabilizer added to the advantage scale.
pub const ADVANTAGE_EPS: f64 = 1e-8;

/// Mean of `x` over positions where `mask` is 1.
///
/// Divides by the mask sum, not the element count, so padding never dilutes
/// the result.
pub fn masked_mean(x: &Tensor, mask: &Tensor) -> Tensor {
    (x * mask).sum(Kind::Float) / mask.sum(Kind::Float)
}

/// Discounted reward-to-go along dimension 0.
///
/// `G_t = r_t + gamma * G_{t+1} * (1 - done_t)`, then zeroed wherever `mask`
/// is 0. Works for flat `[T]` and padded `[L, E]` layouts alike.
pub fn discount_rewards_to_go(
    rewards: &Tensor,
    dones: &Tensor,
    mask: &Tensor,
    gamma: f64,
) -> Tensor {
    let rewards = rewards.to_kind(Kind::Float);
    let steps = rewards.size().first().copied().unwrap_or(0);
    let returns = rewards.zeros_like();
    if steps == 0 {
        return returns;
    }

    let dones = dones.to_kind(Kind::Float);
    let not_done: Tensor = 1.0 - &dones;
    let mut running = rewards.select(0, 0).zeros_like();
    for t in (0..steps).rev() {
        running = rewards.select(0, t) + gamma * &running * not_done.select(0, t);
        returns.select(0, t).copy_(&running);
    }

    returns * mask
}

/// Value-baseline-subtracted advantage, centered and scaled under `mask`.
///
/// The result carries no gradient.
pub fn normalized_advantages(returns: &Tensor, values: &Tensor, mask: &Tensor) -> Tensor {
    let advantages = (returns - values).detach();
    let advantages = &advantages - masked_mean(&advantages, mask);
    let scale = masked_mean(&advantages.pow_tensor_scalar(2), mask).sqrt() + ADVANTAGE_EPS;
    advantages / scale
}
