//! Hyperparameters for the PPO optimizer.

use serde::{Deserialize, Serialize};

use crate::error::{PpoError, Result};
use crate::schedule::EntropySchedule;

/// Keyword arguments handed to the gradient-descent optimizer.
///
/// `lr`, `eps` and `weight_decay` are read by every kind. The remaining
/// fields are kind-specific and stay `None` unless set; setting one that the
/// selected kind does not read is rejected when the optimizer is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizerKwargs {
    /// Learning rate.
    pub lr: f64,
    /// Numerical stabilizer (Adam, AdamW, RMSprop).
    pub eps: f64,
    /// L2 penalty.
    pub weight_decay: f64,
    /// `(beta1, beta2)` moment decay rates (Adam, AdamW); `(0.9, 0.999)` when unset.
    pub betas: Option<(f64, f64)>,
    /// AMSGrad variant (Adam, AdamW); off when unset.
    pub amsgrad: Option<bool>,
    /// Momentum factor (SGD, RMSprop).
    pub momentum: Option<f64>,
    /// Dampening for momentum (SGD).
    pub dampening: Option<f64>,
    /// Nesterov momentum (SGD).
    pub nesterov: Option<bool>,
    /// Smoothing constant (RMSprop).
    pub alpha: Option<f64>,
    /// Centered RMSprop.
    pub centered: Option<bool>,
}

impl Default for OptimizerKwargs {
    fn default() -> Self {
        Self {
            lr: 1e-3,
            eps: 1e-7,
            weight_decay: 0.0,
            betas: None,
            amsgrad: None,
            momentum: None,
            dampening: None,
            nesterov: None,
            alpha: None,
            centered: None,
        }
    }
}

/// Configuration for [`PpoOptimizer`](crate::PpoOptimizer).
///
/// Deserializing from a partial mapping fills every missing key with its
/// default; unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PpoConfig {
    // --- Gradient descent ---
    /// Optimizer kind (`adam`, `adamw`, `sgd`, `rmsprop`).
    pub optimizer: String,
    /// Keyword arguments for the optimizer.
    pub optimizer_kwargs: OptimizerKwargs,
    /// Discount factor γ.
    pub gamma: f64,

    // --- PPO ---
    /// Maximum number of gradient steps per agent per training call.
    pub ppo_steps: usize,
    /// PPO clip parameter ε.
    pub eps: f64,
    /// KL divergence limit for early stopping.
    pub target_kl: f64,
    /// Value loss coefficient.
    pub value_loss_coeff: f64,

    // --- Entropy bonus ---
    /// Entropy coefficient at step 0.
    pub entropy_coeff: f64,
    /// Steps it takes for the entropy coefficient to fall to a tenth.
    pub entropy_decay_time: f64,
    /// Floor for the entropy coefficient.
    pub min_entropy: f64,

    /// Global gradient norm cap; `None` disables clipping.
    pub max_grad_norm: Option<f64>,

    // --- Sequences ---
    /// Pad episodes to a common length (needed for BPTT).
    pub pad_sequences: bool,

    // --- Device ---
    /// Train on CUDA device 0.
    pub use_gpu: bool,

    // --- Skill modeling ---
    /// Add the auxiliary skill-model regression loss.
    pub use_sm: bool,
    /// Skill-model loss coefficient.
    pub sm_coeff: f64,
}

impl Default for PpoConfig {
    fn default() -> Self {
        Self {
            optimizer: "adam".to_string(),
            optimizer_kwargs: OptimizerKwargs::default(),
            gamma: 0.95,
            ppo_steps: 25,
            eps: 0.1,
            target_kl: 0.01,
            value_loss_coeff: 0.1,
            entropy_coeff: 0.1,
            entropy_decay_time: 100.0,
            min_entropy: 0.0001,
            max_grad_norm: Some(0.5),
            pad_sequences: false,
            use_gpu: false,
            use_sm: false,
            sm_coeff: 0.1,
        }
    }
}

impl PpoConfig {
    /// Merges a JSON mapping over the defaults, then validates the result.
    ///
    /// Nested `optimizer_kwargs` are merged the same way, so overriding `lr`
    /// keeps the default `eps`.
    pub fn from_overrides(overrides: serde_json::Value) -> Result<Self> {
        if !overrides.is_object() {
            return Err(PpoError::Config(
                "configuration overrides must be a mapping".to_string(),
            ));
        }
        let config: PpoConfig =
            serde_json::from_value(overrides).map_err(|e| PpoError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.gamma) {
            return Err(PpoError::Config(format!(
                "gamma must be in [0, 1], got {}",
                self.gamma
            )));
        }
        if !(self.eps > 0.0 && self.eps < 1.0) {
            return Err(PpoError::Config(format!(
                "eps must be in (0, 1), got {}",
                self.eps
            )));
        }
        if self.ppo_steps == 0 {
            return Err(PpoError::Config("ppo_steps must be positive".to_string()));
        }
        if self.target_kl.is_nan() {
            return Err(PpoError::Config("target_kl cannot be NaN".to_string()));
        }
        if !(self.entropy_decay_time > 0.0) {
            return Err(PpoError::Config(format!(
                "entropy_decay_time must be positive, got {}",
                self.entropy_decay_time
            )));
        }
        if !(self.min_entropy >= 0.0) {
            return Err(PpoError::Config(format!(
                "min_entropy must be non-negative, got {}",
                self.min_entropy
            )));
        }
        for (name, value) in [
            ("value_loss_coeff", self.value_loss_coeff),
            ("entropy_coeff", self.entropy_coeff),
            ("sm_coeff", self.sm_coeff),
        ] {
            if !(value >= 0.0) {
                return Err(PpoError::Config(format!(
                    "{name} must be non-negative, got {value}"
                )));
            }
        }
        if let Some(norm) = self.max_grad_norm {
            if !(norm > 0.0) {
                return Err(PpoError::Config(format!(
                    "max_grad_norm must be positive when set, got {norm}"
                )));
            }
        }
        if !(self.optimizer_kwargs.lr > 0.0) {
            return Err(PpoError::Config(format!(
                "optimizer_kwargs.lr must be positive, got {}",
                self.optimizer_kwargs.lr
            )));
        }
        Ok(())
    }

    /// Entropy coefficient schedule described by this config.
    pub fn entropy_schedule(&self) -> EntropySchedule {
        EntropySchedule::new(
            self.entropy_coeff,
            self.entropy_decay_time,
            self.min_entropy,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_config_is_valid() {
        let cfg = PpoConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.optimizer, "adam");
        assert_eq!(cfg.ppo_steps, 25);
        assert_eq!(cfg.max_grad_norm, Some(0.5));
        assert!(!cfg.pad_sequences);
    }

    #[test]
    fn overrides_merge_over_defaults() {
        let cfg = PpoConfig::from_overrides(json!({
            "gamma": 0.5,
            "ppo_steps": 3,
            "optimizer_kwargs": { "lr": 0.01 }
        }))
        .unwrap();
        assert_eq!(cfg.gamma, 0.5);
        assert_eq!(cfg.ppo_steps, 3);
        assert_eq!(cfg.optimizer_kwargs.lr, 0.01);
        assert_eq!(cfg.optimizer_kwargs.betas, None);
        assert_eq!(cfg.optimizer_kwargs.eps, 1e-7);
        assert_eq!(cfg.target_kl, 0.01);
    }

    #[test]
    fn null_max_grad_norm_disables_clipping() {
        let cfg = PpoConfig::from_overrides(json!({ "max_grad_norm": null })).unwrap();
        assert_eq!(cfg.max_grad_norm, None);
    }

    #[test]
    fn unknown_key_is_rejected() {
        let err = PpoConfig::from_overrides(json!({ "separate_optimizers": true })).unwrap_err();
        assert!(matches!(err, PpoError::Config(_)));
        assert!(err.to_string().contains("separate_optimizers"));
    }

    #[test]
    fn unknown_kwarg_is_rejected() {
        let err =
            PpoConfig::from_overrides(json!({ "optimizer_kwargs": { "beta": 0.9 } })).unwrap_err();
        assert!(matches!(err, PpoError::Config(_)));
    }

    #[test]
    fn non_mapping_is_rejected() {
        assert!(PpoConfig::from_overrides(json!([1, 2])).is_err());
    }

    #[test]
    fn out_of_range_values_fail_validation() {
        for overrides in [
            json!({ "gamma": 1.5 }),
            json!({ "eps": 0.0 }),
            json!({ "ppo_steps": 0 }),
            json!({ "entropy_decay_time": 0.0 }),
            json!({ "max_grad_norm": -1.0 }),
            json!({ "value_loss_coeff": -0.1 }),
        ] {
            assert!(
                PpoConfig::from_overrides(overrides.clone()).is_err(),
                "accepted {overrides}"
            );
        }
    }

    #[test]
    fn infinite_target_kl_is_allowed() {
        let cfg = PpoConfig {
            target_kl: f64::INFINITY,
            ..PpoConfig::default()
        };
        assert!(cfg.validate().is_ok());
    }
}
