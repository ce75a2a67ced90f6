//! Gradient-descent optimizer construction and gradient clipping.

use std::fmt;
use std::str::FromStr;

use tch::{nn, nn::OptimizerConfig, Kind, Tensor};

use crate::config::OptimizerKwargs;
use crate::error::{PpoError, Result};

/// Supported gradient-descent optimizers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerKind {
    Adam,
    AdamW,
    Sgd,
    RmsProp,
}

impl OptimizerKind {
    /// Kind-specific kwargs this optimizer reads.
    fn accepts(&self, kwarg: &str) -> bool {
        let accepted: &[&str] = match self {
            OptimizerKind::Adam | OptimizerKind::AdamW => &["betas", "amsgrad"],
            OptimizerKind::Sgd => &["momentum", "dampening", "nesterov"],
            OptimizerKind::RmsProp => &["alpha", "momentum", "centered"],
        };
        accepted.contains(&kwarg)
    }
}

impl FromStr for OptimizerKind {
    type Err = PpoError;

    fn from_str(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "adam" => Ok(OptimizerKind::Adam),
            "adamw" => Ok(OptimizerKind::AdamW),
            "sgd" => Ok(OptimizerKind::Sgd),
            "rmsprop" => Ok(OptimizerKind::RmsProp),
            _ => Err(PpoError::UnknownOptimizer(name.to_string())),
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizerKind::Adam => write!(f, "adam"),
            OptimizerKind::AdamW => write!(f, "adamw"),
            OptimizerKind::Sgd => write!(f, "sgd"),
            OptimizerKind::RmsProp => write!(f, "rmsprop"),
        }
    }
}

/// Rejects kind-specific kwargs that `kind` would not read.
pub fn check_kwargs(kind: OptimizerKind, kwargs: &OptimizerKwargs) -> Result<()> {
    let set = [
        ("betas", kwargs.betas.is_some()),
        ("amsgrad", kwargs.amsgrad.is_some()),
        ("momentum", kwargs.momentum.is_some()),
        ("dampening", kwargs.dampening.is_some()),
        ("nesterov", kwargs.nesterov.is_some()),
        ("alpha", kwargs.alpha.is_some()),
        ("centered", kwargs.centered.is_some()),
    ];
    for (name, is_set) in set {
        if is_set && !kind.accepts(name) {
            return Err(PpoError::UnsupportedConfig(format!(
                "optimizer `{kind}` does not take `{name}`"
            )));
        }
    }
    Ok(())
}

/// Builds an optimizer of `kind` over every trainable variable in `vs`.
pub fn build_optimizer(
    kind: OptimizerKind,
    kwargs: &OptimizerKwargs,
    vs: &nn::VarStore,
) -> Result<nn::Optimizer> {
    check_kwargs(kind, kwargs)?;
    let (beta1, beta2) = kwargs.betas.unwrap_or((0.9, 0.999));
    let optimizer = match kind {
        OptimizerKind::Adam => nn::Adam {
            beta1,
            beta2,
            wd: kwargs.weight_decay,
            eps: kwargs.eps,
            amsgrad: kwargs.amsgrad.unwrap_or(false),
        }
        .build(vs, kwargs.lr)?,
        OptimizerKind::AdamW => nn::AdamW {
            beta1,
            beta2,
            wd: kwargs.weight_decay,
            eps: kwargs.eps,
            amsgrad: kwargs.amsgrad.unwrap_or(false),
        }
        .build(vs, kwargs.lr)?,
        OptimizerKind::Sgd => nn::Sgd {
            momentum: kwargs.momentum.unwrap_or(0.0),
            dampening: kwargs.dampening.unwrap_or(0.0),
            wd: kwargs.weight_decay,
            nesterov: kwargs.nesterov.unwrap_or(false),
        }
        .build(vs, kwargs.lr)?,
        OptimizerKind::RmsProp => nn::RmsProp {
            alpha: kwargs.alpha.unwrap_or(0.99),
            eps: kwargs.eps,
            wd: kwargs.weight_decay,
            momentum: kwargs.momentum.unwrap_or(0.0),
            centered: kwargs.centered.unwrap_or(false),
        }
        .build(vs, kwargs.lr)?,
    };
    Ok(optimizer)
}

/// Global L2 norm of the gradients of `variables`.
pub fn grad_norm(variables: &[Tensor]) -> f64 {
    tch::no_grad(|| {
        variables
            .iter()
            .map(Tensor::grad)
            .filter(Tensor::defined)
            .map(|g| g.pow_tensor_scalar(2.0).sum(Kind::Float).double_value(&[]))
            .sum::<f64>()
            .sqrt()
    })
}

/// Rescales gradients in place so their global norm is at most `max_norm`.
///
/// Returns the norm before clipping.
pub fn clip_grad_norm(variables: &[Tensor], max_norm: f64) -> f64 {
    let norm = grad_norm(variables);
    if norm.is_finite() && norm > max_norm {
        let clip_coef = max_norm / (norm + 1e-6);
        tch::no_grad(|| {
            for var in variables {
                let mut grad = var.grad();
                if grad.defined() {
                    let _ = grad.f_mul_scalar_(clip_coef);
                }
            }
        });
    }
    norm
}
