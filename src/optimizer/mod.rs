//! Multi-agent PPO optimizer.
//!
//! [`PpoOptimizer`] owns a fixed set of agents, one gradient-descent optimizer
//! per agent, and the hyperparameters. Each call to
//! [`train_on_data`](PpoOptimizer::train_on_data) runs, per agent and in
//! order:
//!
//! 1. transposition of the global batch into the agent's tensors,
//! 2. sequence preparation (flat or padded, with a validity mask),
//! 3. discounted returns and normalized advantages,
//! 4. the clipped-surrogate update loop,
//! 5. metric aggregation and emission.

use std::collections::HashSet;
use std::time::Instant;

use tch::{nn, Device};
use tracing::{info, warn};

use crate::agent::{Agent, DevicePlacement};
use crate::batch::{transpose_batch, AgentDataBatch, GlobalDataBatch};
use crate::config::PpoConfig;
use crate::error::{PpoError, Result};
use crate::metrics::{
    split_episodes, AgentMetrics, EpisodeAnalyzer, MetricSink, Spread, TrainingMetrics,
};
use crate::optim::{build_optimizer, OptimizerKind};
use crate::returns::{discount_rewards_to_go, normalized_advantages};
use crate::sequence::prepare;
use crate::update::{check_shapes, run_update, UpdateInputs, UpdateOutcome, UpdateSettings};
use crate::AgentId;


/// One agent and the optimizer bound to its parameters.
struct AgentSlot {
    id: AgentId,
    agent: Box<dyn Agent>,
    optimizer: nn::Optimizer,
}

/// Trains a fixed set of independently parameterized agents with PPO.
pub struct PpoOptimizer {
    agents: Vec<AgentSlot>,
    config: PpoConfig,
    device: Device,
    analyzers: Vec<Box<dyn EpisodeAnalyzer>>,
}

impl PpoOptimizer {
    /// Creates an optimizer over `agents`, kept in the given order.
    ///
    /// Fails if the config is invalid, two agents share an id, the optimizer
    /// kind is unknown or given foreign kwargs, skill modeling is enabled for
    /// an agent without a skill head, or GPU training is requested without
    /// CUDA.
    pub fn new(agents: Vec<(AgentId, Box<dyn Agent>)>, config: PpoConfig) -> Result<Self> {
        config.validate()?;
        if agents.is_empty() {
            return Err(PpoError::Config("at least one agent is required".to_string()));
        }

        let device = if config.use_gpu {
            if !tch::Cuda::is_available() {
                return Err(PpoError::UnsupportedConfig(
                    "use_gpu is set but CUDA is not available".to_string(),
                ));
            }
            Device::Cuda(0)
        } else {
            Device::Cpu
        };

        let kind: OptimizerKind = config.optimizer.parse()?;
        let mut seen = HashSet::new();
        let mut slots = Vec::with_capacity(agents.len());
        for (id, agent) in agents {
            if !seen.insert(id.clone()) {
                return Err(PpoError::Config(format!("duplicate agent id `{id}`")));
            }
            if config.use_sm && !agent.supports_skill_model() {
                return Err(PpoError::UnsupportedConfig(format!(
                    "use_sm is set but agent `{id}` has no skill model"
                )));
            }
            let optimizer = build_optimizer(kind, &config.optimizer_kwargs, agent.var_store())?;
            slots.push(AgentSlot {
                id,
                agent,
                optimizer,
            });
        }

        info!(
            agents = slots.len(),
            optimizer = %kind,
            ?device,
            padded = config.pad_sequences,
            "PPO optimizer ready"
        );

        Ok(Self {
            agents: slots,
            config,
            device,
            analyzers: Vec::new(),
        })
    }

    /// Adds a post-hoc episode analyzer whose results join each agent's
    /// metrics.
    pub fn with_analyzer(mut self, analyzer: impl EpisodeAnalyzer + 'static) -> Self {
        self.analyzers.push(Box::new(analyzer));
        self
    }

    /// Agent ids in training order.
    pub fn agent_ids(&self) -> Vec<AgentId> {
        self.agents.iter().map(|slot| slot.id.clone()).collect()
    }

    /// Looks up an agent by id.
    pub fn agent(&self, id: &str) -> Option<&dyn Agent> {
        self.agents
            .iter()
            .find(|slot| slot.id == id)
            .map(|slot| slot.agent.as_ref())
    }

    pub fn config(&self) -> &PpoConfig {
        &self.config
    }

    /// Device agents are trained on.
    pub fn device(&self) -> Device {
        self.device
    }

    /// Runs one PPO update for every agent on `batch`.
    ///
    /// `step` is the caller's global training step; it only drives the
    /// entropy schedule. When `sink` is given, each agent's metrics are
    /// written to it right after that agent's update; sink failures are
    /// logged and ignored. Returns the metrics of all agents.
    pub fn train_on_data(
        &mut self,
        batch: &GlobalDataBatch,
        step: u64,
        sink: Option<&dyn MetricSink>,
    ) -> Result<TrainingMetrics> {
        let ids = self.agent_ids();
        let mut batches = transpose_batch(batch, &ids)?;
        let entropy_coeff = self.config.entropy_schedule().coeff(step);

        let mut metrics = TrainingMetrics::new();
        for slot in &mut self.agents {
            let agent_batch = batches.remove(&slot.id).ok_or_else(|| {
                PpoError::malformed(&slot.id, "agent", None, "missing from transposed batch")
            })?;
            let agent_metrics = train_agent(
                slot,
                &agent_batch,
                &self.config,
                self.device,
                entropy_coeff,
                &self.analyzers,
            )?;

            if let Some(sink) = sink {
                if let Err(e) = sink.write(&agent_metrics, step) {
                    warn!(agent = %slot.id, error = %e, "failed to write training metrics");
                }
            }
            metrics.extend(agent_metrics);
        }
        Ok(metrics)
    }
}

fn train_agent(
    slot: &mut AgentSlot,
    batch: &AgentDataBatch,
    config: &PpoConfig,
    device: Device,
    entropy_coeff: f64,
    analyzers: &[Box<dyn EpisodeAnalyzer>],
) -> Result<TrainingMetrics> {
    if config.use_sm && batch.toms.size().get(1).copied().unwrap_or(0) == 0 {
        return Err(PpoError::malformed(
            &slot.id,
            "tom",
            None,
            "skill modeling needs non-empty tom targets",
        ));
    }

    let mut agent = DevicePlacement::acquire(slot.agent.as_mut(), device);

    let prepared = prepare(&batch.to_device(device), config.pad_sequences)?;
    let returns = discount_rewards_to_go(
        &prepared.batch.rewards,
        &prepared.batch.dones,
        &prepared.mask,
        config.gamma,
    );
    let baseline = tch::no_grad(|| agent.evaluate(&prepared.batch, prepared.padded))?;
    check_shapes(
        &slot.id,
        &baseline,
        &prepared.batch,
        &prepared.mask,
        config.use_sm,
    )?;
    let advantages = normalized_advantages(&returns, &baseline.policy().value, &prepared.mask);
    drop(baseline);

    let settings = UpdateSettings {
        ppo_steps: config.ppo_steps,
        eps: config.eps,
        target_kl: config.target_kl,
        value_loss_coeff: config.value_loss_coeff,
        entropy_coeff,
        sm_coeff: config.use_sm.then_some(config.sm_coeff),
        max_grad_norm: config.max_grad_norm,
    };
    let inputs = UpdateInputs {
        batch: &prepared.batch,
        mask: &prepared.mask,
        returns: &returns,
        advantages: &advantages,
        padded: prepared.padded,
    };

    let started = Instant::now();
    let outcome = run_update(&slot.id, &mut *agent, &mut slot.optimizer, &inputs, &settings)?;
    let elapsed = started.elapsed().as_secs_f64();

    info!(
        agent = %slot.id,
        state = ?outcome.state,
        steps = outcome.steps_made,
        kl_divergence = outcome.kl_divergence,
        elapsed,
        "agent updated"
    );

    let rewards = batch.rewards_vec()?;
    let dones = batch.dones_vec()?;
    let episodes = split_episodes(&rewards, &dones, &prepared.episode_lens);

    let mut metrics = AgentMetrics::new(&slot.id);
    record_outcome(&mut metrics, &outcome, config.use_sm);
    metrics.record("time_update", elapsed);
    metrics.record("total_steps", prepared.total_steps() as f64);
    metrics.record("entropy_coeff", entropy_coeff);
    metrics.record("episodes_this_iter", episodes.len() as f64);

    let lens: Vec<f64> = episodes.iter().map(|e| e.len() as f64).collect();
    let totals: Vec<f64> = episodes.iter().map(|e| e.total_reward()).collect();
    metrics.record_summary("episode_len", &lens, Spread::Population);
    metrics.record_summary("episode_reward", &totals, Spread::Sample);

    for analyzer in analyzers {
        for (name, value) in analyzer.analyze(&episodes) {
            metrics.record(&name, value);
        }
    }
    Ok(metrics.finish())
}

fn record_outcome(metrics: &mut AgentMetrics<'_>, outcome: &UpdateOutcome, use_sm: bool) {
    metrics.record("kl_divergence", outcome.kl_divergence);
    metrics.record("ppo_steps_made", outcome.steps_made as f64);
    metrics.record("policy_loss", outcome.losses.policy);
    metrics.record("value_loss", outcome.losses.value);
    if use_sm {
        metrics.record("sm_loss", outcome.losses.sm);
    }
    metrics.record("total_loss", outcome.losses.total);
    metrics.record("mean_entropy", outcome.entropy);
}
