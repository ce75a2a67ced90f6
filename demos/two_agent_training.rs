// Demonstration: train two MLP agents on a synthetic signalling task.
//
// Each agent sees a noisy cue and is rewarded for picking the action the cue
// points to. Episodes end when an agent picks wrong or after `MAX_LEN` steps.
//
// Build/run from this repo root:
//   cargo run --example two_agent_training -- --iterations 20 --seed 7

use std::env;

use ppoptim::{
    Action, Agent, AgentStep, ConsoleSink, GlobalDataBatch, MlpAgent, MlpAgentConfig, PpoConfig,
    PpoOptimizer, TerminalRewardRatios, TimeStep,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde_json::json;
use tch::Device;
use tracing::info;
use tracing_subscriber::EnvFilter;

const OBS_DIM: usize = 3;
const ACTIONS: usize = 2;
const MAX_LEN: usize = 8;
const STEPS_PER_BATCH: usize = 256;
const AGENTS: [&str; 2] = ["left", "right"];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let args: Vec<String> = env::args().collect();
    let iterations: u64 = arg_value(&args, "--iterations")
        .and_then(|s| s.parse().ok())
        .unwrap_or(20);
    let seed: u64 = arg_value(&args, "--seed")
        .and_then(|s| s.parse().ok())
        .unwrap_or(42);
    tch::manual_seed(seed as i64);
    let mut rng = StdRng::seed_from_u64(seed);

    let config = PpoConfig::from_overrides(json!({
        "gamma": 0.9,
        "ppo_steps": 10,
        "eps": 0.2,
        "target_kl": 0.02,
        "entropy_decay_time": 10.0,
        "optimizer_kwargs": { "lr": 3e-3 },
    }))?;

    let agent_config = MlpAgentConfig::new(OBS_DIM, ACTIONS).with_hidden(vec![32, 32]);
    let agents = AGENTS
        .iter()
        .map(|id| {
            let agent: Box<dyn Agent> =
                Box::new(MlpAgent::new(&agent_config, Device::Cpu));
            (id.to_string(), agent)
        })
        .collect();
    let mut optimizer = PpoOptimizer::new(agents, config)?.with_analyzer(
        TerminalRewardRatios::new()
            .category("correct", 1.0)
            .category("wrong", f64::NEG_INFINITY),
    );

    // Rollout copies of the agents; refreshed from the trained weights each iteration.
    let mut actors: Vec<MlpAgent> = AGENTS
        .iter()
        .map(|_| MlpAgent::new(&agent_config, Device::Cpu))
        .collect();

    for step in 0..iterations {
        for (id, actor) in AGENTS.iter().zip(actors.iter_mut()) {
            if let Some(trained) = optimizer.agent(id) {
                actor.var_store_mut().copy(trained.var_store())?;
            }
        }

        let batch = collect(&actors, &mut rng);
        let metrics = optimizer.train_on_data(&batch, step, Some(&ConsoleSink))?;
        for id in AGENTS {
            info!(
                step,
                agent = id,
                reward = metrics[&format!("{id}/episode_reward_mean")],
                correct = metrics[&format!("{id}/ratio_correct")],
                ppo_steps = metrics[&format!("{id}/ppo_steps_made")],
                "iteration done"
            );
        }
    }
    Ok(())
}

/// Rolls out every agent for `STEPS_PER_BATCH` steps.
///
/// Agents play independent episodes in lockstep, so each record holds one
/// sub-record per agent.
fn collect(actors: &[MlpAgent], rng: &mut StdRng) -> GlobalDataBatch {
    let mut episode_step = vec![0usize; actors.len()];
    (0..STEPS_PER_BATCH)
        .map(|_| {
            let mut record = TimeStep::new();
            for (i, actor) in actors.iter().enumerate() {
                let target = rng.gen_range(0..ACTIONS as i64);
                let cue: f32 = if target == 0 { -1.0 } else { 1.0 };
                let observation = vec![
                    cue + rng.gen_range(-0.5f32..0.5),
                    rng.gen_range(-1.0f32..1.0),
                    episode_step[i] as f32 / MAX_LEN as f32,
                ];
                let (action, logprob) = actor.sample_action(&observation);
                let correct = action == target;
                episode_step[i] += 1;
                let done = !correct || episode_step[i] >= MAX_LEN;
                if done {
                    episode_step[i] = 0;
                }
                record.insert(
                    AGENTS[i].to_string(),
                    AgentStep {
                        observation,
                        action: Action::Discrete(action),
                        reward: if correct { 1.0 } else { -1.0 },
                        logprob,
                        done,
                        state: vec![],
                        tom: vec![],
                    },
                );
            }
            record
        })
        .collect()
}

fn arg_value<'a>(args: &'a [String], key: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == key)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}
