//! PPO learner
//!
//! Owns the network bundle, the optimizer and the observation normalizer, and
//! turns recorded rollouts into parameter updates.

use anyhow::{Context, Result};
use burn::{
    module::AutodiffModule,
    optim::{Adam, AdamConfig, GradientsParams, Optimizer, adaptor::OptimizerAdaptor},
    tensor::{Int, Tensor, TensorData, backend::AutodiffBackend, backend::Backend},
};
use rand::Rng;
use rand::seq::SliceRandom;
use tracing::{debug, info};

use super::config::PpoConfig;
use super::grad_clip::clip_by_global_norm;
use super::losses::{LossBatch, LossMetrics, compute_gae, ppo_loss};
use super::network::FeedForwardNetwork;
use super::normalization::RunningStatistics;
use super::observation::Observation;
use super::ppo::{PpoNetworks, VisionPpoNetworksConfig, make_vision_ppo_networks};
use crate::error::RolloutError;
use crate::metrics::TrainingStats;

/// One trajectory of `T` consecutive environment steps
///
/// Recorded on the inference backend by a stochastic [`PpoPolicy`].
///
/// [`PpoPolicy`]: super::ppo::PpoPolicy
#[derive(Debug, Clone)]
pub struct Rollout<B: Backend> {
    observations: Observation<B>,
    raw_actions: Tensor<B, 2>,
    log_probs: Vec<f32>,
    rewards: Vec<f32>,
    terminations: Vec<bool>,
    truncations: Vec<bool>,
    bootstrap_observation: Observation<B>,
}

impl<B: Backend> Rollout<B> {
    /// Assemble a rollout, checking that every field covers the same steps
    ///
    /// `bootstrap_observation` is the observation after the last step, with
    /// a batch of one.
    pub fn new(
        observations: Observation<B>,
        raw_actions: Tensor<B, 2>,
        log_probs: Vec<f32>,
        rewards: Vec<f32>,
        terminations: Vec<bool>,
        truncations: Vec<bool>,
        bootstrap_observation: Observation<B>,
    ) -> Result<Self, RolloutError> {
        let len = observations.batch_size()?;
        if len == 0 {
            return Err(RolloutError::Empty);
        }

        for (field, actual) in [
            ("raw_actions", raw_actions.dims()[0]),
            ("log_probs", log_probs.len()),
            ("rewards", rewards.len()),
            ("terminations", terminations.len()),
            ("truncations", truncations.len()),
        ] {
            if actual != len {
                return Err(RolloutError::LengthMismatch {
                    field,
                    expected: len,
                    actual,
                });
            }
        }

        let bootstrap = bootstrap_observation.batch_size()?;
        if bootstrap != 1 {
            return Err(RolloutError::LengthMismatch {
                field: "bootstrap_observation",
                expected: 1,
                actual: bootstrap,
            });
        }

        Ok(Self {
            observations,
            raw_actions,
            log_probs,
            rewards,
            terminations,
            truncations,
            bootstrap_observation,
        })
    }

    pub fn len(&self) -> usize {
        self.rewards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rewards.is_empty()
    }

    pub fn observations(&self) -> &Observation<B> {
        &self.observations
    }

    pub fn rewards(&self) -> &[f32] {
        &self.rewards
    }
}

/// Averaged losses of one [`PpoLearner::update`]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UpdateMetrics {
    pub losses: LossMetrics,
    pub minibatches: usize,
}

/// PPO learner over an autodiff backend
///
/// # Example
///
/// ```rust,ignore
/// use vision_ppo::rl::{PpoConfig, PpoLearner, TrainingBackend, VisionPpoNetworksConfig, default_device};
///
/// let learner = PpoLearner::<TrainingBackend>::new(
///     VisionPpoNetworksConfig::default(),
///     PpoConfig::default(),
///     default_device(),
/// )?;
/// ```
pub struct PpoLearner<B: AutodiffBackend> {
    networks: PpoNetworks<B>,
    optim: OptimizerAdaptor<Adam, PpoNetworks<B>, B>,
    network_config: VisionPpoNetworksConfig,
    config: PpoConfig,
    normalizer: Option<RunningStatistics>,
    training_step: usize,
    env_steps: usize,
    stats: TrainingStats,
    device: B::Device,
}

impl<B: AutodiffBackend> PpoLearner<B> {
    /// Build fresh networks and an optimizer
    pub fn new(
        network_config: VisionPpoNetworksConfig,
        config: PpoConfig,
        device: B::Device,
    ) -> Result<Self> {
        let networks = make_vision_ppo_networks::<B>(&network_config, &device)
            .context("Failed to build PPO networks")?;
        let normalizer = match network_config.observation_size.state_size() {
            Some(dim) if config.normalize_observations => Some(RunningStatistics::new(dim)),
            _ => None,
        };
        Self::from_parts(networks, network_config, config, normalizer, 0, 0, device)
    }

    /// Reassemble a learner from restored state
    pub fn from_parts(
        networks: PpoNetworks<B>,
        network_config: VisionPpoNetworksConfig,
        config: PpoConfig,
        normalizer: Option<RunningStatistics>,
        training_step: usize,
        env_steps: usize,
        device: B::Device,
    ) -> Result<Self> {
        config.validate().context("Invalid PPO configuration")?;

        let optim = AdamConfig::new().init();

        Ok(Self {
            networks,
            optim,
            network_config,
            config,
            normalizer,
            training_step,
            env_steps,
            stats: TrainingStats::new(100),
            device,
        })
    }

    /// Run `n_epochs` of minibatch PPO over one rollout
    pub fn update<R: Rng + ?Sized>(
        &mut self,
        rollout: &Rollout<B::InnerBackend>,
        rng: &mut R,
    ) -> Result<UpdateMetrics> {
        let len = rollout.len();
        let distribution = *self.networks.distribution();

        let action_size = rollout.raw_actions.dims()[1];
        if action_size != distribution.event_size {
            return Err(RolloutError::LengthMismatch {
                field: "raw_actions width",
                expected: distribution.event_size,
                actual: action_size,
            }
            .into());
        }

        // committed only once the update succeeds
        let mut normalizer = self.normalizer.clone();
        if let (Some(normalizer), Some(state)) =
            (normalizer.as_mut(), rollout.observations.state())
        {
            normalizer
                .update(state.clone())
                .context("Failed to update observation statistics")?;
        }

        // Value targets come from the pre-update parameters, without gradients
        let inference = self.networks.valid();
        let values: Vec<f32> = inference
            .value_network
            .apply(&normalizer, &rollout.observations)?
            .into_data()
            .iter::<f32>()
            .collect();
        let bootstrap_value = inference
            .value_network
            .apply(&normalizer, &rollout.bootstrap_observation)?
            .into_data()
            .iter::<f32>()
            .next()
            .unwrap_or_default();

        let rewards: Vec<f32> = rollout
            .rewards
            .iter()
            .map(|r| r * self.config.reward_scaling)
            .collect();
        let gae = compute_gae(
            &rollout.truncations,
            &rollout.terminations,
            &rewards,
            &values,
            bootstrap_value,
            self.config.gae_lambda,
            self.config.gamma,
        )?;

        let observations = Observation::<B>::from_inner(rollout.observations.clone());
        let raw_actions = Tensor::<B, 2>::from_inner(rollout.raw_actions.clone());
        let log_probs = self.vector(rollout.log_probs.clone());
        let advantages = self.vector(gae.advantages);
        let value_targets = self.vector(gae.vs);

        let mut totals = LossMetrics::default();
        let mut minibatches = 0;
        let mut max_grad_norm = 0.0_f32;
        let mut order: Vec<usize> = (0..len).collect();

        for _epoch in 0..self.config.n_epochs {
            order.shuffle(rng);

            for chunk in order.chunks(self.config.batch_size) {
                let indices = self.indices(chunk);
                let batch_obs = observations.clone().select(indices.clone());

                let policy_logits = self
                    .networks
                    .policy_network
                    .apply(&normalizer, &batch_obs)?;
                let values = self
                    .networks
                    .value_network
                    .apply(&normalizer, &batch_obs)?;

                let batch = LossBatch {
                    policy_logits,
                    values,
                    raw_actions: raw_actions.clone().select(0, indices.clone()),
                    behaviour_log_probs: log_probs.clone().select(0, indices.clone()),
                    advantages: advantages.clone().select(0, indices.clone()),
                    value_targets: value_targets.clone().select(0, indices),
                };
                let loss = ppo_loss(&distribution, batch, &self.config, rng);

                let grads = loss.total.backward();
                let grads = GradientsParams::from_grads(grads, &self.networks);
                let (grads, grad_norm) =
                    clip_by_global_norm(&self.networks, grads, self.config.max_grad_norm);
                max_grad_norm = max_grad_norm.max(grad_norm);
                self.networks =
                    self.optim
                        .step(self.config.learning_rate, self.networks.clone(), grads);

                accumulate(&mut totals, &loss.metrics);
                minibatches += 1;
            }
        }

        let n = minibatches.max(1) as f32;
        let losses = LossMetrics {
            total_loss: totals.total_loss / n,
            policy_loss: totals.policy_loss / n,
            value_loss: totals.value_loss / n,
            entropy_loss: totals.entropy_loss / n,
            entropy: totals.entropy / n,
        };

        self.normalizer = normalizer;
        self.training_step += 1;
        self.env_steps += len;

        let mean_reward = rollout.rewards.iter().sum::<f32>() / len as f32;
        self.stats.record_update(&losses, len, mean_reward);

        debug!(
            step = self.training_step,
            minibatches,
            total_loss = losses.total_loss,
            max_grad_norm,
            "ppo update"
        );
        info!("{}", self.stats.format_summary());

        Ok(UpdateMetrics {
            losses,
            minibatches,
        })
    }

    fn vector(&self, values: Vec<f32>) -> Tensor<B, 1> {
        let len = values.len();
        Tensor::from_data(TensorData::new(values, [len]), &self.device)
    }

    fn indices(&self, chunk: &[usize]) -> Tensor<B, 1, Int> {
        let values: Vec<i64> = chunk.iter().map(|&i| i as i64).collect();
        Tensor::from_data(TensorData::new(values, [chunk.len()]), &self.device)
    }

    pub fn networks(&self) -> &PpoNetworks<B> {
        &self.networks
    }

    /// Inference copy of the current networks
    pub fn inference_networks(&self) -> PpoNetworks<B::InnerBackend> {
        self.networks.valid()
    }

    pub fn network_config(&self) -> &VisionPpoNetworksConfig {
        &self.network_config
    }

    pub fn config(&self) -> &PpoConfig {
        &self.config
    }

    pub fn normalizer(&self) -> Option<&RunningStatistics> {
        self.normalizer.as_ref()
    }

    pub fn training_step(&self) -> usize {
        self.training_step
    }

    pub fn env_steps(&self) -> usize {
        self.env_steps
    }

    pub fn stats(&self) -> &TrainingStats {
        &self.stats
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }
}

fn accumulate(totals: &mut LossMetrics, metrics: &LossMetrics) {
    totals.total_loss += metrics.total_loss;
    totals.policy_loss += metrics.policy_loss;
    totals.value_loss += metrics.value_loss;
    totals.entropy_loss += metrics.entropy_loss;
    totals.entropy += metrics.entropy;
}
