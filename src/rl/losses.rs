//! Generalized advantage estimation and the clipped PPO objective

use burn::tensor::{ElementConversion, Tensor, backend::Backend};
use rand::Rng;

use super::config::PpoConfig;
use super::distribution::ParametricDistribution;
use crate::error::RolloutError;

/// Value targets and advantages for one trajectory
#[derive(Debug, Clone, PartialEq)]
pub struct GaeOutput {
    /// `v_s` targets for the value function
    pub vs: Vec<f32>,
    pub advantages: Vec<f32>,
}

/// GAE over a single trajectory of length `T`
///
/// `truncation[t]` marks a step cut short by a time limit: its delta and
/// advantage are zeroed and nothing propagates back through it.
/// `termination[t]` marks a true end of episode: the next value is not
/// bootstrapped.
pub fn compute_gae(
    truncation: &[bool],
    termination: &[bool],
    rewards: &[f32],
    values: &[f32],
    bootstrap_value: f32,
    lambda: f32,
    discount: f32,
) -> Result<GaeOutput, RolloutError> {
    let len = rewards.len();
    if len == 0 {
        return Err(RolloutError::Empty);
    }
    for (field, actual) in [
        ("truncation", truncation.len()),
        ("termination", termination.len()),
        ("values", values.len()),
    ] {
        if actual != len {
            return Err(RolloutError::LengthMismatch {
                field,
                expected: len,
                actual,
            });
        }
    }

    let mask = |flag: bool| if flag { 0.0 } else { 1.0 };
    let next = |series: &[f32], t: usize| {
        if t + 1 < len {
            series[t + 1]
        } else {
            bootstrap_value
        }
    };

    let mut vs_minus_v = vec![0.0f32; len];
    let mut acc = 0.0f32;
    for t in (0..len).rev() {
        let not_done = mask(termination[t]);
        let not_truncated = mask(truncation[t]);

        let delta = (rewards[t] + discount * not_done * next(values, t) - values[t]) * not_truncated;
        acc = delta + discount * not_done * not_truncated * lambda * acc;
        vs_minus_v[t] = acc;
    }

    let vs: Vec<f32> = vs_minus_v.iter().zip(values).map(|(d, v)| d + v).collect();

    let advantages = (0..len)
        .map(|t| {
            let not_done = mask(termination[t]);
            (rewards[t] + discount * not_done * next(vs.as_slice(), t) - values[t]) * mask(truncation[t])
        })
        .collect();

    Ok(GaeOutput { vs, advantages })
}

/// One minibatch of PPO training data; every tensor shares the leading axis
#[derive(Debug, Clone)]
pub struct LossBatch<B: Backend> {
    /// Current policy output, `[batch, param_size]`
    pub policy_logits: Tensor<B, 2>,
    /// Current value estimate, `[batch]`
    pub values: Tensor<B, 1>,
    /// Pre-postprocessing actions taken during the rollout
    pub raw_actions: Tensor<B, 2>,
    /// Log-probabilities recorded by the behaviour policy
    pub behaviour_log_probs: Tensor<B, 1>,
    pub advantages: Tensor<B, 1>,
    pub value_targets: Tensor<B, 1>,
}

/// Scalar breakdown of the PPO objective
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LossMetrics {
    pub total_loss: f32,
    pub policy_loss: f32,
    pub value_loss: f32,
    pub entropy_loss: f32,
    pub entropy: f32,
}

/// Differentiable total loss plus its scalar breakdown
#[derive(Debug)]
pub struct LossOutput<B: Backend> {
    pub total: Tensor<B, 1>,
    pub metrics: LossMetrics,
}

fn scalar<B: Backend>(tensor: &Tensor<B, 1>) -> f32 {
    tensor.clone().into_scalar().elem::<f32>()
}

/// Clipped surrogate + value regression + entropy bonus
pub fn ppo_loss<B, D, R>(
    distribution: &D,
    batch: LossBatch<B>,
    config: &PpoConfig,
    rng: &mut R,
) -> LossOutput<B>
where
    B: Backend,
    D: ParametricDistribution<B>,
    R: Rng + ?Sized,
{
    let LossBatch {
        policy_logits,
        values,
        raw_actions,
        behaviour_log_probs,
        advantages,
        value_targets,
    } = batch;

    let advantages = if config.normalize_advantage {
        normalize(advantages)
    } else {
        advantages
    };

    let target_log_probs = distribution.log_prob(policy_logits.clone(), raw_actions);
    let rho = (target_log_probs - behaviour_log_probs).exp();

    let surrogate1 = rho.clone() * advantages.clone();
    let surrogate2 = rho.clamp(1.0 - config.clip_epsilon, 1.0 + config.clip_epsilon) * advantages;
    let policy_loss = surrogate1.min_pair(surrogate2).mean().neg();

    let v_error = value_targets - values;
    let value_loss = v_error
        .powf_scalar(2.0)
        .mean()
        .mul_scalar(0.5 * config.value_coef);

    let entropy = distribution.entropy(policy_logits, rng).mean();
    let entropy_loss = entropy.clone().mul_scalar(-config.entropy_coef);

    let total = policy_loss.clone() + value_loss.clone() + entropy_loss.clone();

    let metrics = LossMetrics {
        total_loss: scalar(&total),
        policy_loss: scalar(&policy_loss),
        value_loss: scalar(&value_loss),
        entropy_loss: scalar(&entropy_loss),
        entropy: scalar(&entropy),
    };

    LossOutput { total, metrics }
}

/// Zero mean, unit (population) std
fn normalize<B: Backend>(advantages: Tensor<B, 1>) -> Tensor<B, 1> {
    let centered = advantages.clone() - advantages.mean();
    let std = centered.clone().powf_scalar(2.0).mean().sqrt();
    centered / std.add_scalar(1e-8)
}
