//! Rolling statistics over PPO updates

use std::collections::VecDeque;

use crate::rl::LossMetrics;

/// Loss and reward tracker with rolling averages
///
/// # Example
///
/// ```rust
/// use vision_ppo::metrics::TrainingStats;
/// use vision_ppo::rl::LossMetrics;
///
/// let mut stats = TrainingStats::new(100);
/// stats.record_update(
///     &LossMetrics {
///         policy_loss: 0.02,
///         value_loss: 0.05,
///         entropy: 0.8,
///         ..Default::default()
///     },
///     2048,
///     0.5,
/// );
///
/// assert_eq!(stats.total_updates(), 1);
/// println!("{}", stats.format_summary());
/// ```
#[derive(Debug, Clone)]
pub struct TrainingStats {
    policy_losses: VecDeque<f32>,
    value_losses: VecDeque<f32>,
    entropies: VecDeque<f32>,
    total_losses: VecDeque<f32>,

    /// Mean per-step reward of each rollout
    rollout_rewards: VecDeque<f32>,

    total_updates: usize,
    total_steps: usize,
    window_size: usize,
}

impl TrainingStats {
    pub fn new(window_size: usize) -> Self {
        Self {
            policy_losses: VecDeque::with_capacity(window_size),
            value_losses: VecDeque::with_capacity(window_size),
            entropies: VecDeque::with_capacity(window_size),
            total_losses: VecDeque::with_capacity(window_size),
            rollout_rewards: VecDeque::with_capacity(window_size),
            total_updates: 0,
            total_steps: 0,
            window_size,
        }
    }

    /// Record one learner update
    ///
    /// `steps` is the number of environment steps in the rollout and
    /// `mean_reward` its mean unscaled reward.
    pub fn record_update(&mut self, losses: &LossMetrics, steps: usize, mean_reward: f32) {
        let window = self.window_size;
        Self::push_deque(&mut self.policy_losses, losses.policy_loss, window);
        Self::push_deque(&mut self.value_losses, losses.value_loss, window);
        Self::push_deque(&mut self.entropies, losses.entropy, window);
        Self::push_deque(&mut self.total_losses, losses.total_loss, window);
        Self::push_deque(&mut self.rollout_rewards, mean_reward, window);
        self.total_updates += 1;
        self.total_steps += steps;
    }

    pub fn mean_policy_loss(&self) -> f32 {
        Self::mean(&self.policy_losses)
    }

    pub fn mean_value_loss(&self) -> f32 {
        Self::mean(&self.value_losses)
    }

    pub fn mean_entropy(&self) -> f32 {
        Self::mean(&self.entropies)
    }

    pub fn mean_total_loss(&self) -> f32 {
        Self::mean(&self.total_losses)
    }

    pub fn mean_rollout_reward(&self) -> f32 {
        Self::mean(&self.rollout_rewards)
    }

    pub fn total_updates(&self) -> usize {
        self.total_updates
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// One-line summary for logs
    pub fn format_summary(&self) -> String {
        format!(
            "Updates: {} | Steps: {} | Reward: {:.4} | Loss: {:.4} | P_Loss: {:.4} | V_Loss: {:.4} | Entropy: {:.4}",
            self.total_updates,
            self.total_steps,
            self.mean_rollout_reward(),
            self.mean_total_loss(),
            self.mean_policy_loss(),
            self.mean_value_loss(),
            self.mean_entropy(),
        )
    }

    fn mean(deque: &VecDeque<f32>) -> f32 {
        if deque.is_empty() {
            0.0
        } else {
            deque.iter().sum::<f32>() / deque.len() as f32
        }
    }

    fn push_deque<T>(deque: &mut VecDeque<T>, value: T, window_size: usize) {
        if deque.len() >= window_size {
            deque.pop_front();
        }
        deque.push_back(value);
    }
}
