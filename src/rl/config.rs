//! PPO algorithm hyperparameter configuration

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration for the PPO (Proximal Policy Optimization) learner
///
/// # Example
///
/// ```rust
/// use vision_ppo::rl::PpoConfig;
///
/// let config = PpoConfig {
///     learning_rate: 1e-3,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PpoConfig {
    /// Learning rate for the Adam optimizer
    ///
    /// Default: 3e-4
    pub learning_rate: f64,

    /// Discount factor for future rewards
    ///
    /// Default: 0.99
    pub gamma: f32,

    /// GAE lambda, trading bias against variance in the advantage estimate
    ///
    /// Default: 0.95
    pub gae_lambda: f32,

    /// PPO clipping parameter (epsilon)
    ///
    /// Default: 0.3
    pub clip_epsilon: f32,

    /// Coefficient for the entropy bonus
    ///
    /// Default: 0.01
    pub entropy_coef: f32,

    /// Coefficient for the value loss
    ///
    /// Default: 0.5
    pub value_coef: f32,

    /// Rewards are multiplied by this before GAE
    ///
    /// Default: 1.0
    pub reward_scaling: f32,

    /// Standardize advantages within each minibatch
    ///
    /// Default: false
    pub normalize_advantage: bool,

    /// Global gradient norm clip
    ///
    /// Default: 0.5
    pub max_grad_norm: f32,

    /// Passes over the rollout per update
    ///
    /// Default: 4
    pub n_epochs: usize,

    /// Minibatch size
    ///
    /// Default: 64
    pub batch_size: usize,

    /// Track running statistics of the `state` observation and normalize it
    ///
    /// Default: true
    pub normalize_observations: bool,
}

impl PpoConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that every hyperparameter is in range
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: String| Err(ConfigError::Validation(msg));

        if self.learning_rate <= 0.0 {
            return fail(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            ));
        }

        if !(0.0..=1.0).contains(&self.gamma) {
            return fail(format!("gamma must be in [0, 1], got {}", self.gamma));
        }

        if !(0.0..=1.0).contains(&self.gae_lambda) {
            return fail(format!(
                "gae_lambda must be in [0, 1], got {}",
                self.gae_lambda
            ));
        }

        if self.clip_epsilon <= 0.0 || self.clip_epsilon > 1.0 {
            return fail(format!(
                "clip_epsilon must be in (0, 1], got {}",
                self.clip_epsilon
            ));
        }

        if self.entropy_coef < 0.0 {
            return fail(format!(
                "entropy_coef must be non-negative, got {}",
                self.entropy_coef
            ));
        }

        if self.value_coef < 0.0 {
            return fail(format!(
                "value_coef must be non-negative, got {}",
                self.value_coef
            ));
        }

        if !self.reward_scaling.is_finite() || self.reward_scaling <= 0.0 {
            return fail(format!(
                "reward_scaling must be positive, got {}",
                self.reward_scaling
            ));
        }

        if self.max_grad_norm <= 0.0 {
            return fail(format!(
                "max_grad_norm must be positive, got {}",
                self.max_grad_norm
            ));
        }

        if self.n_epochs == 0 {
            return fail("n_epochs must be at least 1".to_string());
        }

        if self.batch_size == 0 {
            return fail("batch_size must be at least 1".to_string());
        }

        Ok(())
    }
}

impl Default for PpoConfig {
    fn default() -> Self {
        Self {
            learning_rate: 3e-4,
            gamma: 0.99,
            gae_lambda: 0.95,
            clip_epsilon: 0.3,
            entropy_coef: 0.01,
            value_coef: 0.5,
            reward_scaling: 1.0,
            normalize_advantage: false,
            max_grad_norm: 0.5,
            n_epochs: 4,
            batch_size: 64,
            normalize_observations: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PpoConfig::default();
        assert_eq!(config.learning_rate, 3e-4);
        assert_eq!(config.gamma, 0.99);
        assert_eq!(config.gae_lambda, 0.95);
        assert_eq!(config.clip_epsilon, 0.3);
        assert_eq!(config.value_coef, 0.5);
        assert_eq!(config.reward_scaling, 1.0);
        assert!(!config.normalize_advantage);
        assert!(config.normalize_observations);
        assert_eq!(config, PpoConfig::new());
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(PpoConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validation_negative_learning_rate() {
        let mut config = PpoConfig::default();
        config.learning_rate = -0.1;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("learning_rate"));
    }

    #[test]
    fn test_validation_discounts_out_of_range() {
        let mut config = PpoConfig::default();
        config.gamma = 1.5;
        assert!(config.validate().is_err());

        config.gamma = 0.99;
        config.gae_lambda = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_clip_epsilon_invalid() {
        let mut config = PpoConfig::default();
        config.clip_epsilon = 0.0;
        assert!(config.validate().is_err());

        config.clip_epsilon = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_negative_coefficients() {
        let mut config = PpoConfig::default();
        config.entropy_coef = -0.1;
        assert!(config.validate().is_err());

        config.entropy_coef = 0.01;
        config.value_coef = -0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_reward_scaling() {
        let mut config = PpoConfig::default();
        config.reward_scaling = 0.0;
        assert!(config.validate().is_err());

        config.reward_scaling = f32::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_zero_epochs_or_batch() {
        let mut config = PpoConfig::default();
        config.n_epochs = 0;
        assert!(config.validate().is_err());

        config.n_epochs = 1;
        config.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: PpoConfig = toml::from_str("learning_rate = 1e-3\nn_epochs = 10").unwrap();
        assert_eq!(config.learning_rate, 1e-3);
        assert_eq!(config.n_epochs, 10);
        assert_eq!(config.clip_epsilon, 0.3);
        assert!(config.validate().is_ok());
    }
}
