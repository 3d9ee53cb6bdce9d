//! PPO network bundle and inference policy
//!
//! [`make_vision_ppo_networks`] wires a NormalTanh action distribution to a
//! vision policy network (emitting the distribution parameters) and a vision
//! value network. [`make_policy`] turns the bundle into an acting policy.

use burn::{
    module::{Ignored, Module},
    tensor::{Tensor, backend::Backend},
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::activation::Activation;
use super::distribution::{NormalTanhDistribution, ParametricDistribution};
use super::network::{
    FeedForwardNetwork, NetworkType, VisionPolicyNetwork, VisionPolicyNetworkConfig,
    VisionValueNetwork, VisionValueNetworkConfig,
};
use super::normalization::StatePreprocessor;
use super::observation::{Observation, ObservationSize};
use crate::error::{NetworkError, ObservationError};

/// Architecture of the policy/value pair
///
/// `observation_size` is kept last so the TOML form can end with its table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionPpoNetworksConfig {
    #[serde(default)]
    pub network_type: NetworkType,

    /// Dimension of the continuous action space
    pub action_size: usize,

    #[serde(default = "default_hidden_layer_sizes")]
    pub policy_hidden_layer_sizes: Vec<usize>,

    #[serde(default = "default_hidden_layer_sizes")]
    pub value_hidden_layer_sizes: Vec<usize>,

    #[serde(default)]
    pub activation: Activation,

    /// LayerNorm in the policy MLP
    #[serde(default)]
    pub policy_layer_norm: bool,

    #[serde(default)]
    pub normalise_channels: bool,

    pub observation_size: ObservationSize,
}

fn default_hidden_layer_sizes() -> Vec<usize> {
    vec![256, 256]
}

impl Default for VisionPpoNetworksConfig {
    fn default() -> Self {
        Self {
            network_type: NetworkType::Cnn,
            action_size: 4,
            policy_hidden_layer_sizes: default_hidden_layer_sizes(),
            value_hidden_layer_sizes: default_hidden_layer_sizes(),
            activation: Activation::Swish,
            policy_layer_norm: false,
            normalise_channels: false,
            observation_size: ObservationSize::new()
                .with_pixels("pixels/view_0", [64, 64, 3])
                .with_state(8),
        }
    }
}

impl VisionPpoNetworksConfig {
    pub fn new(observation_size: ObservationSize, action_size: usize) -> Self {
        Self {
            action_size,
            observation_size,
            ..Default::default()
        }
    }

    pub fn with_policy_hidden_layer_sizes(mut self, sizes: Vec<usize>) -> Self {
        self.policy_hidden_layer_sizes = sizes;
        self
    }

    pub fn with_value_hidden_layer_sizes(mut self, sizes: Vec<usize>) -> Self {
        self.value_hidden_layer_sizes = sizes;
        self
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn with_policy_layer_norm(mut self, layer_norm: bool) -> Self {
        self.policy_layer_norm = layer_norm;
        self
    }

    pub fn with_normalise_channels(mut self, normalise_channels: bool) -> Self {
        self.normalise_channels = normalise_channels;
        self
    }

    pub fn validate(&self) -> Result<(), NetworkError> {
        if self.action_size == 0 {
            return Err(NetworkError::InvalidArchitecture(
                "action_size must be at least 1".to_string(),
            ));
        }
        self.observation_size.validate()?;
        Ok(())
    }
}

/// Policy network, value network and the action distribution they share
#[derive(Module, Debug)]
pub struct PpoNetworks<B: Backend> {
    pub policy_network: VisionPolicyNetwork<B>,
    pub value_network: VisionValueNetwork<B>,
    pub parametric_action_distribution: Ignored<NormalTanhDistribution>,
}

impl<B: Backend> PpoNetworks<B> {
    pub fn distribution(&self) -> &NormalTanhDistribution {
        &self.parametric_action_distribution.0
    }
}

/// Build the PPO policy/value pair for image observations
pub fn make_vision_ppo_networks<B: Backend>(
    config: &VisionPpoNetworksConfig,
    device: &B::Device,
) -> Result<PpoNetworks<B>, NetworkError> {
    config.validate()?;

    let distribution = NormalTanhDistribution::new(config.action_size);
    let param_size = ParametricDistribution::<B>::param_size(&distribution);

    let policy_network = VisionPolicyNetworkConfig::new(config.observation_size.clone(), param_size)
        .with_network_type(config.network_type)
        .with_hidden_layer_sizes(config.policy_hidden_layer_sizes.clone())
        .with_activation(config.activation)
        .with_layer_norm(config.policy_layer_norm)
        .with_normalise_channels(config.normalise_channels)
        .init(device)?;

    let value_network = VisionValueNetworkConfig::new(config.observation_size.clone())
        .with_network_type(config.network_type)
        .with_hidden_layer_sizes(config.value_hidden_layer_sizes.clone())
        .with_activation(config.activation)
        .with_normalise_channels(config.normalise_channels)
        .init(device)?;

    debug!(
        action_size = config.action_size,
        param_size,
        pixel_streams = config.observation_size.pixel_keys().len(),
        "built vision PPO networks"
    );

    Ok(PpoNetworks {
        policy_network,
        value_network,
        parametric_action_distribution: Ignored(distribution),
    })
}

/// Per-step data a stochastic policy reports alongside its action
#[derive(Debug, Clone)]
pub struct PolicyExtras<B: Backend> {
    /// `[batch]` log-probability of `raw_action`
    pub log_prob: Tensor<B, 1>,
    /// `[batch, action_size]` pre-tanh sample
    pub raw_action: Tensor<B, 2>,
}

/// Acting policy over a borrowed network bundle
pub struct PpoPolicy<'a, B: Backend, P: StatePreprocessor> {
    networks: &'a PpoNetworks<B>,
    processor: &'a P,
    deterministic: bool,
}

/// Bind networks and state preprocessor into a policy
pub fn make_policy<'a, B: Backend, P: StatePreprocessor>(
    networks: &'a PpoNetworks<B>,
    processor: &'a P,
    deterministic: bool,
) -> PpoPolicy<'a, B, P> {
    PpoPolicy {
        networks,
        processor,
        deterministic,
    }
}

impl<B: Backend, P: StatePreprocessor> PpoPolicy<'_, B, P> {
    pub fn is_deterministic(&self) -> bool {
        self.deterministic
    }

    /// Actions in `(-1, 1)`, shape `[batch, action_size]`
    ///
    /// The deterministic policy returns the distribution mode and no extras.
    pub fn act<R: Rng + ?Sized>(
        &self,
        observation: &Observation<B>,
        rng: &mut R,
    ) -> Result<(Tensor<B, 2>, Option<PolicyExtras<B>>), ObservationError> {
        let logits = self
            .networks
            .policy_network
            .apply(self.processor, observation)?;
        let distribution = self.networks.distribution();

        if self.deterministic {
            return Ok((distribution.mode(logits), None));
        }

        let raw_action = distribution.sample_no_postprocessing(logits.clone(), rng);
        let log_prob = distribution.log_prob(logits, raw_action.clone());
        let action = distribution.postprocess(raw_action.clone());

        Ok((
            action,
            Some(PolicyExtras {
                log_prob,
                raw_action,
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rl::normalization::{Identity, RunningStatistics};
    use burn::backend::ndarray::{NdArray, NdArrayDevice};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    type TestBackend = NdArray<f32>;

    fn small_config() -> VisionPpoNetworksConfig {
        VisionPpoNetworksConfig::new(
            ObservationSize::new()
                .with_pixels("pixels/view_0", [16, 16, 3])
                .with_state(4),
            3,
        )
        .with_policy_hidden_layer_sizes(vec![16, 16])
        .with_value_hidden_layer_sizes(vec![16])
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = VisionPpoNetworksConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.policy_hidden_layer_sizes, vec![256, 256]);
        assert_eq!(config.activation, Activation::Swish);
    }

    #[test]
    fn test_zero_action_size_rejected() {
        let mut config = small_config();
        config.action_size = 0;
        let result = make_vision_ppo_networks::<TestBackend>(&config, &NdArrayDevice::default());
        assert!(matches!(result, Err(NetworkError::InvalidArchitecture(_))));
    }

    #[test]
    fn test_network_output_shapes() {
        let device = NdArrayDevice::default();
        let config = small_config();
        let networks = make_vision_ppo_networks::<TestBackend>(&config, &device).unwrap();

        let obs = config.observation_size.random::<TestBackend>(5, &device);
        let logits = networks.policy_network.apply(&Identity, &obs).unwrap();
        let values = networks.value_network.apply(&Identity, &obs).unwrap();

        assert_eq!(logits.dims(), [5, 6]);
        assert_eq!(values.dims(), [5]);
        assert_eq!(networks.distribution().event_size, 3);
    }

    #[test]
    fn test_deterministic_policy_returns_mode_without_extras() {
        let device = NdArrayDevice::default();
        let config = small_config();
        let networks = make_vision_ppo_networks::<TestBackend>(&config, &device).unwrap();
        let policy = make_policy(&networks, &Identity, true);
        assert!(policy.is_deterministic());

        let obs = config.observation_size.random::<TestBackend>(2, &device);
        let mut rng = StdRng::seed_from_u64(0);
        let (first, extras) = policy.act(&obs, &mut rng).unwrap();
        let (second, _) = policy.act(&obs, &mut rng).unwrap();

        assert!(extras.is_none());
        let first: Vec<f32> = first.into_data().to_vec().unwrap();
        let second: Vec<f32> = second.into_data().to_vec().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_stochastic_policy_reports_extras() {
        let device = NdArrayDevice::default();
        let config = small_config();
        let networks = make_vision_ppo_networks::<TestBackend>(&config, &device).unwrap();
        let policy = make_policy(&networks, &Identity, false);

        let obs = config.observation_size.random::<TestBackend>(4, &device);
        let mut rng = StdRng::seed_from_u64(7);
        let (action, extras) = policy.act(&obs, &mut rng).unwrap();
        let extras = extras.unwrap();

        assert_eq!(action.dims(), [4, 3]);
        assert_eq!(extras.raw_action.dims(), [4, 3]);
        assert_eq!(extras.log_prob.dims(), [4]);

        let action: Vec<f32> = action.into_data().to_vec().unwrap();
        let raw: Vec<f32> = extras.raw_action.into_data().to_vec().unwrap();
        for (a, r) in action.iter().zip(&raw) {
            assert!((a - r.tanh()).abs() < 1e-6);
        }

        let log_prob: Vec<f32> = extras.log_prob.into_data().to_vec().unwrap();
        assert!(log_prob.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_policy_uses_preprocessor() {
        let device = NdArrayDevice::default();
        let config = small_config();
        let networks = make_vision_ppo_networks::<TestBackend>(&config, &device).unwrap();

        let mut stats = RunningStatistics::new(4);
        stats
            .update(Tensor::<TestBackend, 2>::from_floats(
                [[10.0, 10.0, 10.0, 10.0], [30.0, 30.0, 30.0, 30.0]],
                &device,
            ))
            .unwrap();

        let obs = config.observation_size.random::<TestBackend>(1, &device);
        let mut rng = StdRng::seed_from_u64(0);
        let (raw, _) = make_policy(&networks, &Identity, true).act(&obs, &mut rng).unwrap();
        let (normalized, _) = make_policy(&networks, &stats, true).act(&obs, &mut rng).unwrap();

        let raw: Vec<f32> = raw.into_data().to_vec().unwrap();
        let normalized: Vec<f32> = normalized.into_data().to_vec().unwrap();
        assert_ne!(raw, normalized);
    }

    #[test]
    fn test_config_toml_round_trip() {
        let config = small_config();
        let text = toml::to_string(&config).unwrap();
        let restored: VisionPpoNetworksConfig = toml::from_str(&text).unwrap();
        assert_eq!(restored, config);
    }

    #[test]
    fn test_unknown_network_type_in_toml() {
        let text = r#"
            network_type = "transformer"
            action_size = 2

            [observation_size]
            state = [3]
        "#;
        let err = toml::from_str::<VisionPpoNetworksConfig>(text).unwrap_err();
        assert!(err.to_string().contains("Unsupported network_type: transformer"));
    }
}
