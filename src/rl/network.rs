//! Vision policy and value networks
//!
//! Both networks wrap a [`VisionMlp`] and expose the same two operations:
//!
//! - `init` builds the parameter tree for a given observation layout and
//!   traces a dummy all-zero observation through it.
//! - [`FeedForwardNetwork::apply`] runs the state preprocessor (the
//!   "processor params") over `state` and then the module itself.
//!
//! # Example
//!
//! ```rust
//! use vision_ppo::rl::{
//!     FeedForwardNetwork, Identity, ObservationSize, VisionPolicyNetworkConfig,
//! };
//! use burn::backend::NdArray;
//! use burn::backend::ndarray::NdArrayDevice;
//!
//! type Backend = NdArray<f32>;
//!
//! let device = NdArrayDevice::default();
//! let size = ObservationSize::new()
//!     .with_pixels("pixels/view_0", [32, 32, 3])
//!     .with_state(4);
//! let policy = VisionPolicyNetworkConfig::new(size.clone(), 6)
//!     .init::<Backend>(&device)
//!     .unwrap();
//!
//! let out = policy.apply(&Identity, &size.zeros(2, &device)).unwrap();
//! assert_eq!(out.dims(), [2, 6]);
//! ```

use std::fmt;
use std::str::FromStr;

use burn::{
    module::Module,
    tensor::{Tensor, backend::Backend},
};
use serde::{Deserialize, Serialize};

use super::activation::{Activation, KernelInit};
use super::backend::seed_backend;
use super::normalization::StatePreprocessor;
use super::observation::{Observation, ObservationSize};
use super::vision_mlp::{VisionMlp, VisionMlpConfig};
use crate::error::{NetworkError, ObservationError};

/// Architecture selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NetworkType {
    /// Nature-CNN towers + MLP
    #[default]
    Cnn,
}

impl NetworkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkType::Cnn => "cnn",
        }
    }
}

impl FromStr for NetworkType {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cnn" => Ok(NetworkType::Cnn),
            other => Err(NetworkError::UnsupportedNetworkType(other.to_string())),
        }
    }
}

impl TryFrom<String> for NetworkType {
    type Error = NetworkError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NetworkType> for String {
    fn from(value: NetworkType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A network applied as `apply(processor_params, observation)`
pub trait FeedForwardNetwork<B: Backend> {
    type Output;

    fn apply<P: StatePreprocessor>(
        &self,
        processor: &P,
        observation: &Observation<B>,
    ) -> Result<Self::Output, ObservationError>;
}

fn preprocess<B: Backend, P: StatePreprocessor>(
    processor: &P,
    observation: &Observation<B>,
) -> Observation<B> {
    observation
        .clone()
        .map_state(|state| processor.preprocess(state))
}

fn build_module<B: Backend>(
    network_type: NetworkType,
    observation_size: &ObservationSize,
    module_config: VisionMlpConfig,
    device: &B::Device,
) -> Result<VisionMlp<B>, NetworkError> {
    let module = match network_type {
        NetworkType::Cnn => module_config.init::<B>(observation_size, device)?,
    };

    // Shape trace with a dummy batch of one
    let dummy = observation_size.zeros::<B>(1, device);
    let [_, width] = module.forward(&dummy)?.dims();
    if width != module.output_size() {
        return Err(NetworkError::InvalidArchitecture(format!(
            "traced output width {width} != configured {}",
            module.output_size()
        )));
    }

    Ok(module)
}

/// Configuration for a [`VisionPolicyNetwork`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionPolicyNetworkConfig {
    pub network_type: NetworkType,
    pub observation_size: ObservationSize,
    /// Width of the emitted distribution parameters
    pub output_size: usize,
    pub hidden_layer_sizes: Vec<usize>,
    pub activation: Activation,
    pub kernel_init: KernelInit,
    pub layer_norm: bool,
    pub normalise_channels: bool,
}

impl VisionPolicyNetworkConfig {
    pub fn new(observation_size: ObservationSize, output_size: usize) -> Self {
        Self {
            network_type: NetworkType::Cnn,
            observation_size,
            output_size,
            hidden_layer_sizes: vec![256, 256],
            activation: Activation::Swish,
            kernel_init: KernelInit::LecunUniform,
            layer_norm: false,
            normalise_channels: false,
        }
    }

    pub fn with_network_type(mut self, network_type: NetworkType) -> Self {
        self.network_type = network_type;
        self
    }

    pub fn with_hidden_layer_sizes(mut self, sizes: Vec<usize>) -> Self {
        self.hidden_layer_sizes = sizes;
        self
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn with_layer_norm(mut self, layer_norm: bool) -> Self {
        self.layer_norm = layer_norm;
        self
    }

    pub fn with_normalise_channels(mut self, normalise_channels: bool) -> Self {
        self.normalise_channels = normalise_channels;
        self
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<VisionPolicyNetwork<B>, NetworkError> {
        let mut layer_sizes = self.hidden_layer_sizes.clone();
        layer_sizes.push(self.output_size);

        let module_config = VisionMlpConfig::new(layer_sizes)
            .with_activation(self.activation)
            .with_kernel_init(self.kernel_init)
            .with_layer_norm(self.layer_norm)
            .with_normalise_channels(self.normalise_channels);

        let module = build_module(self.network_type, &self.observation_size, module_config, device)?;
        Ok(VisionPolicyNetwork { module })
    }

    /// Seed the backend RNG, then [`init`](Self::init)
    pub fn init_seeded<B: Backend>(
        &self,
        seed: u64,
        device: &B::Device,
    ) -> Result<VisionPolicyNetwork<B>, NetworkError> {
        seed_backend::<B>(seed);
        self.init(device)
    }
}

/// Policy network: observation → distribution parameters `[batch, output_size]`
#[derive(Module, Debug)]
pub struct VisionPolicyNetwork<B: Backend> {
    module: VisionMlp<B>,
}

impl<B: Backend> VisionPolicyNetwork<B> {
    pub fn output_size(&self) -> usize {
        self.module.output_size()
    }
}

impl<B: Backend> FeedForwardNetwork<B> for VisionPolicyNetwork<B> {
    type Output = Tensor<B, 2>;

    fn apply<P: StatePreprocessor>(
        &self,
        processor: &P,
        observation: &Observation<B>,
    ) -> Result<Tensor<B, 2>, ObservationError> {
        self.module.forward(&preprocess(processor, observation))
    }
}

/// Configuration for a [`VisionValueNetwork`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionValueNetworkConfig {
    pub network_type: NetworkType,
    pub observation_size: ObservationSize,
    pub hidden_layer_sizes: Vec<usize>,
    pub activation: Activation,
    pub kernel_init: KernelInit,
    pub normalise_channels: bool,
}

impl VisionValueNetworkConfig {
    pub fn new(observation_size: ObservationSize) -> Self {
        Self {
            network_type: NetworkType::Cnn,
            observation_size,
            hidden_layer_sizes: vec![256, 256],
            activation: Activation::Swish,
            kernel_init: KernelInit::LecunUniform,
            normalise_channels: false,
        }
    }

    pub fn with_network_type(mut self, network_type: NetworkType) -> Self {
        self.network_type = network_type;
        self
    }

    pub fn with_hidden_layer_sizes(mut self, sizes: Vec<usize>) -> Self {
        self.hidden_layer_sizes = sizes;
        self
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn with_normalise_channels(mut self, normalise_channels: bool) -> Self {
        self.normalise_channels = normalise_channels;
        self
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<VisionValueNetwork<B>, NetworkError> {
        let mut layer_sizes = self.hidden_layer_sizes.clone();
        layer_sizes.push(1);

        let module_config = VisionMlpConfig::new(layer_sizes)
            .with_activation(self.activation)
            .with_kernel_init(self.kernel_init)
            .with_normalise_channels(self.normalise_channels);

        let module = build_module(self.network_type, &self.observation_size, module_config, device)?;
        Ok(VisionValueNetwork { module })
    }

    /// Seed the backend RNG, then [`init`](Self::init)
    pub fn init_seeded<B: Backend>(
        &self,
        seed: u64,
        device: &B::Device,
    ) -> Result<VisionValueNetwork<B>, NetworkError> {
        seed_backend::<B>(seed);
        self.init(device)
    }
}

/// Value network: observation → scalar value estimate `[batch]`
#[derive(Module, Debug)]
pub struct VisionValueNetwork<B: Backend> {
    module: VisionMlp<B>,
}

impl<B: Backend> FeedForwardNetwork<B> for VisionValueNetwork<B> {
    type Output = Tensor<B, 1>;

    fn apply<P: StatePreprocessor>(
        &self,
        processor: &P,
        observation: &Observation<B>,
    ) -> Result<Tensor<B, 1>, ObservationError> {
        let values = self.module.forward(&preprocess(processor, observation))?;
        Ok(values.squeeze(1))
    }
}
