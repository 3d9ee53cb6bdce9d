//! Multi-layer perceptron head

use burn::{
    module::{Ignored, Module},
    nn::{LayerNorm, LayerNormConfig, Linear, LinearConfig},
    tensor::{Tensor, backend::Backend},
};
use serde::{Deserialize, Serialize};

use super::activation::{Activation, KernelInit};
use crate::error::NetworkError;

/// Epsilon shared by every layer norm in the crate
pub const LAYER_NORM_EPSILON: f64 = 1e-6;

/// Configuration for an [`Mlp`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpConfig {
    pub input_size: usize,

    /// Width of every dense layer; the last entry is the output width
    pub layer_sizes: Vec<usize>,

    pub activation: Activation,

    pub kernel_init: KernelInit,

    /// Apply the activation (and layer norm) after the last layer too
    pub activate_final: bool,

    /// LayerNorm after each activation
    pub layer_norm: bool,

    pub use_bias: bool,
}

impl MlpConfig {
    pub fn new(input_size: usize, layer_sizes: Vec<usize>) -> Self {
        Self {
            input_size,
            layer_sizes,
            activation: Activation::Relu,
            kernel_init: KernelInit::LecunUniform,
            activate_final: false,
            layer_norm: false,
            use_bias: true,
        }
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn with_kernel_init(mut self, kernel_init: KernelInit) -> Self {
        self.kernel_init = kernel_init;
        self
    }

    pub fn with_activate_final(mut self, activate_final: bool) -> Self {
        self.activate_final = activate_final;
        self
    }

    pub fn with_layer_norm(mut self, layer_norm: bool) -> Self {
        self.layer_norm = layer_norm;
        self
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Mlp<B>, NetworkError> {
        if self.input_size == 0 || self.layer_sizes.is_empty() || self.layer_sizes.contains(&0) {
            return Err(NetworkError::InvalidArchitecture(format!(
                "mlp needs a non-zero input ({}) and non-empty, non-zero layer sizes ({:?})",
                self.input_size, self.layer_sizes
            )));
        }

        let last = self.layer_sizes.len() - 1;
        let mut layers = Vec::with_capacity(self.layer_sizes.len());
        let mut norms = Vec::new();
        let mut fan_in = self.input_size;

        for (i, &size) in self.layer_sizes.iter().enumerate() {
            layers.push(
                LinearConfig::new(fan_in, size)
                    .with_bias(self.use_bias)
                    .with_initializer(self.kernel_init.initializer())
                    .init(device),
            );
            if self.layer_norm && (i != last || self.activate_final) {
                norms.push(
                    LayerNormConfig::new(size)
                        .with_epsilon(LAYER_NORM_EPSILON)
                        .init(device),
                );
            }
            fan_in = size;
        }

        Ok(Mlp {
            layers,
            norms,
            activation: Ignored(self.activation),
            activate_final: Ignored(self.activate_final),
        })
    }
}

/// Dense stack: `Linear -> activation [-> LayerNorm]` per hidden layer
#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    layers: Vec<Linear<B>>,
    /// One per activated layer, empty when layer norm is off
    norms: Vec<LayerNorm<B>>,
    activation: Ignored<Activation>,
    activate_final: Ignored<bool>,
}

impl<B: Backend> Mlp<B> {
    /// `[batch, input_size]` -> `[batch, layer_sizes.last()]`
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let last = self.layers.len() - 1;
        let mut norms = self.norms.iter();
        let mut x = input;

        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.forward(x);
            if i != last || self.activate_final.0 {
                x = self.activation.0.apply(x);
                if let Some(norm) = norms.next() {
                    x = norm.forward(x);
                }
            }
        }

        x
    }

    pub fn output_size(&self) -> usize {
        self.layers
            .last()
            .map(|layer| layer.weight.val().dims()[1])
            .unwrap_or_default()
    }
}
