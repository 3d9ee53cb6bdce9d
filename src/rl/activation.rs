//! Activation functions and kernel initializers shared by the CNN and MLP blocks

use burn::nn::Initializer;
use burn::tensor::{Tensor, activation, backend::Backend};
use serde::{Deserialize, Serialize};

/// Element-wise activation applied between layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Relu,
    /// SiLU, `x * sigmoid(x)`
    #[default]
    Swish,
    Tanh,
    Gelu,
    Sigmoid,
    Identity,
}

impl Activation {
    pub fn apply<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Activation::Relu => activation::relu(x),
            Activation::Swish => activation::silu(x),
            Activation::Tanh => activation::tanh(x),
            Activation::Gelu => activation::gelu(x),
            Activation::Sigmoid => activation::sigmoid(x),
            Activation::Identity => x,
        }
    }
}

/// Weight initialization scheme for dense and convolutional kernels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KernelInit {
    /// U(-sqrt(3 / fan_in), sqrt(3 / fan_in))
    #[default]
    LecunUniform,
    /// N(0, 1 / fan_in)
    LecunNormal,
    GlorotUniform,
    GlorotNormal,
}

impl KernelInit {
    /// Map to the equivalent burn initializer
    ///
    /// Kaiming with a gain of 1 is exactly the LeCun family.
    pub fn initializer(&self) -> Initializer {
        match self {
            KernelInit::LecunUniform => Initializer::KaimingUniform {
                gain: 1.0,
                fan_out_only: false,
            },
            KernelInit::LecunNormal => Initializer::KaimingNormal {
                gain: 1.0,
                fan_out_only: false,
            },
            KernelInit::GlorotUniform => Initializer::XavierUniform { gain: 1.0 },
            KernelInit::GlorotNormal => Initializer::XavierNormal { gain: 1.0 },
        }
    }
}
