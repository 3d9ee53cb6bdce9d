//! Convolutional feature extractor
//!
//! A plain stack of `Conv2d + activation` layers with "SAME" padding. Images
//! enter and leave in `[batch, height, width, channels]` layout; internally the
//! stack runs in burn's channels-first layout.
//!
//! ```text
//! Nature-CNN preset (per pixel stream):
//!   Conv(C→32, k=8, s=4) + ReLU
//!   Conv(32→64, k=4, s=2) + ReLU
//!   Conv(64→64, k=3, s=1) + ReLU
//! ```

use burn::{
    module::{Ignored, Module},
    nn::{
        PaddingConfig2d,
        conv::{Conv2d, Conv2dConfig},
    },
    tensor::{Tensor, backend::Backend},
};
use serde::{Deserialize, Serialize};

use super::activation::{Activation, KernelInit};
use crate::error::NetworkError;

/// Configuration for a [`Cnn`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CnnConfig {
    /// Channels of the input image
    pub in_channels: usize,

    /// Output channels per layer
    pub num_filters: Vec<usize>,

    /// `[kh, kw]` per layer
    pub kernel_sizes: Vec<[usize; 2]>,

    /// `[sh, sw]` per layer
    pub strides: Vec<[usize; 2]>,

    pub activation: Activation,

    pub use_bias: bool,

    pub kernel_init: KernelInit,
}

impl CnnConfig {
    /// Create a CNN configuration with ReLU activations and biases
    pub fn new(
        in_channels: usize,
        num_filters: Vec<usize>,
        kernel_sizes: Vec<[usize; 2]>,
        strides: Vec<[usize; 2]>,
    ) -> Self {
        Self {
            in_channels,
            num_filters,
            kernel_sizes,
            strides,
            activation: Activation::Relu,
            use_bias: true,
            kernel_init: KernelInit::LecunNormal,
        }
    }

    /// The three-layer encoder from the DQN Nature paper, without biases
    pub fn nature(in_channels: usize) -> Self {
        Self::new(
            in_channels,
            vec![32, 64, 64],
            vec![[8, 8], [4, 4], [3, 3]],
            vec![[4, 4], [2, 2], [1, 1]],
        )
        .with_bias(false)
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn with_bias(mut self, use_bias: bool) -> Self {
        self.use_bias = use_bias;
        self
    }

    pub fn with_kernel_init(mut self, kernel_init: KernelInit) -> Self {
        self.kernel_init = kernel_init;
        self
    }

    /// Channels produced by the last layer
    pub fn output_channels(&self) -> usize {
        self.num_filters.last().copied().unwrap_or(self.in_channels)
    }

    pub fn validate(&self) -> Result<(), NetworkError> {
        let layers = self.num_filters.len();
        if self.kernel_sizes.len() != layers || self.strides.len() != layers {
            return Err(NetworkError::InvalidArchitecture(format!(
                "cnn has {} filter counts, {} kernel sizes and {} strides",
                layers,
                self.kernel_sizes.len(),
                self.strides.len()
            )));
        }

        let has_zero = self.in_channels == 0
            || self.num_filters.contains(&0)
            || self.kernel_sizes.iter().flatten().any(|&k| k == 0)
            || self.strides.iter().flatten().any(|&s| s == 0);
        if has_zero {
            return Err(NetworkError::InvalidArchitecture(
                "cnn channels, kernel sizes and strides must be non-zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Build the convolution stack
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Cnn<B>, NetworkError> {
        self.validate()?;

        let mut in_channels = self.in_channels;
        let mut convs = Vec::with_capacity(self.num_filters.len());
        for (i, &filters) in self.num_filters.iter().enumerate() {
            let conv = Conv2dConfig::new([in_channels, filters], self.kernel_sizes[i])
                .with_stride(self.strides[i])
                .with_padding(PaddingConfig2d::Valid)
                .with_bias(self.use_bias)
                .with_initializer(self.kernel_init.initializer())
                .init(device);
            convs.push(conv);
            in_channels = filters;
        }

        Ok(Cnn {
            convs,
            kernel_sizes: Ignored(self.kernel_sizes.clone()),
            strides: Ignored(self.strides.clone()),
            activation: Ignored(self.activation),
        })
    }
}

/// Convolutional stack with "SAME" padding
#[derive(Module, Debug)]
pub struct Cnn<B: Backend> {
    convs: Vec<Conv2d<B>>,
    kernel_sizes: Ignored<Vec<[usize; 2]>>,
    strides: Ignored<Vec<[usize; 2]>>,
    activation: Ignored<Activation>,
}

impl<B: Backend> Cnn<B> {
    /// Forward pass
    ///
    /// # Arguments
    ///
    /// * `images` - `[batch, height, width, channels]`
    ///
    /// # Returns
    ///
    /// `[batch, ceil(h / Πs), ceil(w / Πs), filters]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        // NHWC -> NCHW
        let mut x = images.permute([0, 3, 1, 2]);

        for (i, conv) in self.convs.iter().enumerate() {
            let [kh, kw] = self.kernel_sizes.0[i];
            let [sh, sw] = self.strides.0[i];
            let [_, _, height, width] = x.dims();

            let (top, bottom) = same_padding(height, kh, sh);
            let (left, right) = same_padding(width, kw, sw);
            if top + bottom + left + right > 0 {
                x = x.pad((left, right, top, bottom), 0.0);
            }

            x = self.activation.0.apply(conv.forward(x));
        }

        // NCHW -> NHWC
        x.permute([0, 2, 3, 1])
    }

    pub fn num_layers(&self) -> usize {
        self.convs.len()
    }
}

/// Low/high padding so that `out = ceil(input / stride)`
pub(crate) fn same_padding(input: usize, kernel: usize, stride: usize) -> (usize, usize) {
    let out = input.div_ceil(stride);
    let total = ((out.saturating_sub(1)) * stride + kernel).saturating_sub(input);
    let low = total / 2;
    (low, total - low)
}
