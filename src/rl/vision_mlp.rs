//! Vision encoder + MLP head
//!
//! # Architecture
//!
//! ```text
//! for each pixels/<k> in sorted order:
//!   [batch, H, W, C]
//!     ↓ (optional) per-channel normalization over H, W
//!     ↓ Nature-CNN (own weights per stream)
//!     ↓ mean over H', W'           → [batch, 64]
//! state (optional)                 → [batch, S]
//!   ↓ concat                       → [batch, 64·k + S]
//!   ↓ MLP(layer_sizes)
//! ```

use burn::{
    module::{Ignored, Module},
    tensor::{Tensor, backend::Backend},
};
use serde::{Deserialize, Serialize};

use super::activation::{Activation, KernelInit};
use super::cnn::{Cnn, CnnConfig};
use super::mlp::{LAYER_NORM_EPSILON, Mlp, MlpConfig};
use super::observation::{Observation, ObservationSize};
use crate::error::{NetworkError, ObservationError};

/// Configuration for a [`VisionMlp`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionMlpConfig {
    /// MLP widths; the last entry is the output width
    pub layer_sizes: Vec<usize>,
    pub activation: Activation,
    pub kernel_init: KernelInit,
    pub activate_final: bool,
    pub layer_norm: bool,
    /// Normalize every image channel over its spatial axes before the CNN
    pub normalise_channels: bool,
}

impl VisionMlpConfig {
    pub fn new(layer_sizes: Vec<usize>) -> Self {
        Self {
            layer_sizes,
            activation: Activation::Relu,
            kernel_init: KernelInit::LecunUniform,
            activate_final: false,
            layer_norm: false,
            normalise_channels: false,
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

    pub fn with_layer_norm(mut self, layer_norm: bool) -> Self {
        self.layer_norm = layer_norm;
        self
    }

    pub fn with_normalise_channels(mut self, normalise_channels: bool) -> Self {
        self.normalise_channels = normalise_channels;
        self
    }

    /// Build one CNN tower per pixel stream and size the MLP input from the
    /// observation layout
    pub fn init<B: Backend>(
        &self,
        observation_size: &ObservationSize,
        device: &B::Device,
    ) -> Result<VisionMlp<B>, NetworkError> {
        observation_size.validate()?;

        let pixel_keys = observation_size.pixel_keys();
        let mut towers = Vec::with_capacity(pixel_keys.len());
        let mut feature_size = 0;

        for key in &pixel_keys {
            let channels = observation_size
                .pixel_channels(key)
                .ok_or_else(|| ObservationError::UnknownKey(key.clone()))?;
            let cnn_config = CnnConfig::nature(channels);
            feature_size += cnn_config.output_channels();
            towers.push(cnn_config.init(device)?);
        }

        feature_size += observation_size.state_size().unwrap_or_default();

        let mlp = MlpConfig::new(feature_size, self.layer_sizes.clone())
            .with_activation(self.activation)
            .with_kernel_init(self.kernel_init)
            .with_activate_final(self.activate_final)
            .with_layer_norm(self.layer_norm)
            .init(device)?;

        Ok(VisionMlp {
            towers,
            mlp,
            observation_size: Ignored(observation_size.clone()),
            normalise_channels: Ignored(self.normalise_channels),
        })
    }
}

/// Per-stream Nature-CNN towers feeding a shared MLP
#[derive(Module, Debug)]
pub struct VisionMlp<B: Backend> {
    /// One per pixel stream, in sorted key order
    towers: Vec<Cnn<B>>,
    mlp: Mlp<B>,
    /// Layout the towers and MLP input were sized for
    observation_size: Ignored<ObservationSize>,
    normalise_channels: Ignored<bool>,
}

impl<B: Backend> VisionMlp<B> {
    /// Forward pass
    ///
    /// # Errors
    ///
    /// Fails when the observation's pixel keys, image shapes or state width
    /// differ from the layout the module was built for.
    pub fn forward(&self, observation: &Observation<B>) -> Result<Tensor<B, 2>, ObservationError> {
        self.check(observation)?;

        let mut features: Vec<Tensor<B, 2>> = observation
            .pixels()
            .zip(self.towers.iter())
            .map(|((_, pixels), cnn)| {
                let pixels = if self.normalise_channels.0 {
                    normalize_channels(pixels.clone())
                } else {
                    pixels.clone()
                };
                spatial_mean(cnn.forward(pixels))
            })
            .collect();

        if let Some(state) = observation.state() {
            features.push(state.clone());
        }

        Ok(self.mlp.forward(Tensor::cat(features, 1)))
    }

    pub fn pixel_keys(&self) -> Vec<String> {
        self.observation_size.0.pixel_keys()
    }

    pub fn observation_size(&self) -> &ObservationSize {
        &self.observation_size.0
    }

    pub fn output_size(&self) -> usize {
        self.mlp.output_size()
    }

    fn check(&self, observation: &Observation<B>) -> Result<(), ObservationError> {
        if observation.is_empty() {
            return Err(ObservationError::Empty);
        }

        self.observation_size.0.check(observation)?;

        // a state the layout has no room for
        let expected_state = self.observation_size.0.state_size();
        if let (None, Some(state)) = (expected_state, observation.state()) {
            return Err(ObservationError::Shape {
                key: super::observation::STATE_KEY.to_string(),
                expected: "no state".to_string(),
                actual: vec![state.dims()[1]],
            });
        }

        observation.batch_size().map(|_| ())
    }
}

/// Normalize every (sample, channel) image plane to zero mean and unit
/// variance over its spatial axes, with no learned scale or offset
///
/// `[batch, H, W, C]` in, same shape out.
pub fn normalize_channels<B: Backend>(images: Tensor<B, 4>) -> Tensor<B, 4> {
    let mean = images.clone().mean_dim(1).mean_dim(2);
    let centered = images - mean;
    let variance = centered.clone().powf_scalar(2.0).mean_dim(1).mean_dim(2);
    centered / variance.add_scalar(LAYER_NORM_EPSILON).sqrt()
}

/// `[batch, H, W, C]` → `[batch, C]`
fn spatial_mean<B: Backend>(features: Tensor<B, 4>) -> Tensor<B, 2> {
    let [batch, _, _, channels] = features.dims();
    features.mean_dim(1).mean_dim(2).reshape([batch, channels])
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::Autodiff;
    use burn::backend::ndarray::{NdArray, NdArrayDevice};
    use burn::tensor::{Distribution, TensorData};

    type TestBackend = NdArray<f32>;
    type TestAutodiffBackend = Autodiff<NdArray<f32>>;

    fn observation_size() -> ObservationSize {
        ObservationSize::new()
            .with_pixels("pixels/view_0", [32, 32, 3])
            .with_pixels("pixels/view_1", [20, 28, 1])
            .with_state(5)
    }

    #[test]
    fn test_forward_shape() {
        let device = NdArrayDevice::default();
        let net = VisionMlpConfig::new(vec![64, 6])
            .init::<TestBackend>(&observation_size(), &device)
            .unwrap();

        let obs = observation_size().random::<TestBackend>(4, &device);
        let out = net.forward(&obs).unwrap();

        assert_eq!(out.dims(), [4, 6]);
        assert_eq!(net.output_size(), 6);
        assert_eq!(net.pixel_keys(), ["pixels/view_0", "pixels/view_1"]);
    }

    #[test]
    fn test_pixels_only_observation() {
        let device = NdArrayDevice::default();
        let size = ObservationSize::new().with_pixels("pixels/cam", [16, 16, 3]);
        let net = VisionMlpConfig::new(vec![8, 1])
            .with_normalise_channels(true)
            .init::<TestBackend>(&size, &device)
            .unwrap();

        let out = net.forward(&size.random::<TestBackend>(2, &device)).unwrap();
        assert_eq!(out.dims(), [2, 1]);
    }

    #[test]
    fn test_state_only_observation() {
        let device = NdArrayDevice::default();
        let size = ObservationSize::new().with_state(9);
        let net = VisionMlpConfig::new(vec![8, 3])
            .init::<TestBackend>(&size, &device)
            .unwrap();

        let out = net.forward(&size.zeros::<TestBackend>(2, &device)).unwrap();
        assert_eq!(out.dims(), [2, 3]);
    }

    #[test]
    fn test_rejects_missing_stream() {
        let device = NdArrayDevice::default();
        let net = VisionMlpConfig::new(vec![8, 2])
            .init::<TestBackend>(&observation_size(), &device)
            .unwrap();

        let partial = ObservationSize::new()
            .with_pixels("pixels/view_0", [32, 32, 3])
            .with_state(5)
            .zeros::<TestBackend>(1, &device);

        assert!(matches!(
            net.forward(&partial),
            Err(ObservationError::KeyMismatch { .. })
        ));
    }

    #[test]
    fn test_rejects_wrong_state_width() {
        let device = NdArrayDevice::default();
        let net = VisionMlpConfig::new(vec![8, 2])
            .init::<TestBackend>(&observation_size(), &device)
            .unwrap();

        let obs = observation_size()
            .zeros::<TestBackend>(1, &device)
            .with_state(Tensor::zeros([1, 4], &device));

        assert!(matches!(
            net.forward(&obs),
            Err(ObservationError::Shape { .. })
        ));
    }

    #[test]
    fn test_rejects_wrong_channel_count() {
        let device = NdArrayDevice::default();
        let size = ObservationSize::new().with_pixels("pixels/view_0", [24, 24, 3]);
        let net = VisionMlpConfig::new(vec![8, 2])
            .init::<TestBackend>(&size, &device)
            .unwrap();

        let obs = Observation::<TestBackend>::new()
            .with_pixels("pixels/view_0", Tensor::zeros([1, 24, 24, 4], &device))
            .unwrap();

        assert_eq!(
            net.forward(&obs).unwrap_err(),
            ObservationError::Shape {
                key: "pixels/view_0".to_string(),
                expected: "Some([24, 24, 3])".to_string(),
                actual: vec![24, 24, 4],
            }
        );
    }

    #[test]
    fn test_rejects_wrong_image_size() {
        let device = NdArrayDevice::default();
        let net = VisionMlpConfig::new(vec![8, 2])
            .init::<TestBackend>(&observation_size(), &device)
            .unwrap();

        let obs = observation_size()
            .zeros::<TestBackend>(1, &device)
            .with_pixels("pixels/view_1", Tensor::zeros([1, 28, 20, 1], &device))
            .unwrap();

        assert!(matches!(
            net.forward(&obs),
            Err(ObservationError::Shape { key, .. }) if key == "pixels/view_1"
        ));
    }

    #[test]
    fn test_rejects_unexpected_state() {
        let device = NdArrayDevice::default();
        let size = ObservationSize::new().with_pixels("pixels/cam", [16, 16, 3]);
        let net = VisionMlpConfig::new(vec![8, 1])
            .init::<TestBackend>(&size, &device)
            .unwrap();

        let obs = size
            .zeros::<TestBackend>(1, &device)
            .with_state(Tensor::zeros([1, 2], &device));

        assert!(matches!(
            net.forward(&obs),
            Err(ObservationError::Shape { .. })
        ));
    }

    #[test]
    fn test_empty_observation_size_rejected() {
        let device = NdArrayDevice::default();
        let result =
            VisionMlpConfig::new(vec![8]).init::<TestBackend>(&ObservationSize::new(), &device);
        assert!(matches!(
            result,
            Err(NetworkError::Observation(ObservationError::Empty))
        ));
    }

    #[test]
    fn test_normalize_channels_statistics() {
        let device = NdArrayDevice::default();
        let images = Tensor::<TestBackend, 4>::random(
            [2, 10, 12, 3],
            Distribution::Normal(5.0, 3.0),
            &device,
        );

        let normalized = normalize_channels(images);
        let mean: Vec<f32> = normalized
            .clone()
            .mean_dim(1)
            .mean_dim(2)
            .into_data()
            .to_vec()
            .unwrap();
        let var: Vec<f32> = normalized
            .powf_scalar(2.0)
            .mean_dim(1)
            .mean_dim(2)
            .into_data()
            .to_vec()
            .unwrap();

        assert_eq!(mean.len(), 6);
        assert!(mean.iter().all(|m| m.abs() < 1e-4), "{mean:?}");
        assert!(var.iter().all(|v| (v - 1.0).abs() < 1e-3), "{var:?}");
    }

    #[test]
    fn test_normalize_channels_keeps_channels_independent() {
        let device = NdArrayDevice::default();
        // channel 0 is constant, channel 1 varies
        let data: Vec<f32> = (0..8).flat_map(|i| [7.0, i as f32]).collect();
        let images =
            Tensor::<TestBackend, 4>::from_data(TensorData::new(data, [1, 2, 4, 2]), &device);

        let out: Vec<f32> = normalize_channels(images).into_data().to_vec().unwrap();
        for pixel in out.chunks(2) {
            assert!(pixel[0].abs() < 1e-6, "constant channel should map to 0");
        }
        assert!(out.chunks(2).any(|pixel| pixel[1].abs() > 0.5));
    }

    #[test]
    fn test_batch_consistency() {
        let device = NdArrayDevice::default();
        let size = observation_size();
        let net = VisionMlpConfig::new(vec![16, 4])
            .init::<TestBackend>(&size, &device)
            .unwrap();

        let single = size.random::<TestBackend>(1, &device);
        let indices = Tensor::from_ints([0, 0, 0], &device);
        let batch = single.clone().select(indices);

        let single_out: Vec<f32> = net.forward(&single).unwrap().into_data().to_vec().unwrap();
        let batch_out: Vec<f32> = net.forward(&batch).unwrap().into_data().to_vec().unwrap();

        for row in batch_out.chunks(4) {
            for (a, b) in row.iter().zip(&single_out) {
                assert!((a - b).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_gradient_flows_through_every_input() {
        let device = NdArrayDevice::default();
        let size = observation_size();
        let net = VisionMlpConfig::new(vec![16, 2])
            .with_activation(Activation::Swish)
            .init::<TestAutodiffBackend>(&size, &device)
            .unwrap();

        let state = Tensor::random([2, 5], Distribution::Normal(0.0, 1.0), &device).require_grad();
        let view_0 = Tensor::random([2, 32, 32, 3], Distribution::Uniform(0.0, 1.0), &device)
            .require_grad();
        let obs = size
            .random::<TestAutodiffBackend>(2, &device)
            .with_pixels("pixels/view_0", view_0.clone())
            .unwrap()
            .with_state(state.clone());

        let grads = net.forward(&obs).unwrap().sum().backward();

        assert!(state.grad(&grads).is_some());
        assert!(view_0.grad(&grads).is_some());
    }
}
