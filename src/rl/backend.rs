//! Backend type aliases and device management
//!
//! - **TrainingBackend**: Autodiff-enabled NdArray backend used by [`PpoLearner`](super::PpoLearner)
//! - **InferenceBackend**: Plain NdArray backend for acting with a loaded policy
//!
//! Every network in this crate is generic over `B: Backend`, so swapping in a
//! GPU backend only changes these aliases.

use burn::backend::{
    Autodiff,
    ndarray::{NdArray, NdArrayDevice},
};
use burn::tensor::backend::Backend;

/// Backend type for training (with autodiff)
pub type TrainingBackend = Autodiff<NdArray<f32>>;

/// Backend type for inference (without autodiff)
pub type InferenceBackend = NdArray<f32>;

/// Get the default device for computation (CPU)
pub fn default_device() -> NdArrayDevice {
    NdArrayDevice::default()
}

/// Seed the backend's parameter/tensor RNG
///
/// Network initialization draws from the backend RNG, so seeding it before
/// `init` makes parameter trees reproducible.
pub fn seed_backend<B: Backend>(seed: u64) {
    B::seed(seed);
}
