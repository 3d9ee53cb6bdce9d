//! Vision PPO networks and training
//!
//! Provides:
//! - Named pixel/state observations
//! - Nature-CNN encoders feeding an MLP head
//! - Policy and value networks with a NormalTanh action distribution
//! - GAE, the clipped PPO loss and a minibatch learner
//! - Checkpoint persistence

pub mod activation;
pub mod backend;
pub mod cnn;
pub mod config;
pub mod distribution;
pub mod grad_clip;
pub mod learner;
pub mod losses;
pub mod mlp;
pub mod network;
pub mod normalization;
pub mod observation;
pub mod persistence;
pub mod ppo;
pub mod vision_mlp;

pub use activation::{Activation, KernelInit};
pub use backend::{InferenceBackend, TrainingBackend, default_device, seed_backend};
pub use cnn::{Cnn, CnnConfig};
pub use config::PpoConfig;
pub use distribution::{NormalTanhDistribution, ParametricDistribution};
pub use grad_clip::{clip_by_global_norm, global_norm};
pub use learner::{PpoLearner, Rollout, UpdateMetrics};
pub use losses::{GaeOutput, LossBatch, LossMetrics, LossOutput, compute_gae, ppo_loss};
pub use mlp::{Mlp, MlpConfig};
pub use network::{
    FeedForwardNetwork, NetworkType, VisionPolicyNetwork, VisionPolicyNetworkConfig,
    VisionValueNetwork, VisionValueNetworkConfig,
};
pub use normalization::{Identity, RunningStatistics, StatePreprocessor};
pub use observation::{Observation, ObservationSize, PIXELS_PREFIX, STATE_KEY};
pub use persistence::{
    CheckpointMetadata, load_checkpoint, load_metadata, load_networks, save_checkpoint,
    save_networks,
};
pub use ppo::{
    PolicyExtras, PpoNetworks, PpoPolicy, VisionPpoNetworksConfig, make_policy,
    make_vision_ppo_networks,
};
pub use vision_mlp::{VisionMlp, VisionMlpConfig, normalize_channels};
