//! Checkpoint persistence
//!
//! A checkpoint is two files:
//! - `<path>.mpk` - network weights (Burn named MessagePack record)
//! - `<path>.meta.json` - everything needed to rebuild the learner around them

use super::{
    PpoConfig, PpoLearner, PpoNetworks, RunningStatistics, VisionPpoNetworksConfig,
    make_vision_ppo_networks,
};
use crate::error::CheckpointError;
use anyhow::{Context, Result};
use burn::{
    module::Module,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
    tensor::backend::{AutodiffBackend, Backend},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Metadata saved next to the weights
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub network_config: VisionPpoNetworksConfig,
    pub ppo_config: PpoConfig,
    pub training_steps: usize,
    pub env_steps: usize,
    pub normalizer: Option<RunningStatistics>,
    /// Crate version that wrote the checkpoint
    pub version: String,
}

impl CheckpointMetadata {
    pub fn new(
        network_config: VisionPpoNetworksConfig,
        ppo_config: PpoConfig,
        training_steps: usize,
        env_steps: usize,
        normalizer: Option<RunningStatistics>,
    ) -> Self {
        Self {
            network_config,
            ppo_config,
            training_steps,
            env_steps,
            normalizer,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    fn of<B: AutodiffBackend>(learner: &PpoLearner<B>) -> Self {
        Self::new(
            learner.network_config().clone(),
            learner.config().clone(),
            learner.training_step(),
            learner.env_steps(),
            learner.normalizer().cloned(),
        )
    }
}

/// Path of the metadata file belonging to `path`
pub fn metadata_path(path: &Path) -> PathBuf {
    path.with_extension("meta.json")
}

fn recorder() -> NamedMpkFileRecorder<FullPrecisionSettings> {
    NamedMpkFileRecorder::<FullPrecisionSettings>::new()
}

/// Save a learner's networks and metadata
///
/// Creates parent directories if they don't exist.
pub fn save_checkpoint<B: AutodiffBackend>(learner: &PpoLearner<B>, path: &Path) -> Result<()> {
    save_networks(learner.networks(), &CheckpointMetadata::of(learner), path)
}

/// Save a network bundle together with explicit metadata
pub fn save_networks<B: Backend>(
    networks: &PpoNetworks<B>,
    metadata: &CheckpointMetadata,
    path: &Path,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }

    recorder()
        .record(networks.clone().into_record(), path.to_path_buf())
        .context("Failed to save network weights")?;

    let meta_path = metadata_path(path);
    let meta_json =
        serde_json::to_string_pretty(metadata).context("Failed to serialize metadata")?;
    std::fs::write(&meta_path, meta_json)
        .with_context(|| format!("Failed to write metadata to {:?}", meta_path))?;

    info!(path = %path.display(), steps = metadata.training_steps, "saved checkpoint");
    Ok(())
}

/// Read only the metadata of a checkpoint
pub fn load_metadata(path: &Path) -> Result<CheckpointMetadata> {
    let meta_path = metadata_path(path);
    if !meta_path.exists() {
        return Err(CheckpointError::MetadataNotFound(meta_path).into());
    }

    let meta_json = std::fs::read_to_string(&meta_path)
        .with_context(|| format!("Failed to read metadata from {:?}", meta_path))?;
    serde_json::from_str(&meta_json).context("Failed to deserialize metadata")
}

/// Rebuild the networks described by a checkpoint and load their weights
pub fn load_networks<B: Backend>(
    path: &Path,
    device: &B::Device,
) -> Result<(PpoNetworks<B>, CheckpointMetadata)> {
    let metadata = load_metadata(path)?;

    let networks = make_vision_ppo_networks::<B>(&metadata.network_config, device)
        .map_err(CheckpointError::from)?;

    let record = recorder()
        .load(path.to_path_buf(), device)
        .with_context(|| format!("Failed to load network weights from {:?}", path))?;

    Ok((networks.load_record(record), metadata))
}

/// Restore a learner, counters and normalizer included
///
/// Optimizer moments are not persisted; Adam restarts from zero.
pub fn load_checkpoint<B: AutodiffBackend>(
    path: &Path,
    device: &B::Device,
) -> Result<PpoLearner<B>> {
    let (networks, metadata) = load_networks::<B>(path, device)?;

    PpoLearner::from_parts(
        networks,
        metadata.network_config,
        metadata.ppo_config,
        metadata.normalizer,
        metadata.training_steps,
        metadata.env_steps,
        device.clone(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rl::{
        FeedForwardNetwork, Identity, InferenceBackend, ObservationSize, TrainingBackend,
        default_device,
    };
    use tempfile::TempDir;

    fn network_config() -> VisionPpoNetworksConfig {
        VisionPpoNetworksConfig::new(
            ObservationSize::new()
                .with_pixels("pixels/view_0", [12, 12, 3])
                .with_state(2),
            2,
        )
        .with_policy_hidden_layer_sizes(vec![8])
        .with_value_hidden_layer_sizes(vec![8])
    }

    #[test]
    fn test_metadata_serialization() {
        let metadata = CheckpointMetadata::new(
            network_config(),
            PpoConfig::default(),
            1000,
            64_000,
            Some(RunningStatistics::new(2)),
        );

        let json = serde_json::to_string(&metadata).unwrap();
        let restored: CheckpointMetadata = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.network_config, metadata.network_config);
        assert_eq!(restored.training_steps, 1000);
        assert_eq!(restored.env_steps, 64_000);
        assert_eq!(restored.normalizer, metadata.normalizer);
        assert_eq!(restored.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_metadata_path() {
        let path = Path::new("/tmp/run/model");
        assert_eq!(metadata_path(path), Path::new("/tmp/run/model.meta.json"));
    }

    #[test]
    fn test_missing_metadata() {
        let dir = TempDir::new().unwrap();
        let err = load_metadata(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CheckpointError>(),
            Some(CheckpointError::MetadataNotFound(_))
        ));
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("model");
        let device = default_device();

        let learner =
            PpoLearner::<TrainingBackend>::new(network_config(), PpoConfig::default(), device)
                .unwrap();
        save_checkpoint(&learner, &path).unwrap();
        assert!(metadata_path(&path).exists());

        let restored = load_checkpoint::<TrainingBackend>(&path, &device).unwrap();
        assert_eq!(restored.network_config(), learner.network_config());
        assert_eq!(restored.training_step(), 0);
        assert_eq!(restored.normalizer(), learner.normalizer());

        let obs = network_config()
            .observation_size
            .random::<InferenceBackend>(3, &device);
        let expected: Vec<f32> = learner
            .inference_networks()
            .policy_network
            .apply(&Identity, &obs)
            .unwrap()
            .into_data()
            .to_vec()
            .unwrap();
        let actual: Vec<f32> = restored
            .inference_networks()
            .policy_network
            .apply(&Identity, &obs)
            .unwrap()
            .into_data()
            .to_vec()
            .unwrap();
        assert_eq!(expected, actual);
    }

    #[test]
    fn test_load_inference_networks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model");
        let device = default_device();

        let networks = make_vision_ppo_networks::<InferenceBackend>(&network_config(), &device)
            .unwrap();
        let metadata =
            CheckpointMetadata::new(network_config(), PpoConfig::default(), 7, 70, None);
        save_networks(&networks, &metadata, &path).unwrap();

        let (loaded, metadata) = load_networks::<InferenceBackend>(&path, &device).unwrap();
        assert_eq!(metadata.training_steps, 7);
        assert!(metadata.normalizer.is_none());
        assert_eq!(loaded.distribution().event_size, 2);
    }
}
