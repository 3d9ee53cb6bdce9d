use std::path::PathBuf;

use anyhow::{Context, Result};
use burn::module::Module;
use clap::{Parser, Subcommand};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::info;

use vision_ppo::config::AppConfig;
use vision_ppo::logging::init_tracing;
use vision_ppo::rl::{
    FeedForwardNetwork, Identity, InferenceBackend, PpoLearner, TrainingBackend, default_device,
    load_networks, make_policy, make_vision_ppo_networks, save_checkpoint, seed_backend,
};

#[derive(Parser)]
#[command(name = "vision_ppo")]
#[command(version, about = "Convolutional PPO policy and value networks")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the default configuration as TOML
    DefaultConfig,

    /// Build the networks and report their sizes
    Inspect {
        /// TOML config file (defaults are used if it does not exist)
        #[arg(long, default_value = "vision_ppo.toml")]
        config: PathBuf,
    },

    /// Initialize fresh networks and write a checkpoint
    Init {
        #[arg(long, default_value = "vision_ppo.toml")]
        config: PathBuf,

        /// Checkpoint path; defaults to the config's checkpoint location
        #[arg(long)]
        output: Option<PathBuf>,

        #[arg(long, default_value = "0")]
        seed: u64,
    },

    /// Run a checkpointed policy on random observations
    Act {
        #[arg(long)]
        checkpoint: PathBuf,

        #[arg(long, default_value = "4")]
        steps: usize,

        #[arg(long, default_value = "0")]
        seed: u64,

        /// Use the distribution mode instead of sampling
        #[arg(long)]
        deterministic: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing().context("Failed to initialize logging")?;

    match cli.command {
        Command::DefaultConfig => {
            let text = AppConfig::default_toml().context("Failed to render default config")?;
            print!("{text}");
        }
        Command::Inspect { config } => inspect(AppConfig::load_or_default(&config)?)?,
        Command::Init {
            config,
            output,
            seed,
        } => {
            let config = AppConfig::load_or_default(&config)?;
            let path = output.unwrap_or_else(|| config.checkpoint.path());
            init(config, path, seed)?;
        }
        Command::Act {
            checkpoint,
            steps,
            seed,
            deterministic,
        } => act(checkpoint, steps, seed, deterministic)?,
    }

    Ok(())
}

fn inspect(config: AppConfig) -> Result<()> {
    let device = default_device();
    let networks = make_vision_ppo_networks::<InferenceBackend>(&config.network, &device)?;

    info!(
        policy_params = networks.policy_network.num_params(),
        value_params = networks.value_network.num_params(),
        "parameter counts"
    );

    let obs = config.network.observation_size.zeros::<InferenceBackend>(1, &device);
    let logits = networks.policy_network.apply(&Identity, &obs)?;
    let values = networks.value_network.apply(&Identity, &obs)?;
    info!(
        policy_output = ?logits.dims(),
        value_output = ?values.dims(),
        pixel_streams = ?config.network.observation_size.pixel_keys(),
        state_size = ?config.network.observation_size.state_size(),
        "output shapes for a zero observation"
    );

    Ok(())
}

fn init(config: AppConfig, path: PathBuf, seed: u64) -> Result<()> {
    let device = default_device();
    seed_backend::<TrainingBackend>(seed);

    let learner = PpoLearner::<TrainingBackend>::new(config.network, config.ppo, device)?;
    save_checkpoint(&learner, &path)
        .with_context(|| format!("Failed to write checkpoint {:?}", path))?;

    info!(path = %path.display(), seed, "initialized networks");
    Ok(())
}

fn act(checkpoint: PathBuf, steps: usize, seed: u64, deterministic: bool) -> Result<()> {
    let device = default_device();
    let (networks, metadata) = load_networks::<InferenceBackend>(&checkpoint, &device)?;
    info!(
        version = %metadata.version,
        training_steps = metadata.training_steps,
        env_steps = metadata.env_steps,
        "loaded checkpoint"
    );

    let mut rng = StdRng::seed_from_u64(seed);
    seed_backend::<InferenceBackend>(seed);
    let policy = make_policy(&networks, &metadata.normalizer, deterministic);

    for step in 0..steps {
        let obs = metadata
            .network_config
            .observation_size
            .random::<InferenceBackend>(1, &device);
        let (action, extras) = policy.act(&obs, &mut rng)?;

        let action: Vec<f32> = action.into_data().iter::<f32>().collect();
        match extras {
            Some(extras) => {
                let log_prob: Vec<f32> = extras.log_prob.into_data().iter::<f32>().collect();
                info!(step, ?action, ?log_prob, "sampled action");
            }
            None => info!(step, ?action, "mode action"),
        }
    }

    Ok(())
}
