//! Vision PPO - convolutional policy and value networks for PPO
//!
//! This library provides:
//! - Observation types and CNN/MLP building blocks (rl module)
//! - PPO losses, learner and checkpointing (rl module)
//! - Rolling training statistics (metrics module)
//! - TOML configuration and tracing setup

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod rl;
