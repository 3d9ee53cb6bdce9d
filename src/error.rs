use std::path::PathBuf;

/// Errors raised while building or applying a network.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("Unsupported network_type: {0}")]
    UnsupportedNetworkType(String),

    #[error("invalid architecture: {0}")]
    InvalidArchitecture(String),

    #[error("observation error: {0}")]
    Observation(#[from] ObservationError),
}

/// Errors raised by observation construction and validation.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ObservationError {
    #[error("pixel key '{0}' must start with 'pixels/'")]
    InvalidPixelKey(String),

    #[error("unknown observation key '{0}' (expected 'pixels/*' or 'state')")]
    UnknownKey(String),

    #[error("observation has no pixel streams and no state")]
    Empty,

    #[error("observation keys {actual:?} do not match network keys {expected:?}")]
    KeyMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("bad shape for '{key}': expected {expected}, got {actual:?}")]
    Shape {
        key: String,
        expected: String,
        actual: Vec<usize>,
    },

    #[error("batch size mismatch: '{key}' has {actual} rows, expected {expected}")]
    BatchMismatch {
        key: String,
        expected: usize,
        actual: usize,
    },
}

/// Errors raised while assembling or consuming a rollout.
#[derive(Debug, thiserror::Error)]
pub enum RolloutError {
    #[error("rollout is empty")]
    Empty,

    #[error("rollout field '{field}' has length {actual}, expected {expected}")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("observation error: {0}")]
    Observation(#[from] ObservationError),
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("config validation error: {0}")]
    Validation(String),
}

/// Errors that can occur during checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint metadata not found: {0}")]
    MetadataNotFound(PathBuf),

    #[error("failed to rebuild networks: {0}")]
    Network(#[from] NetworkError),
}
