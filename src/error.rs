use thiserror::Error;

/// Central error type for the unmix-core crate.
#[derive(Debug, Error)]
pub enum UnmixError {
    // Generic fallback (wraps anyhow)
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),

    // Configuration
    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Unknown preset `{0}`")]
    UnknownPreset(String),

    #[error("Unknown target `{target}` for preset `{preset}` (available: {available})")]
    UnknownTarget {
        preset: String,
        target: String,
        available: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Parameter loading
    #[error("Missing parameter `{0}`")]
    MissingParameter(String),

    #[error("Unexpected parameter `{0}`")]
    UnexpectedParameter(String),

    #[error("Parameter `{name}` has shape {got:?}, expected {expected:?}")]
    ShapeMismatch {
        name: String,
        got: Vec<usize>,
        expected: Vec<usize>,
    },

    #[error("Weights error: {0}")]
    Weights(String),

    // Inference
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Retrieval
    #[error("Checksum mismatch for {path}")]
    Checksum { path: String },

    #[error("Cache dir not available")]
    CacheDirUnavailable,
}

// --- Implement From conversions for common errors ---
impl From<std::io::Error> for UnmixError {
    fn from(e: std::io::Error) -> Self {
        UnmixError::Anyhow(e.into())
    }
}

impl From<serde_json::Error> for UnmixError {
    fn from(e: serde_json::Error) -> Self {
        UnmixError::Anyhow(e.into())
    }
}

impl From<reqwest::Error> for UnmixError {
    fn from(e: reqwest::Error) -> Self {
        UnmixError::Anyhow(e.into())
    }
}

impl From<safetensors::SafeTensorError> for UnmixError {
    fn from(e: safetensors::SafeTensorError) -> Self {
        UnmixError::Weights(e.to_string())
    }
}

impl From<ndarray::ShapeError> for UnmixError {
    fn from(e: ndarray::ShapeError) -> Self {
        UnmixError::Anyhow(e.into())
    }
}

pub type Result<T> = std::result::Result<T, UnmixError>;
