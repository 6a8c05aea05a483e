use crate::embedding::EmbeddingError;
use crate::store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for semdex
#[derive(Error, Debug)]
pub enum SemdexError {
    /// Query text is empty or otherwise unusable
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Embedding dimension disagrees with an already-built user index
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Embedding provider failed or returned malformed output
    #[error("Embedding error: {0}")]
    Embedding(EmbeddingError),

    /// Entry, vector or tag store failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<EmbeddingError> for SemdexError {
    fn from(err: EmbeddingError) -> Self {
        match err {
            EmbeddingError::DimensionMismatch { expected, actual } => {
                SemdexError::DimensionMismatch { expected, actual }
            }
            other => SemdexError::Embedding(other),
        }
    }
}

impl SemdexError {
    /// Whether the error came from an external collaborator (embedder or store)
    pub fn is_collaborator_failure(&self) -> bool {
        matches!(self, SemdexError::Embedding(_) | SemdexError::Store(_))
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for semdex operations
pub type Result<T> = std::result::Result<T, SemdexError>;
