//! Error types for neuravox.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NeuravoxError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Pre-flight validation errors. Never mutate pipeline state.
    #[error("Validation failed: {message}")]
    Validation { message: String },

    // Decoder errors (fatal for the recording)
    #[error("Unsupported audio format: {path}")]
    UnsupportedFormat { path: String },

    #[error("Failed to decode audio at byte offset {offset}: {message}")]
    Decode { offset: u64, message: String },

    #[error("Audio stream is empty: {path}")]
    EmptyAudio { path: String },

    // Chunk encoding errors (fatal for the stage)
    #[error("Failed to encode chunk: {message}")]
    Encode { message: String },

    // State store errors
    #[error("State store error: {message}")]
    State { message: String },

    #[error("State store error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    // Transcription errors surfaced after the scheduler exhausts retries
    #[error("Transcription backend '{backend}' failed: {message}")]
    Backend { backend: String, message: String },

    // Clean abort; recorded state is coherent and resumable
    #[error("Operation cancelled")]
    Cancelled,

    // Metadata (de)serialization errors
    #[error("Metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl NeuravoxError {
    /// True for errors that must never be recorded against a stage because
    /// they are raised before any state mutation.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            NeuravoxError::Validation { .. }
                | NeuravoxError::ConfigInvalidValue { .. }
                | NeuravoxError::ConfigParse { .. }
                | NeuravoxError::ConfigFileNotFound { .. }
        )
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, NeuravoxError>;
