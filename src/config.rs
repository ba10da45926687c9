//! Layered configuration for the pipeline.
//!
//! Precedence, highest first: environment variables, the workspace TOML
//! file, hard-coded defaults. Validation collects every violation so a bad
//! file reports all problems in one pass.

use crate::defaults;
use crate::error::{NeuravoxError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub workspace: WorkspaceConfig,
    pub processing: ProcessingConfig,
    pub transcription: TranscriptionConfig,
    pub credentials: CredentialsConfig,
}

/// Workspace location configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub base_path: PathBuf,
}

/// Audio processing (segmentation + encoding) configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProcessingConfig {
    pub silence_threshold: f64,
    pub min_silence_duration: f64,
    pub min_chunk_duration: f64,
    pub sample_rate: u32,
    pub output_format: OutputFormat,
    pub normalize: bool,
}

/// Transcription configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub default_backend: String,
    pub max_concurrent: usize,
    pub include_timestamps: bool,
    /// Per-attempt backend timeout in seconds.
    pub timeout_s: u64,
    /// Language hint passed to backends; None lets them auto-detect.
    pub language: Option<String>,
    /// Instruction sent with cloud requests instead of the built-in
    /// transcription prompt.
    pub system_prompt: Option<String>,
}

/// API credentials, overridable by environment variables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct CredentialsConfig {
    pub google_api_key: Option<String>,
    pub openai_api_key: Option<String>,
}

/// Chunk container format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Flac,
    Wav,
    Mp3,
}

impl OutputFormat {
    /// File extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Flac => "flac",
            OutputFormat::Wav => "wav",
            OutputFormat::Mp3 => "mp3",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            base_path: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".neuravox")
                .join("workspace"),
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            silence_threshold: defaults::SILENCE_THRESHOLD,
            min_silence_duration: defaults::MIN_SILENCE_DURATION_S,
            min_chunk_duration: defaults::MIN_CHUNK_DURATION_S,
            sample_rate: defaults::SAMPLE_RATE,
            output_format: OutputFormat::Flac,
            normalize: true,
        }
    }
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            default_backend: defaults::DEFAULT_BACKEND.to_string(),
            max_concurrent: defaults::MAX_CONCURRENT,
            include_timestamps: true,
            timeout_s: defaults::BACKEND_TIMEOUT_S,
            language: None,
            system_prompt: None,
        }
    }
}

/// Outcome of a validation pass. Errors make the configuration unusable;
/// warnings (missing credentials for a configured backend) become fatal
/// only when that backend is selected for a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ConfigReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file is missing or contains invalid TOML.
    /// Missing fields use default values; unknown keys are tolerated.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                NeuravoxError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                NeuravoxError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file does
    /// not exist. Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(NeuravoxError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// Resolve the configuration for a workspace: `<workspace>/config.toml`
    /// unless `NEURAVOX_CONFIG` points elsewhere, then apply environment
    /// overrides.
    pub fn resolve() -> Result<Self> {
        let base = std::env::var("NEURAVOX_WORKSPACE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| WorkspaceConfig::default().base_path);
        let config_path = std::env::var("NEURAVOX_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| base.join("config.toml"));
        Ok(Self::load_or_default(&config_path)?.with_env_overrides())
    }

    /// Apply environment variable overrides.
    ///
    /// Supported environment variables:
    /// - NEURAVOX_WORKSPACE → workspace.base_path
    /// - GOOGLE_API_KEY → credentials.google_api_key
    /// - OPENAI_API_KEY → credentials.openai_api_key
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(path) = std::env::var("NEURAVOX_WORKSPACE")
            && !path.is_empty()
        {
            self.workspace.base_path = PathBuf::from(path);
        }
        if let Ok(key) = std::env::var("GOOGLE_API_KEY")
            && !key.is_empty()
        {
            self.credentials.google_api_key = Some(key);
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY")
            && !key.is_empty()
        {
            self.credentials.openai_api_key = Some(key);
        }
        self
    }

    /// Look up a credential by name (config entry, already merged with the
    /// environment by [`Config::with_env_overrides`]).
    pub fn credential(&self, name: &str) -> Option<&str> {
        match name {
            "GOOGLE_API_KEY" => self.credentials.google_api_key.as_deref(),
            "OPENAI_API_KEY" => self.credentials.openai_api_key.as_deref(),
            _ => None,
        }
    }

    /// Validate every recognized option, collecting all violations.
    pub fn validate(&self) -> ConfigReport {
        let mut report = ConfigReport::default();

        let p = &self.processing;
        if !(0.001..=1.0).contains(&p.silence_threshold) {
            report.errors.push(format!(
                "processing.silence_threshold {} out of range 0.001..=1.0",
                p.silence_threshold
            ));
        }
        if !(0.1..=300.0).contains(&p.min_silence_duration) {
            report.errors.push(format!(
                "processing.min_silence_duration {} out of range 0.1..=300.0 seconds",
                p.min_silence_duration
            ));
        }
        if p.min_chunk_duration < 0.0 || !p.min_chunk_duration.is_finite() {
            report.errors.push(format!(
                "processing.min_chunk_duration {} must be a finite non-negative number",
                p.min_chunk_duration
            ));
        }
        const VALID_RATES: &[u32] = &[8000, 16000, 22050, 44100, 48000];
        if !VALID_RATES.contains(&p.sample_rate) {
            report.errors.push(format!(
                "processing.sample_rate {} not one of {:?}",
                p.sample_rate, VALID_RATES
            ));
        }
        if p.output_format == OutputFormat::Mp3 {
            report.errors.push(
                "processing.output_format 'mp3' is not supported for chunk output; use flac or wav"
                    .to_string(),
            );
        }

        let t = &self.transcription;
        if !(1..=10).contains(&t.max_concurrent) {
            report.errors.push(format!(
                "transcription.max_concurrent {} out of range 1..=10",
                t.max_concurrent
            ));
        }
        if t.timeout_s == 0 {
            report
                .errors
                .push("transcription.timeout_s must be positive".to_string());
        }

        match t.default_backend.as_str() {
            "cloud-a" => {
                if self.credentials.google_api_key.is_none() {
                    report.warnings.push(
                        "backend 'cloud-a' configured but GOOGLE_API_KEY is not set".to_string(),
                    );
                }
            }
            "cloud-b" => {
                if self.credentials.openai_api_key.is_none() {
                    report.warnings.push(
                        "backend 'cloud-b' configured but OPENAI_API_KEY is not set".to_string(),
                    );
                }
            }
            "local-whisper" => {}
            other => {
                report
                    .errors
                    .push(format!("transcription.default_backend '{other}' is unknown"));
            }
        }

        report
    }
}
