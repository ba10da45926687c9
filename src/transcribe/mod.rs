//! Transcription backends: the capability interface, the provider
//! registry, and a scripted mock for tests.
//!
//! A backend converts one encoded audio chunk into text. Two providers are
//! remote HTTP services, one is in-process neural inference; all are
//! driven through the same trait by the chunk scheduler.

pub mod google;
pub mod openai;
pub mod scheduler;
pub mod whisper_local;

use crate::config::Config;
use crate::error::{NeuravoxError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

pub use scheduler::{CancelFlag, ChunkJob, ChunkOutcome, ChunkScheduler, SchedulerConfig};

/// Options for a single transcription call.
#[derive(Debug, Clone, Default)]
pub struct TranscribeOptions {
    /// Language hint; None lets the backend auto-detect.
    pub language: Option<String>,
    /// Sampling temperature for backends that accept one.
    pub temperature: Option<f32>,
    /// Request segment/word timestamps from the backend.
    pub include_timestamps: bool,
    /// Instruction sent to cloud backends instead of the built-in prompt.
    pub system_prompt: Option<String>,
}

/// A timestamped span of transcribed text.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedSpan {
    pub start_s: f64,
    pub end_s: f64,
    pub text: String,
}

/// Result of transcribing one chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscriptionOutput {
    pub text: String,
    /// Segment-level timestamps, when the backend provides them.
    pub segments: Vec<TimedSpan>,
    /// Token/word-level timestamps, when the backend provides them.
    pub words: Vec<TimedSpan>,
    pub tokens_used: Option<u64>,
}

impl TranscriptionOutput {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// Backend failure, split into retryable and fatal classes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    // Transient: the scheduler retries these with backoff.
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("timed out after {0}s")]
    Timeout(u64),

    // Fatal: the chunk is marked failed, other chunks continue.
    #[error("invalid credential: {0}")]
    InvalidCredential(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("file too large: {0}")]
    FileTooLarge(String),
    #[error("model load failed: {0}")]
    ModelLoadFailed(String),
    #[error("inference ran out of memory: {0}")]
    InferenceOom(String),
    #[error("inference runtime missing: {0}")]
    RuntimeMissing(String),

    #[error("cancelled")]
    Cancelled,
}

impl BackendError {
    /// Transient failures are retried by the scheduler; everything else is
    /// fatal for the chunk.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BackendError::RateLimited(_)
                | BackendError::ServiceUnavailable(_)
                | BackendError::Network(_)
                | BackendError::Timeout(_)
        )
    }
}

/// Capability interface every transcription backend implements.
#[async_trait]
pub trait TranscriptionBackend: Send + Sync {
    /// Stable backend key, e.g. `cloud-a`.
    fn id(&self) -> &str;

    /// Identifier of the underlying model.
    fn model_id(&self) -> &str;

    /// Name of the credential this backend needs, if any.
    fn requires_credential(&self) -> Option<&'static str>;

    /// Whether the backend can return timestamps.
    fn supports_timestamps(&self) -> bool;

    /// Transcribe one audio chunk. May suspend on network or inference.
    async fn transcribe(
        &self,
        audio_path: &Path,
        options: &TranscribeOptions,
    ) -> std::result::Result<TranscriptionOutput, BackendError>;
}

/// Provenance tag for the known backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    CloudA,
    CloudB,
    LocalWhisper,
}

impl BackendKind {
    pub fn parse(id: &str) -> Option<BackendKind> {
        match id {
            "cloud-a" => Some(BackendKind::CloudA),
            "cloud-b" => Some(BackendKind::CloudB),
            "local-whisper" => Some(BackendKind::LocalWhisper),
            _ => None,
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            BackendKind::CloudA => "cloud-a",
            BackendKind::CloudB => "cloud-b",
            BackendKind::LocalWhisper => "local-whisper",
        }
    }

    /// Credential the backend needs, if any.
    pub fn credential_name(&self) -> Option<&'static str> {
        match self {
            BackendKind::CloudA => Some("GOOGLE_API_KEY"),
            BackendKind::CloudB => Some("OPENAI_API_KEY"),
            BackendKind::LocalWhisper => None,
        }
    }
}

/// Construct a backend from configuration. Fails when the required
/// credential is absent.
pub fn create_backend(kind: BackendKind, config: &Config) -> Result<Arc<dyn TranscriptionBackend>> {
    match kind {
        BackendKind::CloudA => {
            let key = config
                .credential("GOOGLE_API_KEY")
                .ok_or_else(|| NeuravoxError::Validation {
                    message: "backend 'cloud-a' requires GOOGLE_API_KEY".to_string(),
                })?;
            Ok(Arc::new(google::GoogleBackend::new(key.to_string())))
        }
        BackendKind::CloudB => {
            let key = config
                .credential("OPENAI_API_KEY")
                .ok_or_else(|| NeuravoxError::Validation {
                    message: "backend 'cloud-b' requires OPENAI_API_KEY".to_string(),
                })?;
            Ok(Arc::new(openai::OpenAiBackend::new(key.to_string())))
        }
        BackendKind::LocalWhisper => Ok(Arc::new(whisper_local::WhisperBackend::new(
            whisper_local::WhisperBackendConfig::default(),
        )?)),
    }
}

/// Scripted outcome for one mock transcription call.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    Text(String),
    Error(BackendError),
}

/// Mock backend for testing the scheduler and pipeline.
///
/// Outcomes can be scripted per chunk file name; unscripted calls return a
/// default text. The mock also records its concurrency high-water mark so
/// tests can assert the scheduler's in-flight bound.
pub struct MockBackend {
    model: String,
    default_text: String,
    delay: Option<std::time::Duration>,
    script: Mutex<HashMap<String, VecDeque<MockOutcome>>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockBackend {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            default_text: "mock transcription".to_string(),
            delay: None,
            script: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Set the text returned for unscripted calls.
    pub fn with_response(mut self, text: &str) -> Self {
        self.default_text = text.to_string();
        self
    }

    /// Sleep this long inside each call, to exercise concurrency.
    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue an outcome for calls whose audio file has this name. Multiple
    /// outcomes for the same name are consumed in order.
    pub fn script(self, file_name: &str, outcome: MockOutcome) -> Self {
        self.script
            .lock()
            .unwrap()
            .entry(file_name.to_string())
            .or_default()
            .push_back(outcome);
        self
    }

    /// Total number of transcribe calls made.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent transcribe calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranscriptionBackend for MockBackend {
    fn id(&self) -> &str {
        "mock"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn requires_credential(&self) -> Option<&'static str> {
        None
    }

    fn supports_timestamps(&self) -> bool {
        false
    }

    async fn transcribe(
        &self,
        audio_path: &Path,
        _options: &TranscribeOptions,
    ) -> std::result::Result<TranscriptionOutput, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let file_name = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let scripted = self
            .script
            .lock()
            .unwrap()
            .get_mut(&file_name)
            .and_then(|queue| queue.pop_front());

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match scripted {
            Some(MockOutcome::Text(text)) => Ok(TranscriptionOutput::from_text(text)),
            Some(MockOutcome::Error(error)) => Err(error),
            None => Ok(TranscriptionOutput::from_text(self.default_text.clone())),
        }
    }
}
