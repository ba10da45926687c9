//! Local neural backend: in-process Whisper inference via whisper-rs.
//!
//! The model is loaded once per backend instance and shared by all
//! scheduler workers; inference is serialized through a mutex because the
//! underlying context is not concurrent-safe. Prefers a GPU build when one
//! of the accelerator features is compiled in, falling back to CPU.
//!
//! # Feature Gate
//!
//! Requires the `whisper-local` feature and cmake. Without it a stub is
//! compiled that fails every call with a runtime-missing error.

use crate::error::Result;
use crate::transcribe::{BackendError, TranscribeOptions, TranscriptionBackend, TranscriptionOutput};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

#[cfg(feature = "whisper-local")]
use crate::defaults;
#[cfg(feature = "whisper-local")]
use crate::error::NeuravoxError;
#[cfg(feature = "whisper-local")]
use crate::transcribe::TimedSpan;
#[cfg(feature = "whisper-local")]
use std::sync::{Arc, Mutex, Once};
#[cfg(feature = "whisper-local")]
use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, install_logging_hooks,
};

#[cfg(feature = "whisper-local")]
static LOGGING_HOOKS_INSTALLED: Once = Once::new();

/// Directory where local models are stored (`~/.cache/neuravox/models/`).
pub fn models_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("neuravox")
        .join("models")
}

/// Configuration for the local Whisper backend.
#[derive(Debug, Clone)]
pub struct WhisperBackendConfig {
    /// Path to the ggml model file.
    pub model_path: PathBuf,
    /// Language code, or "auto" for detection.
    pub language: String,
    /// Inference threads (None = auto-detect).
    pub threads: Option<usize>,
    /// Whether to try GPU acceleration before CPU.
    pub use_gpu: bool,
}

impl Default for WhisperBackendConfig {
    fn default() -> Self {
        Self {
            model_path: models_dir().join("ggml-base.bin"),
            language: "auto".to_string(),
            threads: None,
            use_gpu: true,
        }
    }
}

/// Local Whisper transcription backend.
#[cfg(feature = "whisper-local")]
pub struct WhisperBackend {
    context: Arc<Mutex<WhisperContext>>,
    config: WhisperBackendConfig,
    model_name: String,
}

/// Local Whisper backend placeholder (without the `whisper-local` feature).
#[cfg(not(feature = "whisper-local"))]
#[derive(Debug)]
pub struct WhisperBackend {
    #[allow(dead_code)]
    config: WhisperBackendConfig,
    model_name: String,
}

#[cfg(feature = "whisper-local")]
impl WhisperBackend {
    /// Load the model eagerly so the first chunk does not pay the cost.
    pub fn new(config: WhisperBackendConfig) -> Result<Self> {
        LOGGING_HOOKS_INSTALLED.call_once(|| {
            install_logging_hooks();
        });

        if !config.model_path.exists() {
            return Err(NeuravoxError::Backend {
                backend: "local-whisper".to_string(),
                message: format!("model not found at {}", config.model_path.display()),
            });
        }

        let model_name = model_name_of(&config.model_path);

        let mut context_params = WhisperContextParameters::default();
        context_params.use_gpu(config.use_gpu);
        let context = WhisperContext::new_with_params(
            config.model_path.to_str().ok_or_else(|| NeuravoxError::Backend {
                backend: "local-whisper".to_string(),
                message: "invalid UTF-8 in model path".to_string(),
            })?,
            context_params,
        )
        .map_err(|e| NeuravoxError::Backend {
            backend: "local-whisper".to_string(),
            message: format!("failed to load model ({}): {e}", defaults::gpu_backend()),
        })?;

        log::info!(
            "loaded whisper model '{model_name}' on {}",
            defaults::gpu_backend()
        );

        Ok(Self {
            context: Arc::new(Mutex::new(context)),
            config,
            model_name,
        })
    }
}

#[cfg(not(feature = "whisper-local"))]
impl WhisperBackend {
    /// Create a stub backend; every transcribe call reports that the
    /// inference runtime is not compiled in.
    pub fn new(config: WhisperBackendConfig) -> Result<Self> {
        let model_name = model_name_of(&config.model_path);
        Ok(Self { config, model_name })
    }
}

fn model_name_of(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(feature = "whisper-local")]
#[async_trait]
impl TranscriptionBackend for WhisperBackend {
    fn id(&self) -> &str {
        "local-whisper"
    }

    fn model_id(&self) -> &str {
        &self.model_name
    }

    fn requires_credential(&self) -> Option<&'static str> {
        None
    }

    fn supports_timestamps(&self) -> bool {
        true
    }

    async fn transcribe(
        &self,
        audio_path: &Path,
        options: &TranscribeOptions,
    ) -> std::result::Result<TranscriptionOutput, BackendError> {
        let context = self.context.clone();
        let language = options
            .language
            .clone()
            .unwrap_or_else(|| self.config.language.clone());
        let threads = self.config.threads;
        let include_timestamps = options.include_timestamps;
        let temperature = options.temperature;
        let audio_path = audio_path.to_path_buf();

        // Decoding and inference are CPU-bound; keep them off the async
        // workers so other chunks can progress.
        tokio::task::spawn_blocking(move || {
            let samples = load_chunk_pcm(&audio_path)?;

            let context = context.lock().map_err(|e| {
                BackendError::ModelLoadFailed(format!("context lock poisoned: {e}"))
            })?;
            let mut state = context.create_state().map_err(|e| {
                BackendError::ModelLoadFailed(format!("failed to create state: {e}"))
            })?;

            let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
            if language == "auto" {
                params.set_language(None);
            } else {
                params.set_language(Some(&language));
            }
            if let Some(threads) = threads {
                params.set_n_threads(threads as i32);
            }
            if let Some(temperature) = temperature {
                params.set_temperature(temperature);
            }
            params.set_print_special(false);
            params.set_print_progress(false);
            params.set_print_realtime(false);
            params.set_print_timestamps(false);

            state.full(params, &samples).map_err(classify_inference_error)?;

            let mut text = String::new();
            let mut segments = Vec::new();
            for segment in state.as_iter() {
                let Ok(segment_text) = segment.to_str_lossy() else {
                    continue;
                };
                text.push_str(&segment_text);
                if include_timestamps {
                    segments.push(TimedSpan {
                        // Whisper reports centiseconds.
                        start_s: segment.start_timestamp() as f64 / 100.0,
                        end_s: segment.end_timestamp() as f64 / 100.0,
                        text: segment_text.trim().to_string(),
                    });
                }
            }

            Ok(TranscriptionOutput {
                text: text.trim().to_string(),
                segments,
                words: Vec::new(),
                tokens_used: None,
            })
        })
        .await
        .map_err(|e| BackendError::ModelLoadFailed(format!("inference task failed: {e}")))?
    }
}

#[cfg(feature = "whisper-local")]
fn classify_inference_error(e: whisper_rs::WhisperError) -> BackendError {
    let message = e.to_string();
    if message.to_ascii_lowercase().contains("memory") {
        BackendError::InferenceOom(message)
    } else {
        BackendError::BadRequest(format!("inference failed: {message}"))
    }
}

/// Decode an encoded chunk back to 16kHz mono f32 for inference.
#[cfg(feature = "whisper-local")]
fn load_chunk_pcm(path: &Path) -> std::result::Result<Vec<f32>, BackendError> {
    let mut decoder = crate::audio::AudioDecoder::open(path, defaults::SAMPLE_RATE, true)
        .map_err(|e| BackendError::BadRequest(format!("cannot decode chunk: {e}")))?;
    decoder
        .read_all()
        .map_err(|e| BackendError::BadRequest(format!("cannot decode chunk: {e}")))
}

#[cfg(not(feature = "whisper-local"))]
#[async_trait]
impl TranscriptionBackend for WhisperBackend {
    fn id(&self) -> &str {
        "local-whisper"
    }

    fn model_id(&self) -> &str {
        &self.model_name
    }

    fn requires_credential(&self) -> Option<&'static str> {
        None
    }

    fn supports_timestamps(&self) -> bool {
        false
    }

    async fn transcribe(
        &self,
        _audio_path: &Path,
        _options: &TranscribeOptions,
    ) -> std::result::Result<TranscriptionOutput, BackendError> {
        Err(BackendError::RuntimeMissing(
            "built without the whisper-local feature".to_string(),
        ))
    }
}
