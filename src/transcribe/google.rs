//! Cloud backend A: Google Generative Language API.
//!
//! Uploads the chunk through the Files API, asks the model for a plain
//! transcription, then deletes the uploaded file. The service returns no
//! timestamps, so only text and token usage are filled in.

use crate::transcribe::{BackendError, TranscribeOptions, TranscriptionBackend, TranscriptionOutput};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::path::Path;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Transcription instruction used when no system prompt is configured.
const DEFAULT_PROMPT: &str = "Please transcribe the audio in this file. Provide only the \
transcribed text without any additional commentary, explanations, or formatting.\n\
If there are multiple speakers, indicate speaker changes with [Speaker 1], [Speaker 2], etc.\n\
Ensure the transcription is accurate and includes proper punctuation.";

pub struct GoogleBackend {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl GoogleBackend {
    pub fn new(api_key: String) -> Self {
        Self::with_model(api_key, DEFAULT_MODEL)
    }

    pub fn with_model(api_key: String, model: &str) -> Self {
        Self {
            api_key,
            model: model.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .build()
                .expect("default reqwest client"),
        }
    }

    /// Override the endpoint, for tests against a local server.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    async fn upload_chunk(&self, audio_path: &Path) -> Result<String, BackendError> {
        let bytes = tokio::fs::read(audio_path)
            .await
            .map_err(|e| BackendError::BadRequest(format!("cannot read chunk: {e}")))?;

        let url = format!(
            "{}/upload/v1beta/files?key={}",
            self.base_url, self.api_key
        );
        let response = self
            .client
            .post(&url)
            .header("Content-Type", mime_type(audio_path))
            .body(bytes)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        let value: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| BackendError::ServiceUnavailable(format!("malformed upload reply: {e}")))?;
        value["file"]["uri"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| {
                BackendError::ServiceUnavailable("upload reply missing file uri".to_string())
            })
    }

    async fn delete_upload(&self, file_uri: &str) {
        // Cleanup is best-effort; the service expires uploads on its own.
        let url = format!("{file_uri}?key={}", self.api_key);
        if let Err(e) = self.client.delete(&url).send().await {
            log::debug!("failed to delete uploaded chunk: {e}");
        }
    }
}

#[async_trait]
impl TranscriptionBackend for GoogleBackend {
    fn id(&self) -> &str {
        "cloud-a"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn requires_credential(&self) -> Option<&'static str> {
        Some("GOOGLE_API_KEY")
    }

    fn supports_timestamps(&self) -> bool {
        false
    }

    async fn transcribe(
        &self,
        audio_path: &Path,
        options: &TranscribeOptions,
    ) -> Result<TranscriptionOutput, BackendError> {
        let file_uri = self.upload_chunk(audio_path).await?;

        let prompt = options
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_PROMPT.to_string());
        let mut generation_config = serde_json::Map::new();
        if let Some(temperature) = options.temperature {
            generation_config.insert("temperature".to_string(), temperature.into());
        }

        let request = serde_json::json!({
            "contents": [{
                "parts": [
                    { "text": prompt },
                    { "file_data": { "mime_type": mime_type(audio_path), "file_uri": file_uri } },
                ],
            }],
            "generationConfig": generation_config,
        });

        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let response = self.client.post(&url).json(&request).send().await;

        let result = match response {
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                if status.is_success() {
                    parse_generate_response(&body)
                } else {
                    Err(classify_status(status, &body))
                }
            }
            Err(e) => Err(request_error(e)),
        };

        self.delete_upload(&file_uri).await;
        result
    }
}

fn mime_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("flac") => "audio/flac",
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mpeg",
        Some("ogg") | Some("opus") => "audio/ogg",
        Some("m4a") | Some("mp4") | Some("aac") => "audio/aac",
        _ => "application/octet-stream",
    }
}

fn request_error(e: reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout(0)
    } else {
        BackendError::Network(e.to_string())
    }
}

/// Map an HTTP status to the failure taxonomy.
fn classify_status(status: StatusCode, body: &str) -> BackendError {
    let detail: String = body.chars().take(200).collect();
    match status {
        StatusCode::TOO_MANY_REQUESTS => BackendError::RateLimited(detail),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            BackendError::InvalidCredential(detail)
        }
        StatusCode::PAYLOAD_TOO_LARGE => BackendError::FileTooLarge(detail),
        s if s.is_server_error() => BackendError::ServiceUnavailable(detail),
        _ => BackendError::BadRequest(detail),
    }
}

/// Extract the transcription text from a generateContent reply.
fn parse_generate_response(body: &str) -> Result<TranscriptionOutput, BackendError> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| BackendError::ServiceUnavailable(format!("malformed reply: {e}")))?;

    let text = value["candidates"][0]["content"]["parts"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part["text"].as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    let tokens_used = value["usageMetadata"]["totalTokenCount"].as_u64();

    Ok(TranscriptionOutput {
        text: text.trim().to_string(),
        segments: Vec::new(),
        words: Vec::new(),
        tokens_used,
    })
}
