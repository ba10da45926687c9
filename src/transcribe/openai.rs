//! Cloud backend B: OpenAI-compatible `audio/transcriptions` endpoint.
//!
//! Posts the chunk as multipart form data with a bearer credential. When
//! timestamps are requested the verbose JSON response format is used and
//! segment spans are carried through.

use crate::transcribe::{BackendError, TimedSpan, TranscribeOptions, TranscriptionBackend, TranscriptionOutput};
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::multipart::{Form, Part};
use std::path::Path;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "whisper-1";

pub struct OpenAiBackend {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiBackend {
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

    fn headers(&self) -> Result<HeaderMap, BackendError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|e| BackendError::InvalidCredential(e.to_string()))?,
        );
        Ok(headers)
    }
}

#[async_trait]
impl TranscriptionBackend for OpenAiBackend {
    fn id(&self) -> &str {
        "cloud-b"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn requires_credential(&self) -> Option<&'static str> {
        Some("OPENAI_API_KEY")
    }

    fn supports_timestamps(&self) -> bool {
        true
    }

    async fn transcribe(
        &self,
        audio_path: &Path,
        options: &TranscribeOptions,
    ) -> Result<TranscriptionOutput, BackendError> {
        let bytes = tokio::fs::read(audio_path)
            .await
            .map_err(|e| BackendError::BadRequest(format!("cannot read chunk: {e}")))?;
        let file_name = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.flac".to_string());

        let audio_part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime_type(audio_path))
            .map_err(|e| BackendError::BadRequest(format!("invalid audio part: {e}")))?;

        let response_format = if options.include_timestamps {
            "verbose_json"
        } else {
            "json"
        };

        let mut form = Form::new()
            .part("file", audio_part)
            .text("model", self.model.clone())
            .text("response_format", response_format);

        if let Some(temperature) = options.temperature {
            form = form.text("temperature", temperature.to_string());
        }
        if let Some(language) = options.language.clone()
            && !language.is_empty()
            && language != "auto"
        {
            form = form.text("language", language);
        }
        if let Some(prompt) = options.system_prompt.clone() {
            form = form.text("prompt", prompt);
        }

        let url = format!("{}/audio/transcriptions", self.base_url);
        let response = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .multipart(form)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(classify_status(status, &body));
        }
        parse_transcription_response(&body)
    }
}

fn mime_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("flac") => "audio/flac",
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mpeg",
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

/// Parse either a plain or verbose transcription reply.
fn parse_transcription_response(body: &str) -> Result<TranscriptionOutput, BackendError> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| BackendError::ServiceUnavailable(format!("malformed reply: {e}")))?;

    let text = value["text"].as_str().unwrap_or_default().trim().to_string();

    let segments = value["segments"]
        .as_array()
        .map(|segments| {
            segments
                .iter()
                .filter_map(|segment| {
                    Some(TimedSpan {
                        start_s: segment["start"].as_f64()?,
                        end_s: segment["end"].as_f64()?,
                        text: segment["text"].as_str()?.trim().to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let words = value["words"]
        .as_array()
        .map(|words| {
            words
                .iter()
                .filter_map(|word| {
                    Some(TimedSpan {
                        start_s: word["start"].as_f64()?,
                        end_s: word["end"].as_f64()?,
                        text: word["word"].as_str()?.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(TranscriptionOutput {
        text,
        segments,
        words,
        tokens_used: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        let backend = OpenAiBackend::new("sk-test".to_string());
        assert_eq!(backend.id(), "cloud-b");
        assert_eq!(backend.model_id(), "whisper-1");
        assert_eq!(backend.requires_credential(), Some("OPENAI_API_KEY"));
        assert!(backend.supports_timestamps());
    }

    #[test]
    fn test_headers_carry_bearer_token() {
        let backend = OpenAiBackend::new("sk-test".to_string());
        let headers = backend.headers().unwrap();
        assert_eq!(
            headers.get(AUTHORIZATION).unwrap().to_str().unwrap(),
            "Bearer sk-test"
        );
    }

    #[test]
    fn test_parse_plain_response() {
        let output = parse_transcription_response(r#"{"text": " hello world "}"#).unwrap();
        assert_eq!(output.text, "hello world");
        assert!(output.segments.is_empty());
        assert!(output.words.is_empty());
    }

    #[test]
    fn test_parse_verbose_response() {
        let body = r#"{
            "text": "hello world",
            "segments": [
                {"start": 0.0, "end": 1.5, "text": " hello"},
                {"start": 1.5, "end": 2.75, "text": " world"}
            ],
            "words": [
                {"start": 0.0, "end": 0.8, "word": "hello"},
                {"start": 1.5, "end": 2.1, "word": "world"}
            ]
        }"#;
        let output = parse_transcription_response(body).unwrap();
        assert_eq!(output.text, "hello world");
        assert_eq!(output.segments.len(), 2);
        assert_eq!(output.segments[0].text, "hello");
        assert_eq!(output.segments[1].end_s, 2.75);
        assert_eq!(output.words.len(), 2);
        assert_eq!(output.words[1].text, "world");
    }

    #[test]
    fn test_parse_empty_text_is_success() {
        let output = parse_transcription_response(r#"{"text": ""}"#).unwrap();
        assert_eq!(output.text, "");
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, ""),
            BackendError::RateLimited(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR, ""),
            BackendError::ServiceUnavailable(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, ""),
            BackendError::InvalidCredential(_)
        ));
    }
}
