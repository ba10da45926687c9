//! Unified metadata for processing and transcription passes.
//!
//! Everything here is serialized as JSON under the recording's processed
//! and transcribed directories. Readers tolerate unknown fields so older
//! releases can open newer workspaces.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Round a time to the stored precision of 6 decimal places (microseconds).
pub fn round_time(seconds: f64) -> f64 {
    (seconds * 1_000_000.0).round() / 1_000_000.0
}

/// Basic properties of the decoded source audio.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AudioInfo {
    pub duration_s: f64,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Segmentation parameters actually used for a recording.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ProcessingParams {
    pub silence_threshold: f64,
    pub min_silence_duration: f64,
    pub sample_rate: u32,
    pub output_format: String,
}

/// Metadata for one encoded audio chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub start_s: f64,
    pub end_s: f64,
    pub duration_s: f64,
    pub file_path: PathBuf,
    pub source_file: PathBuf,
}

impl ChunkMetadata {
    /// Builds a chunk record with times rounded to stored precision.
    pub fn new(
        chunk_index: usize,
        total_chunks: usize,
        start_s: f64,
        end_s: f64,
        file_path: PathBuf,
        source_file: PathBuf,
    ) -> Self {
        let start_s = round_time(start_s);
        let end_s = round_time(end_s);
        Self {
            chunk_index,
            total_chunks,
            start_s,
            end_s,
            duration_s: round_time(end_s - start_s),
            file_path,
            source_file,
        }
    }
}

/// Per-recording record of the segmentation + encoding pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessingMetadata {
    pub file_id: String,
    pub original_file: PathBuf,
    pub processed_at: DateTime<Utc>,
    pub processing_time_s: f64,
    pub audio_info: AudioInfo,
    pub processing_params: ProcessingParams,
    pub chunks: Vec<ChunkMetadata>,
}

impl ProcessingMetadata {
    /// Save as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load from JSON, tolerating unknown fields.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Conventional location under a recording's processed directory.
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join("processing_metadata.json")
    }
}

/// Per-chunk status row in the transcription metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkTranscriptionRecord {
    pub chunk_index: usize,
    pub status: ChunkStatus,
    pub elapsed_s: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    Ok,
    Failed,
}

/// Per-recording summary of the transcription pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptionMetadata {
    pub file_id: String,
    pub backend_id: String,
    pub backend_model_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub chunks: Vec<ChunkTranscriptionRecord>,
    pub total_words: usize,
    #[serde(default)]
    pub total_chars: usize,
    pub failures: usize,
}

impl TranscriptionMetadata {
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Conventional location under a recording's transcribed directory.
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join("transcription_metadata.json")
    }
}

/// Write the `<file_id>_manifest.json` consumed by transcription tooling:
/// the chunk list plus audio info, without processing timings.
pub fn write_manifest(metadata: &ProcessingMetadata, dir: &Path) -> Result<PathBuf> {
    let manifest = serde_json::json!({
        "file_id": metadata.file_id,
        "original_file": metadata.original_file,
        "total_chunks": metadata.chunks.len(),
        "audio_info": metadata.audio_info,
        "chunks": metadata.chunks,
    });
    let path = dir.join(format!("{}_manifest.json", metadata.file_id));
    fs::write(&path, serde_json::to_string_pretty(&manifest)?)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_processing() -> ProcessingMetadata {
        ProcessingMetadata {
            file_id: "talk-0a1b2c3d".to_string(),
            original_file: PathBuf::from("/audio/talk.mp3"),
            processed_at: "2026-03-01T10:30:00.123456Z".parse().unwrap(),
            processing_time_s: 12.5,
            audio_info: AudioInfo {
                duration_s: 143.0,
                sample_rate: 44100,
                channels: 2,
            },
            processing_params: ProcessingParams {
                silence_threshold: 0.01,
                min_silence_duration: 25.0,
                sample_rate: 16000,
                output_format: "flac".to_string(),
            },
            chunks: vec![
                ChunkMetadata::new(
                    0,
                    2,
                    0.0,
                    55.0,
                    PathBuf::from("/ws/processed/talk-0a1b2c3d/chunk_000.flac"),
                    PathBuf::from("/audio/talk.mp3"),
                ),
                ChunkMetadata::new(
                    1,
                    2,
                    55.0,
                    143.0,
                    PathBuf::from("/ws/processed/talk-0a1b2c3d/chunk_001.flac"),
                    PathBuf::from("/audio/talk.mp3"),
                ),
            ],
        }
    }

    #[test]
    fn test_round_time() {
        assert_eq!(round_time(1.23456789), 1.234568);
        assert_eq!(round_time(0.0000004), 0.0);
        assert_eq!(round_time(55.0), 55.0);
    }

    #[test]
    fn test_chunk_metadata_duration_derived() {
        let chunk = ChunkMetadata::new(
            0,
            1,
            1.5,
            4.25,
            PathBuf::from("c.flac"),
            PathBuf::from("s.mp3"),
        );
        assert_eq!(chunk.duration_s, 2.75);
    }

    #[test]
    fn test_processing_metadata_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = ProcessingMetadata::path_in(dir.path());
        let metadata = sample_processing();

        metadata.save(&path).unwrap();
        let loaded = ProcessingMetadata::load(&path).unwrap();
        assert_eq!(metadata, loaded);
    }

    #[test]
    fn test_processing_metadata_timestamp_round_trips_to_same_string() {
        let metadata = sample_processing();
        let json = serde_json::to_string(&metadata).unwrap();
        let loaded: ProcessingMetadata = serde_json::from_str(&json).unwrap();
        let json2 = serde_json::to_string(&loaded).unwrap();
        assert_eq!(json, json2);
    }

    #[test]
    fn test_load_tolerates_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processing_metadata.json");
        let mut value = serde_json::to_value(sample_processing()).unwrap();
        value["added_in_a_future_release"] = serde_json::json!({"x": 1});
        fs::write(&path, serde_json::to_string(&value).unwrap()).unwrap();

        let loaded = ProcessingMetadata::load(&path).unwrap();
        assert_eq!(loaded.file_id, "talk-0a1b2c3d");
    }

    #[test]
    fn test_transcription_metadata_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = TranscriptionMetadata::path_in(dir.path());
        let metadata = TranscriptionMetadata {
            file_id: "talk-0a1b2c3d".to_string(),
            backend_id: "cloud-a".to_string(),
            backend_model_id: "gemini-2.0-flash".to_string(),
            started_at: "2026-03-01T10:31:00Z".parse().unwrap(),
            completed_at: "2026-03-01T10:35:42Z".parse().unwrap(),
            chunks: vec![
                ChunkTranscriptionRecord {
                    chunk_index: 0,
                    status: ChunkStatus::Ok,
                    elapsed_s: 3.2,
                    error: None,
                },
                ChunkTranscriptionRecord {
                    chunk_index: 1,
                    status: ChunkStatus::Failed,
                    elapsed_s: 1.1,
                    error: Some("invalid credential".to_string()),
                },
            ],
            total_words: 412,
            total_chars: 2305,
            failures: 1,
        };

        metadata.save(&path).unwrap();
        let loaded = TranscriptionMetadata::load(&path).unwrap();
        assert_eq!(metadata, loaded);
    }

    #[test]
    fn test_chunk_status_serializes_lowercase() {
        let record = ChunkTranscriptionRecord {
            chunk_index: 0,
            status: ChunkStatus::Ok,
            elapsed_s: 0.5,
            error: None,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"status\":\"ok\""));
        assert!(!json.contains("error"));
    }

    #[test]
    fn test_write_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = sample_processing();
        let path = write_manifest(&metadata, dir.path()).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "talk-0a1b2c3d_manifest.json"
        );

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["total_chunks"], 2);
        assert_eq!(value["chunks"][1]["chunk_index"], 1);
        assert_eq!(value["audio_info"]["sample_rate"], 44100);
    }
}
