//! Workspace layout and file identity.
//!
//! A workspace root holds `input/`, `processed/<file_id>/`,
//! `transcribed/<file_id>/` and the pipeline state database. File identity
//! is content-derived so the same recording maps to the same directories
//! across runs.

use crate::defaults;
use crate::error::Result;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// How much of each end of the file participates in the identity hash.
const HASH_SPAN_BYTES: u64 = 1024 * 1024;

/// Workspace directory layout rooted at a base path.
#[derive(Debug, Clone, PartialEq)]
pub struct Workspace {
    base: PathBuf,
}

impl Workspace {
    /// Creates a workspace handle without touching the filesystem.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Creates the workspace directory tree if missing.
    pub fn ensure_layout(&self) -> Result<()> {
        fs::create_dir_all(self.input_dir())?;
        fs::create_dir_all(self.processed_root())?;
        fs::create_dir_all(self.transcribed_root())?;
        Ok(())
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn input_dir(&self) -> PathBuf {
        self.base.join("input")
    }

    pub fn processed_root(&self) -> PathBuf {
        self.base.join("processed")
    }

    pub fn transcribed_root(&self) -> PathBuf {
        self.base.join("transcribed")
    }

    /// Per-recording directory for chunk audio and processing metadata.
    pub fn processed_dir(&self, file_id: &str) -> PathBuf {
        self.processed_root().join(file_id)
    }

    /// Per-recording directory for transcripts and transcription metadata.
    pub fn transcribed_dir(&self, file_id: &str) -> PathBuf {
        self.transcribed_root().join(file_id)
    }

    /// Path of the durable pipeline state database.
    pub fn state_db_path(&self) -> PathBuf {
        self.base.join(".pipeline_state.db")
    }
}

/// Derive a stable identifier for a recording:
/// `<basename without extension>-<first 8 hex of content hash>`.
///
/// The hash covers the first and last megabytes plus the total size, which
/// is cheap for multi-hour recordings and stable across renames of the
/// containing directory.
pub fn file_id(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();

    let mut hasher = Sha256::new();
    let mut head = vec![0u8; HASH_SPAN_BYTES.min(size) as usize];
    file.read_exact(&mut head)?;
    hasher.update(&head);

    if size > HASH_SPAN_BYTES {
        let tail_start = size.saturating_sub(HASH_SPAN_BYTES).max(HASH_SPAN_BYTES);
        let tail_len = (size - tail_start) as usize;
        if tail_len > 0 {
            let mut tail = vec![0u8; tail_len];
            file.seek(SeekFrom::Start(tail_start))?;
            file.read_exact(&mut tail)?;
            hasher.update(&tail);
        }
    }
    hasher.update(size.to_le_bytes());

    let digest = hasher.finalize();
    let short: String = digest[..4].iter().map(|b| format!("{b:02x}")).collect();

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "recording".to_string());
    Ok(format!("{stem}-{short}"))
}

/// True if the extension marks a supported input container.
pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let lower = e.to_ascii_lowercase();
            defaults::AUDIO_EXTENSIONS.contains(&lower.as_str())
        })
        .unwrap_or(false)
}

/// Format a duration in seconds as `h:mm:ss`.
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    format!("{hours}:{minutes:02}:{secs:02}")
}
