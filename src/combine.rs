//! Transcript combination.
//!
//! Merges per-chunk transcriptions into one markdown document with
//! chunk-range headings. Timestamps come from the segmentation boundaries,
//! not from backend-reported times, so the document is deterministic for a
//! given chunk list.

use crate::workspace::format_duration;
use std::path::Path;

/// Body of one chunk section: transcribed text or a failure marker.
#[derive(Debug, Clone, PartialEq)]
pub enum SectionBody {
    Text(String),
    Failed(String),
}

/// One chunk's contribution to the combined document.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSection {
    pub start_s: f64,
    pub end_s: f64,
    pub body: SectionBody,
}

/// Recording identity for the document preamble.
#[derive(Debug, Clone)]
pub struct TranscriptHeader<'a> {
    pub file_id: &'a str,
    pub source: &'a Path,
    pub duration_s: f64,
    pub backend_id: &'a str,
    pub model_id: &'a str,
}

/// Assemble the combined transcript. Sections must be ordered by chunk
/// index; failed chunks are kept in place with a failure marker. Running
/// this twice over the same inputs yields byte-identical output.
pub fn combine_transcript(header: &TranscriptHeader<'_>, sections: &[ChunkSection]) -> String {
    let mut doc = String::new();

    doc.push_str(&format!("# {}\n", header.file_id));
    doc.push_str(&format!("- source: {}\n", header.source.display()));
    doc.push_str(&format!("- duration: {}\n", format_duration(header.duration_s)));
    doc.push_str(&format!(
        "- backend: {} / {}\n",
        header.backend_id, header.model_id
    ));

    let total = sections.len();
    for (i, section) in sections.iter().enumerate() {
        doc.push('\n');
        if i > 0 {
            doc.push_str("---\n\n");
        }
        doc.push_str(&format!(
            "## Chunk {} of {}  [{:.3} \u{2013} {:.3}]\n",
            i + 1,
            total,
            section.start_s,
            section.end_s
        ));
        match &section.body {
            SectionBody::Text(text) => {
                doc.push_str(text.trim_end());
                doc.push('\n');
            }
            SectionBody::Failed(reason) => {
                doc.push_str(&format!("[FAILED: {reason}]\n"));
            }
        }
    }

    doc
}

/// Whitespace-separated word count, used for transcription metadata.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}
