//! Pipeline orchestrator.
//!
//! Drives a recording through ingest → segment → encode → transcribe →
//! combine, bracketing every stage with state-store transitions so a crash
//! at any point leaves a resumable record. The orchestrator is the only
//! component that mutates the state store; batches run strictly one
//! recording at a time.

use crate::audio::{AudioDecoder, ChunkWriter, SegmenterParams, SilenceSegmenter};
use crate::combine::{ChunkSection, SectionBody, TranscriptHeader, combine_transcript, word_count};
use crate::config::Config;
use crate::error::{NeuravoxError, Result};
use crate::metadata::{
    AudioInfo, ChunkMetadata, ChunkStatus, ChunkTranscriptionRecord, ProcessingMetadata,
    ProcessingParams, TranscriptionMetadata, write_manifest,
};
use crate::state::{FileRecord, FileStatus, Stage, StageRecord, StageStatus, StateStore};
use crate::transcribe::{
    BackendKind, CancelFlag, ChunkJob, ChunkOutcome, ChunkScheduler, SchedulerConfig,
    TranscribeOptions, TranscriptionBackend, create_backend,
};
use crate::workspace::{Workspace, file_id, is_audio_file};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Files above this size get a slow-processing warning at validation.
const LARGE_FILE_BYTES: u64 = 1024 * 1024 * 1024;

/// Outcome of one recording's run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    /// Some chunks transcribed, some failed; transcript produced with
    /// failure markers.
    Partial,
    Failed,
}

/// Structured result returned for every recording.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub file_id: String,
    pub status: RunStatus,
    pub failed_stage: Option<Stage>,
    pub message: Option<String>,
    pub transcript_path: Option<PathBuf>,
}

/// Read-only status surface: the file record plus its stage list.
#[derive(Debug, Clone)]
pub struct FileStatusReport {
    pub file: FileRecord,
    pub stages: Vec<StageRecord>,
}

/// Pipeline orchestrator owning the workspace and state store.
pub struct Pipeline {
    config: Config,
    workspace: Workspace,
    state: StateStore,
    cancel: CancelFlag,
}

impl Pipeline {
    /// Open a pipeline over the configured workspace. Fails when the
    /// configuration is invalid or the state store cannot be opened.
    pub fn new(config: Config) -> Result<Self> {
        let report = config.validate();
        if !report.is_valid() {
            return Err(NeuravoxError::Validation {
                message: report.errors.join("; "),
            });
        }
        for warning in &report.warnings {
            log::warn!("{warning}");
        }

        let workspace = Workspace::new(config.workspace.base_path.clone());
        workspace.ensure_layout()?;
        let state = StateStore::open(&workspace.state_db_path())?;

        Ok(Self {
            config,
            workspace,
            state,
            cancel: CancelFlag::new(),
        })
    }

    /// Flag that aborts the current run at the next suspension point.
    pub fn cancel_handle(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Process a single recording through every stage.
    pub async fn process_one(
        &self,
        path: &Path,
        backend_id: Option<&str>,
    ) -> Result<PipelineResult> {
        let kind = self.resolve_backend_kind(backend_id)?;
        self.validate_input(path, kind)?;
        let backend = create_backend(kind, &self.config)?;
        self.run_from_ingest(path, backend).await
    }

    /// Process recordings one at a time, FIFO. A failure does not abort
    /// the batch; per-file errors are folded into failed results.
    pub async fn process_batch(
        &self,
        paths: &[PathBuf],
        backend_id: Option<&str>,
    ) -> Vec<PipelineResult> {
        let mut results = Vec::with_capacity(paths.len());
        for path in paths {
            if self.cancel.is_cancelled() {
                break;
            }
            match self.process_one(path, backend_id).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    log::error!("processing {} failed: {e}", path.display());
                    results.push(PipelineResult {
                        file_id: file_id(path).unwrap_or_else(|_| path.display().to_string()),
                        status: RunStatus::Failed,
                        failed_stage: None,
                        message: Some(e.to_string()),
                        transcript_path: None,
                    });
                }
            }
        }
        results
    }

    /// Retry every resumable recording from its last successful
    /// checkpoint using the configured default backend.
    pub async fn resume(&self) -> Result<Vec<PipelineResult>> {
        let kind = self.resolve_backend_kind(None)?;
        let backend = create_backend(kind, &self.config)?;
        self.resume_with_backend(backend).await
    }

    /// Resume with an explicit backend instance.
    pub async fn resume_with_backend(
        &self,
        backend: Arc<dyn TranscriptionBackend>,
    ) -> Result<Vec<PipelineResult>> {
        let mut results = Vec::new();
        for file_id in self.state.list_resumable()? {
            if self.cancel.is_cancelled() {
                break;
            }
            let Some(record) = self.state.file_status(&file_id)? else {
                continue;
            };
            if record.status == FileStatus::Completed {
                continue;
            }
            log::info!("resuming {file_id}");
            match self.resume_one(&record, backend.clone()).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    log::error!("resume of {file_id} failed: {e}");
                    results.push(PipelineResult {
                        file_id,
                        status: RunStatus::Failed,
                        failed_stage: None,
                        message: Some(e.to_string()),
                        transcript_path: None,
                    });
                }
            }
        }
        Ok(results)
    }

    /// Overview of every recording the store knows about.
    pub fn summary(&self) -> Result<crate::state::StoreSummary> {
        self.state.summary()
    }

    /// Read-only status for one recording.
    pub fn status(&self, file_id: &str) -> Result<Option<FileStatusReport>> {
        let Some(file) = self.state.file_status(file_id)? else {
            return Ok(None);
        };
        let stages = self.state.stage_history(file_id)?;
        Ok(Some(FileStatusReport { file, stages }))
    }

    /// Process a recording with an explicit backend instance. Exposed for
    /// callers (and tests) that construct their own backend.
    pub async fn process_one_with_backend(
        &self,
        path: &Path,
        backend: Arc<dyn TranscriptionBackend>,
    ) -> Result<PipelineResult> {
        self.validate_input_file(path)?;
        self.run_from_ingest(path, backend).await
    }

    fn resolve_backend_kind(&self, backend_id: Option<&str>) -> Result<BackendKind> {
        let id = backend_id.unwrap_or(&self.config.transcription.default_backend);
        BackendKind::parse(id).ok_or_else(|| NeuravoxError::Validation {
            message: format!("unknown transcription backend '{id}'"),
        })
    }

    /// Pre-flight checks. Performed before any state mutation.
    fn validate_input(&self, path: &Path, kind: BackendKind) -> Result<()> {
        self.validate_input_file(path)?;
        if let Some(credential) = kind.credential_name()
            && self.config.credential(credential).is_none()
        {
            return Err(NeuravoxError::Validation {
                message: format!("backend '{}' requires {credential}", kind.id()),
            });
        }
        Ok(())
    }

    fn validate_input_file(&self, path: &Path) -> Result<()> {
        let metadata = std::fs::metadata(path).map_err(|_| NeuravoxError::Validation {
            message: format!("audio file not found: {}", path.display()),
        })?;
        if !metadata.is_file() {
            return Err(NeuravoxError::Validation {
                message: format!("path is not a regular file: {}", path.display()),
            });
        }
        if !is_audio_file(path) {
            return Err(NeuravoxError::Validation {
                message: format!("unsupported file extension: {}", path.display()),
            });
        }
        if metadata.len() > LARGE_FILE_BYTES {
            log::warn!(
                "large file ({} MiB) may take a long time to process: {}",
                metadata.len() / (1024 * 1024),
                path.display()
            );
        }
        Ok(())
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(NeuravoxError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn segmenter_params(&self) -> SegmenterParams {
        SegmenterParams {
            silence_threshold: self.config.processing.silence_threshold,
            min_silence_duration_s: self.config.processing.min_silence_duration,
            min_chunk_duration_s: self.config.processing.min_chunk_duration,
            ..SegmenterParams::default()
        }
    }

    /// Full run starting at ingest. Used for first runs and for resumes
    /// whose segmentation or encoding previously failed.
    async fn run_from_ingest(
        &self,
        path: &Path,
        backend: Arc<dyn TranscriptionBackend>,
    ) -> Result<PipelineResult> {
        let file_id = file_id(path)?;
        self.state.begin(&file_id, path)?;

        // Stage: ingest. Probe the container and confirm it decodes.
        self.check_cancelled()?;
        let preamble = {
            self.state.stage_start(&file_id, Stage::Ingest)?;
            match AudioDecoder::open(
                path,
                self.config.processing.sample_rate,
                self.config.processing.normalize,
            ) {
                Ok(decoder) => {
                    let preamble = *decoder.preamble();
                    if preamble.duration_hint_s == Some(0.0) {
                        let e = NeuravoxError::EmptyAudio {
                            path: path.display().to_string(),
                        };
                        self.state.stage_fail(&file_id, Stage::Ingest, &e.to_string())?;
                        return Ok(failed_result(&file_id, Stage::Ingest, &e));
                    }
                    let detail = serde_json::json!({
                        "source_sample_rate": preamble.source_sample_rate,
                        "channels": preamble.channels,
                        "duration_hint_s": preamble.duration_hint_s,
                    });
                    self.state
                        .stage_complete(&file_id, Stage::Ingest, Some(&detail))?;
                    preamble
                }
                Err(e) => {
                    self.state.stage_fail(&file_id, Stage::Ingest, &e.to_string())?;
                    return Ok(failed_result(&file_id, Stage::Ingest, &e));
                }
            }
        };

        // Stage: segment. One full scan for exact duration and boundaries.
        self.check_cancelled()?;
        let processing_started = Instant::now();
        self.state.stage_start(&file_id, Stage::Segment)?;
        let (ranges, duration_s) = match self.scan_segments(path) {
            Ok(result) => {
                let detail = serde_json::json!({
                    "chunks": result.0.len(),
                    "duration_s": result.1,
                });
                self.state
                    .stage_complete(&file_id, Stage::Segment, Some(&detail))?;
                result
            }
            Err(e) => {
                self.state
                    .stage_fail(&file_id, Stage::Segment, &e.to_string())?;
                return Ok(failed_result(&file_id, Stage::Segment, &e));
            }
        };

        // Stage: encode. Second decode pass writes the chunk files. A
        // rerun may segment differently, so stale chunk rows go first.
        self.check_cancelled()?;
        self.state.stage_start(&file_id, Stage::Encode)?;
        self.state.clear_chunks(&file_id)?;
        let metadata = match self.encode_chunks(
            path,
            &file_id,
            &ranges,
            duration_s,
            &preamble,
            processing_started,
        ) {
            Ok(metadata) => {
                let detail = serde_json::json!({
                    "chunks": metadata.chunks.len(),
                    "output_format": self.config.processing.output_format.extension(),
                });
                self.state
                    .stage_complete(&file_id, Stage::Encode, Some(&detail))?;
                metadata
            }
            Err(e) => {
                self.state
                    .stage_fail(&file_id, Stage::Encode, &e.to_string())?;
                return Ok(failed_result(&file_id, Stage::Encode, &e));
            }
        };

        self.transcribe_and_combine(&metadata, backend, None).await
    }

    /// Scan the whole stream, returning merged chunk ranges and the exact
    /// decoded duration.
    fn scan_segments(&self, path: &Path) -> Result<(Vec<crate::audio::ChunkRange>, f64)> {
        let mut decoder = AudioDecoder::open(
            path,
            self.config.processing.sample_rate,
            self.config.processing.normalize,
        )?;
        let mut segmenter =
            SilenceSegmenter::new(self.segmenter_params(), self.config.processing.sample_rate);

        while let Some(block) = decoder.next_block() {
            segmenter.push(&block?);
        }

        let duration_s = segmenter.elapsed_s();
        if duration_s == 0.0 {
            return Err(NeuravoxError::EmptyAudio {
                path: path.display().to_string(),
            });
        }
        Ok((segmenter.finish(), duration_s))
    }

    /// Re-decode the stream and write one encoded file per range.
    fn encode_chunks(
        &self,
        path: &Path,
        file_id: &str,
        ranges: &[crate::audio::ChunkRange],
        duration_s: f64,
        preamble: &crate::audio::AudioPreamble,
        processing_started: Instant,
    ) -> Result<ProcessingMetadata> {
        let sample_rate = self.config.processing.sample_rate;
        let output_dir = self.workspace.processed_dir(file_id);
        let writer = ChunkWriter::new(
            &output_dir,
            sample_rate,
            self.config.processing.output_format,
        );

        let mut decoder = AudioDecoder::open(path, sample_rate, self.config.processing.normalize)?;
        let mut buffer: Vec<f32> = Vec::new();
        let mut consumed: u64 = 0;
        let mut pending = ranges.iter().peekable();
        let mut chunk_entries = Vec::with_capacity(ranges.len());

        let total = ranges.len();
        let absolute_source = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());

        let mut write_range = |range: &crate::audio::ChunkRange,
                               samples: Vec<f32>|
         -> Result<()> {
            let chunk_path = writer.write_chunk(range, &samples)?;
            self.state
                .chunk_upsert(file_id, range.chunk_index, &chunk_path, range.start_s, range.end_s)?;
            chunk_entries.push(ChunkMetadata::new(
                range.chunk_index,
                total,
                range.start_s,
                range.end_s,
                chunk_path,
                absolute_source.clone(),
            ));
            Ok(())
        };

        while let Some(block) = decoder.next_block() {
            buffer.extend(block?);
            while let Some(&range) = pending.peek() {
                let end_idx = (range.end_s * sample_rate as f64).round() as u64;
                let needed = (end_idx - consumed) as usize;
                if buffer.len() < needed {
                    break;
                }
                let samples: Vec<f32> = buffer.drain(..needed).collect();
                write_range(range, samples)?;
                consumed = end_idx;
                pending.next();
            }
        }

        // Rounding can leave the final range one block short of its exact
        // sample count; flush whatever remains into it.
        if let Some(range) = pending.next() {
            let samples = std::mem::take(&mut buffer);
            write_range(range, samples)?;
        }

        let metadata = ProcessingMetadata {
            file_id: file_id.to_string(),
            original_file: absolute_source,
            processed_at: Utc::now(),
            processing_time_s: processing_started.elapsed().as_secs_f64(),
            audio_info: AudioInfo {
                duration_s: crate::metadata::round_time(duration_s),
                sample_rate: preamble.source_sample_rate,
                channels: preamble.channels,
            },
            processing_params: ProcessingParams {
                silence_threshold: self.config.processing.silence_threshold,
                min_silence_duration: self.config.processing.min_silence_duration,
                sample_rate,
                output_format: self.config.processing.output_format.extension().to_string(),
            },
            chunks: chunk_entries,
        };
        metadata.save(&ProcessingMetadata::path_in(&output_dir))?;
        write_manifest(&metadata, &output_dir)?;
        Ok(metadata)
    }

    /// Stages transcribe + combine. `only_chunks` restricts the scheduler
    /// to the given indices (resume path); chunks outside it reuse their
    /// existing transcripts.
    async fn transcribe_and_combine(
        &self,
        metadata: &ProcessingMetadata,
        backend: Arc<dyn TranscriptionBackend>,
        only_chunks: Option<Vec<usize>>,
    ) -> Result<PipelineResult> {
        let file_id = &metadata.file_id;
        let transcript_dir = self.workspace.transcribed_dir(file_id);
        std::fs::create_dir_all(&transcript_dir)?;

        self.check_cancelled()?;
        self.state.stage_start(file_id, Stage::Transcribe)?;
        let started_at = Utc::now();

        let jobs: Vec<ChunkJob> = metadata
            .chunks
            .iter()
            .filter(|chunk| match &only_chunks {
                Some(indices) => indices.contains(&chunk.chunk_index),
                None => true,
            })
            .map(|chunk| ChunkJob {
                chunk_index: chunk.chunk_index,
                audio_path: chunk.file_path.clone(),
            })
            .collect();

        let scheduler = ChunkScheduler::new(SchedulerConfig {
            max_concurrent: self.config.transcription.max_concurrent,
            timeout: Duration::from_secs(self.config.transcription.timeout_s),
            ..SchedulerConfig::default()
        });
        let options = TranscribeOptions {
            language: self.config.transcription.language.clone(),
            temperature: None,
            include_timestamps: self.config.transcription.include_timestamps
                && backend.supports_timestamps(),
            system_prompt: self.config.transcription.system_prompt.clone(),
        };

        let outcomes = scheduler.run(jobs, backend.clone(), &options, &self.cancel).await;

        // Persist per-chunk transcripts for everything that finished.
        for outcome in &outcomes {
            if let Ok(output) = &outcome.result {
                let text_path = transcript_dir.join(format!("chunk_{:03}.txt", outcome.chunk_index));
                std::fs::write(&text_path, &output.text)?;
                self.state
                    .mark_chunk_transcribed(file_id, outcome.chunk_index, &text_path)?;
            }
        }

        let scheduled: Vec<usize> = outcomes.iter().map(|o| o.chunk_index).collect();
        self.write_transcription_metadata(
            metadata,
            &backend,
            started_at,
            &outcomes,
            &transcript_dir,
        )?;

        let was_cancelled = self.cancel.is_cancelled();
        let expected = match &only_chunks {
            Some(indices) => indices.len(),
            None => metadata.chunks.len(),
        };
        if was_cancelled && scheduled.len() < expected {
            self.state.stage_fail(file_id, Stage::Transcribe, "cancelled")?;
            return Err(NeuravoxError::Cancelled);
        }

        // A chunk counts as transcribed once its text file exists, whether
        // it was done this pass or a previous one.
        let total = metadata.chunks.len();
        let transcribed = metadata
            .chunks
            .iter()
            .filter(|chunk| {
                transcript_dir
                    .join(format!("chunk_{:03}.txt", chunk.chunk_index))
                    .exists()
            })
            .count();
        let failed = total - transcribed;

        if failed > 0 {
            self.state.stage_fail(
                file_id,
                Stage::Transcribe,
                &format!("{failed} of {total} chunk(s) failed"),
            )?;
        } else {
            let detail = serde_json::json!({
                "backend": backend.id(),
                "chunks_transcribed": scheduled.len(),
            });
            self.state
                .stage_complete(file_id, Stage::Transcribe, Some(&detail))?;
        }

        // Combine runs even for partial transcriptions; failed chunks are
        // marked in place in the document.
        let transcript_path = self.combine_stage(metadata, &backend, Some(&outcomes))?;

        if failed == 0 {
            self.state.mark_completed(file_id)?;
            Ok(PipelineResult {
                file_id: file_id.clone(),
                status: RunStatus::Completed,
                failed_stage: None,
                message: None,
                transcript_path: Some(transcript_path),
            })
        } else {
            self.state.mark_failed(file_id)?;
            Ok(PipelineResult {
                file_id: file_id.clone(),
                status: if transcribed > 0 {
                    RunStatus::Partial
                } else {
                    RunStatus::Failed
                },
                failed_stage: Some(Stage::Transcribe),
                message: Some(format!("{failed} chunk(s) failed to transcribe")),
                transcript_path: Some(transcript_path),
            })
        }
    }

    /// Merge this pass's outcomes with any previous transcription
    /// metadata and write the summary file.
    fn write_transcription_metadata(
        &self,
        metadata: &ProcessingMetadata,
        backend: &Arc<dyn TranscriptionBackend>,
        started_at: chrono::DateTime<Utc>,
        outcomes: &[ChunkOutcome],
        transcript_dir: &Path,
    ) -> Result<()> {
        let metadata_path = TranscriptionMetadata::path_in(transcript_dir);
        let previous = TranscriptionMetadata::load(&metadata_path).ok();

        let mut records: Vec<ChunkTranscriptionRecord> = Vec::new();
        for chunk in &metadata.chunks {
            let outcome = outcomes.iter().find(|o| o.chunk_index == chunk.chunk_index);
            let record = match outcome {
                Some(outcome) => ChunkTranscriptionRecord {
                    chunk_index: chunk.chunk_index,
                    status: if outcome.is_ok() {
                        ChunkStatus::Ok
                    } else {
                        ChunkStatus::Failed
                    },
                    elapsed_s: crate::metadata::round_time(outcome.elapsed_s),
                    error: outcome.result.as_ref().err().map(|e| e.to_string()),
                },
                None => {
                    // Not scheduled this pass: keep the previous record,
                    // or mark it failed-pending if there is none.
                    previous
                        .as_ref()
                        .and_then(|p| {
                            p.chunks
                                .iter()
                                .find(|r| r.chunk_index == chunk.chunk_index)
                                .cloned()
                        })
                        .unwrap_or(ChunkTranscriptionRecord {
                            chunk_index: chunk.chunk_index,
                            status: ChunkStatus::Failed,
                            elapsed_s: 0.0,
                            error: Some("not transcribed".to_string()),
                        })
                }
            };
            records.push(record);
        }

        let mut total_words = 0;
        let mut total_chars = 0;
        for chunk in &metadata.chunks {
            let path = transcript_dir.join(format!("chunk_{:03}.txt", chunk.chunk_index));
            if let Ok(text) = std::fs::read_to_string(path) {
                total_words += word_count(&text);
                total_chars += text.chars().count();
            }
        }
        let failures = records
            .iter()
            .filter(|r| r.status == ChunkStatus::Failed)
            .count();

        TranscriptionMetadata {
            file_id: metadata.file_id.clone(),
            backend_id: backend.id().to_string(),
            backend_model_id: backend.model_id().to_string(),
            started_at,
            completed_at: Utc::now(),
            chunks: records,
            total_words,
            total_chars,
            failures,
        }
        .save(&metadata_path)
    }

    /// Stage: combine. Builds the document from per-chunk transcript
    /// files, falling back to recorded failure reasons.
    fn combine_stage(
        &self,
        metadata: &ProcessingMetadata,
        backend: &Arc<dyn TranscriptionBackend>,
        outcomes: Option<&[ChunkOutcome]>,
    ) -> Result<PathBuf> {
        let file_id = &metadata.file_id;
        self.state.stage_start(file_id, Stage::Combine)?;

        let result = self.build_combined_document(metadata, backend, outcomes);
        match &result {
            Ok(path) => {
                let detail = serde_json::json!({"transcript": path.display().to_string()});
                self.state
                    .stage_complete(file_id, Stage::Combine, Some(&detail))?;
            }
            Err(e) => {
                self.state
                    .stage_fail(file_id, Stage::Combine, &e.to_string())?;
            }
        }
        result
    }

    fn build_combined_document(
        &self,
        metadata: &ProcessingMetadata,
        backend: &Arc<dyn TranscriptionBackend>,
        outcomes: Option<&[ChunkOutcome]>,
    ) -> Result<PathBuf> {
        let file_id = &metadata.file_id;
        let transcript_dir = self.workspace.transcribed_dir(file_id);
        let transcription_meta =
            TranscriptionMetadata::load(&TranscriptionMetadata::path_in(&transcript_dir)).ok();

        let mut sections = Vec::with_capacity(metadata.chunks.len());
        for chunk in &metadata.chunks {
            let text_path = transcript_dir.join(format!("chunk_{:03}.txt", chunk.chunk_index));
            let body = if let Ok(text) = std::fs::read_to_string(&text_path) {
                SectionBody::Text(text)
            } else {
                let reason = outcomes
                    .and_then(|outcomes| {
                        outcomes
                            .iter()
                            .find(|o| o.chunk_index == chunk.chunk_index)
                            .and_then(|o| o.result.as_ref().err().map(|e| e.to_string()))
                    })
                    .or_else(|| {
                        transcription_meta.as_ref().and_then(|m| {
                            m.chunks
                                .iter()
                                .find(|r| r.chunk_index == chunk.chunk_index)
                                .and_then(|r| r.error.clone())
                        })
                    })
                    .unwrap_or_else(|| "not transcribed".to_string());
                SectionBody::Failed(reason)
            };
            sections.push(ChunkSection {
                start_s: chunk.start_s,
                end_s: chunk.end_s,
                body,
            });
        }

        let document = combine_transcript(
            &TranscriptHeader {
                file_id,
                source: &metadata.original_file,
                duration_s: metadata.audio_info.duration_s,
                backend_id: backend.id(),
                model_id: backend.model_id(),
            },
            &sections,
        );

        let path = transcript_dir.join(format!("{file_id}_transcript.md"));
        std::fs::write(&path, document)?;
        Ok(path)
    }

    /// Resume one recording from its last successful checkpoint.
    async fn resume_one(
        &self,
        record: &FileRecord,
        backend: Arc<dyn TranscriptionBackend>,
    ) -> Result<PipelineResult> {
        let file_id = &record.file_id;
        let stage_of = |stage: Stage| self.state.stage_status(file_id, stage);

        let preprocessing_done = [Stage::Ingest, Stage::Segment, Stage::Encode]
            .into_iter()
            .all(|stage| matches!(stage_of(stage), Ok(Some(StageStatus::Completed))));

        if !preprocessing_done {
            // Segmentation or encoding is unfinished: restart from ingest.
            return self
                .run_from_ingest(&record.original_path, backend)
                .await;
        }

        let processed_dir = self.workspace.processed_dir(file_id);
        let metadata = ProcessingMetadata::load(&ProcessingMetadata::path_in(&processed_dir))?;

        match stage_of(Stage::Transcribe)? {
            Some(StageStatus::Completed) => {
                // Only the combine step is outstanding.
                let transcript_path = self.combine_stage(&metadata, &backend, None)?;
                self.state.mark_completed(file_id)?;
                Ok(PipelineResult {
                    file_id: file_id.clone(),
                    status: RunStatus::Completed,
                    failed_stage: None,
                    message: None,
                    transcript_path: Some(transcript_path),
                })
            }
            _ => {
                // Reuse chunks on disk; retranscribe only what is missing.
                let remaining = self.state.untranscribed_chunks(file_id)?;
                self.transcribe_and_combine(&metadata, backend, Some(remaining))
                    .await
            }
        }
    }
}

fn failed_result(file_id: &str, stage: Stage, error: &NeuravoxError) -> PipelineResult {
    PipelineResult {
        file_id: file_id.to_string(),
        status: RunStatus::Failed,
        failed_stage: Some(stage),
        message: Some(error.to_string()),
        transcript_path: None,
    }
}
