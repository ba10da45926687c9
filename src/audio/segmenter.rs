//! Silence-based segmentation of a decoded PCM stream.
//!
//! The stream is partitioned into fixed analysis frames; a maximal run of
//! frames whose RMS energy stays below the threshold, lasting at least the
//! minimum silence duration, closes the current chunk at the midpoint of
//! the run. Undersized chunks are merged into a neighbor afterwards, so
//! every recording yields at least one chunk covering `[0, duration)`.

use crate::defaults;

/// Parameters for silence segmentation.
#[derive(Debug, Clone, Copy)]
pub struct SegmenterParams {
    /// RMS threshold below which an analysis frame is silent (0, 1].
    pub silence_threshold: f64,
    /// Minimum sustained silence, in seconds, to split on.
    pub min_silence_duration_s: f64,
    /// Chunks shorter than this are merged into a neighbor.
    pub min_chunk_duration_s: f64,
    /// Analysis frame length in seconds.
    pub frame_seconds: f64,
}

impl Default for SegmenterParams {
    fn default() -> Self {
        Self {
            silence_threshold: defaults::SILENCE_THRESHOLD,
            min_silence_duration_s: defaults::MIN_SILENCE_DURATION_S,
            min_chunk_duration_s: defaults::MIN_CHUNK_DURATION_S,
            frame_seconds: defaults::FRAME_SECONDS,
        }
    }
}

/// Half-open time interval `[start_s, end_s)` over a recording.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkRange {
    pub chunk_index: usize,
    pub start_s: f64,
    pub end_s: f64,
}

impl ChunkRange {
    pub fn duration_s(&self) -> f64 {
        self.end_s - self.start_s
    }
}

/// Per-frame segmentation state.
#[derive(Debug, Clone, Copy, PartialEq)]
enum FrameState {
    Speech,
    /// Inside a silent run: first silent frame index and run length.
    InSilence { start_frame: u64, run_frames: u64 },
}

/// Streaming silence segmenter with bounded memory.
///
/// Feed samples with [`push`](Self::push); confirmed chunk boundaries are
/// returned as they are discovered. Call [`finish`](Self::finish) once the
/// stream ends to obtain the final merged chunk list.
pub struct SilenceSegmenter {
    params: SegmenterParams,
    sample_rate: u32,
    frame_len: usize,
    /// Partial frame carried across push calls.
    pending: Vec<f32>,
    state: FrameState,
    frames_seen: u64,
    samples_seen: u64,
    boundaries: Vec<f64>,
}

impl SilenceSegmenter {
    pub fn new(params: SegmenterParams, sample_rate: u32) -> Self {
        let frame_len = ((sample_rate as f64 * params.frame_seconds).round() as usize).max(1);
        Self {
            params,
            sample_rate,
            frame_len,
            pending: Vec::with_capacity(frame_len),
            state: FrameState::Speech,
            frames_seen: 0,
            samples_seen: 0,
            boundaries: Vec::new(),
        }
    }

    /// Seconds of audio consumed so far.
    pub fn elapsed_s(&self) -> f64 {
        self.samples_seen as f64 / self.sample_rate as f64
    }

    /// Feed a block of mono samples. Returns boundary times confirmed by
    /// this block, in increasing order.
    pub fn push(&mut self, samples: &[f32]) -> Vec<f64> {
        self.samples_seen += samples.len() as u64;

        let mut confirmed = Vec::new();
        let mut rest = samples;
        while !rest.is_empty() {
            let take = (self.frame_len - self.pending.len()).min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.pending.len() == self.frame_len {
                let rms = Self::rms(&self.pending);
                self.pending.clear();
                if let Some(boundary) = self.advance(rms) {
                    confirmed.push(boundary);
                }
            }
        }
        confirmed
    }

    /// Per-frame state transition. Returns a boundary time when a silence
    /// region long enough to split on is closed by a speech frame.
    fn advance(&mut self, rms: f64) -> Option<f64> {
        let frame = self.frames_seen;
        self.frames_seen += 1;
        let silent = rms < self.params.silence_threshold;

        match self.state {
            FrameState::Speech => {
                if silent {
                    self.state = FrameState::InSilence {
                        start_frame: frame,
                        run_frames: 1,
                    };
                }
                None
            }
            FrameState::InSilence {
                start_frame,
                run_frames,
            } => {
                if silent {
                    self.state = FrameState::InSilence {
                        start_frame,
                        run_frames: run_frames + 1,
                    };
                    None
                } else {
                    self.state = FrameState::Speech;
                    let run_s = run_frames as f64 * self.params.frame_seconds;
                    if run_s >= self.params.min_silence_duration_s {
                        let start_s = start_frame as f64 * self.params.frame_seconds;
                        let end_s = start_s + run_s;
                        let boundary = (start_s + end_s) / 2.0;
                        self.boundaries.push(boundary);
                        Some(boundary)
                    } else {
                        None
                    }
                }
            }
        }
    }

    /// Consume the segmenter and produce the final chunk list: contiguous
    /// coverage of `[0, duration)`, undersized chunks merged.
    pub fn finish(self) -> Vec<ChunkRange> {
        let duration_s = self.samples_seen as f64 / self.sample_rate as f64;

        let mut starts = vec![0.0];
        for &b in &self.boundaries {
            if b > 0.0 && b < duration_s {
                starts.push(b);
            }
        }

        let mut ranges: Vec<ChunkRange> = Vec::with_capacity(starts.len());
        for (i, &start) in starts.iter().enumerate() {
            let end = starts.get(i + 1).copied().unwrap_or(duration_s);
            ranges.push(ChunkRange {
                chunk_index: 0,
                start_s: start,
                end_s: end,
            });
        }

        let mut merged = merge_undersized(ranges, self.params.min_chunk_duration_s);
        for (i, range) in merged.iter_mut().enumerate() {
            range.chunk_index = i;
        }
        log::debug!(
            "segmentation produced {} chunk(s) over {:.3}s",
            merged.len(),
            duration_s
        );
        merged
    }

    fn rms(frame: &[f32]) -> f64 {
        let sum_sq: f64 = frame.iter().map(|&s| (s as f64) * (s as f64)).sum();
        (sum_sq / frame.len() as f64).sqrt()
    }
}

/// Fold every chunk shorter than the minimum into its predecessor, or for
/// the first chunk into its successor. A single chunk is always kept.
fn merge_undersized(ranges: Vec<ChunkRange>, min_chunk_s: f64) -> Vec<ChunkRange> {
    let mut merged: Vec<ChunkRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        if range.duration_s() >= min_chunk_s {
            merged.push(range);
            continue;
        }
        if let Some(prev) = merged.last_mut() {
            prev.end_s = range.end_s;
        } else {
            // First chunk is undersized: fold it into its successor by
            // keeping its start and letting the next range extend it.
            merged.push(range);
        }
    }

    // The first chunk may still be undersized with a successor following.
    if merged.len() > 1 && merged[0].duration_s() < min_chunk_s {
        let first_start = merged[0].start_s;
        merged.remove(0);
        merged[0].start_s = first_start;
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 16000;

    fn params(threshold: f64, min_silence: f64, min_chunk: f64) -> SegmenterParams {
        SegmenterParams {
            silence_threshold: threshold,
            min_silence_duration_s: min_silence,
            min_chunk_duration_s: min_chunk,
            frame_seconds: defaults::FRAME_SECONDS,
        }
    }

    fn tone(seconds: f64, amplitude: f32) -> Vec<f32> {
        vec![amplitude; (seconds * RATE as f64) as usize]
    }

    fn segment(signal: &[f32], params: SegmenterParams) -> Vec<ChunkRange> {
        let mut segmenter = SilenceSegmenter::new(params, RATE);
        // Feed in uneven blocks to exercise frame buffering.
        for block in signal.chunks(1234) {
            segmenter.push(block);
        }
        segmenter.finish()
    }

    fn assert_contiguous(ranges: &[ChunkRange], duration_s: f64) {
        assert!(!ranges.is_empty());
        assert_eq!(ranges[0].start_s, 0.0);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end_s, pair[1].start_s);
        }
        let last = ranges.last().unwrap();
        assert!((last.end_s - duration_s).abs() < 1e-9);
        for (i, r) in ranges.iter().enumerate() {
            assert_eq!(r.chunk_index, i);
            assert!(r.start_s < r.end_s);
        }
    }

    #[test]
    fn test_continuous_speech_single_chunk() {
        // Scenario: constant tone, no silence at all.
        let signal = tone(60.0, 0.2);
        let ranges = segment(&signal, params(0.01, 25.0, 5.0));

        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].start_s, 0.0);
        assert!((ranges[0].end_s - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_one_clean_split_at_midpoint() {
        // 30s speech + 30s silence + 30s speech: boundary at 45.
        let mut signal = tone(30.0, 0.3);
        signal.extend(tone(30.0, 0.0005));
        signal.extend(tone(30.0, 0.3));

        let ranges = segment(&signal, params(0.01, 25.0, 5.0));
        assert_eq!(ranges.len(), 2);
        assert!((ranges[0].end_s - 45.0).abs() < 0.001);
        assert!((ranges[1].start_s - 45.0).abs() < 0.001);
        assert_contiguous(&ranges, 90.0);
    }

    #[test]
    fn test_too_short_silence_ignored() {
        // 20s speech + 10s silence + 20s speech with min_silence 25: one chunk.
        let mut signal = tone(20.0, 0.3);
        signal.extend(tone(10.0, 0.0));
        signal.extend(tone(20.0, 0.3));

        let ranges = segment(&signal, params(0.01, 25.0, 5.0));
        assert_eq!(ranges.len(), 1);
        assert_contiguous(&ranges, 50.0);
    }

    #[test]
    fn test_multiple_splits() {
        // 40s speech, 30s silence, 40s speech, 30s silence, 3s speech:
        // boundaries at the silence midpoints 55 and 125.
        let mut signal = tone(40.0, 0.3);
        signal.extend(tone(30.0, 0.0));
        signal.extend(tone(40.0, 0.3));
        signal.extend(tone(30.0, 0.0));
        signal.extend(tone(3.0, 0.3));

        let ranges = segment(&signal, params(0.01, 25.0, 5.0));
        assert_eq!(ranges.len(), 3);
        assert!((ranges[0].end_s - 55.0).abs() < 0.05);
        assert!((ranges[1].end_s - 125.0).abs() < 0.05);
        assert_contiguous(&ranges, 143.0);
    }

    #[test]
    fn test_short_tail_merged_into_predecessor() {
        // 30s speech, 12s silence, 2s speech with min_silence 10 and
        // min_chunk 10: the 8s tail chunk [36, 44) merges back.
        let mut signal = tone(30.0, 0.3);
        signal.extend(tone(12.0, 0.0));
        signal.extend(tone(2.0, 0.3));

        let ranges = segment(&signal, params(0.01, 10.0, 10.0));
        assert_eq!(ranges.len(), 1);
        assert_contiguous(&ranges, 44.0);
    }

    #[test]
    fn test_short_first_chunk_merged_into_successor() {
        // 2s speech, 12s silence, 30s speech: first chunk [0, 8) is under
        // min_chunk 10 and folds forward.
        let mut signal = tone(2.0, 0.3);
        signal.extend(tone(12.0, 0.0));
        signal.extend(tone(30.0, 0.3));

        let ranges = segment(&signal, params(0.01, 10.0, 10.0));
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].start_s, 0.0);
        assert_contiguous(&ranges, 44.0);
    }

    #[test]
    fn test_recording_shorter_than_min_chunk() {
        let signal = tone(2.0, 0.3);
        let ranges = segment(&signal, params(0.01, 25.0, 5.0));
        assert_eq!(ranges.len(), 1);
        assert!((ranges[0].end_s - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_trailing_silence_does_not_split() {
        // Silence runs to the end of the recording: no closing speech
        // frame, so no boundary and no zero-length chunk.
        let mut signal = tone(30.0, 0.3);
        signal.extend(tone(30.0, 0.0));

        let ranges = segment(&signal, params(0.01, 25.0, 5.0));
        assert_eq!(ranges.len(), 1);
        assert_contiguous(&ranges, 60.0);
    }

    #[test]
    fn test_leading_silence_splits_at_midpoint() {
        // 30s silence then 30s speech: boundary at 15, both halves sized.
        let mut signal = tone(30.0, 0.0);
        signal.extend(tone(30.0, 0.3));

        let ranges = segment(&signal, params(0.01, 25.0, 5.0));
        assert_eq!(ranges.len(), 2);
        assert!((ranges[0].end_s - 15.0).abs() < 0.05);
        assert_contiguous(&ranges, 60.0);
    }

    #[test]
    fn test_push_reports_boundaries_lazily() {
        let mut segmenter = SilenceSegmenter::new(params(0.01, 25.0, 5.0), RATE);

        assert!(segmenter.push(&tone(30.0, 0.3)).is_empty());
        assert!(segmenter.push(&tone(30.0, 0.0)).is_empty());
        // The boundary is confirmed by the first speech frame after silence.
        let confirmed = segmenter.push(&tone(1.0, 0.3));
        assert_eq!(confirmed.len(), 1);
        assert!((confirmed[0] - 45.0).abs() < 0.05);
    }

    #[test]
    fn test_elapsed_tracks_samples() {
        let mut segmenter = SilenceSegmenter::new(SegmenterParams::default(), RATE);
        segmenter.push(&vec![0.0; 8000]);
        assert!((segmenter.elapsed_s() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_segmentation_is_deterministic() {
        let mut signal = tone(30.0, 0.3);
        signal.extend(tone(30.0, 0.0));
        signal.extend(tone(30.0, 0.3));

        let a = segment(&signal, params(0.01, 25.0, 5.0));
        let b = segment(&signal, params(0.01, 25.0, 5.0));
        assert_eq!(a, b);
    }

    #[test]
    fn test_merge_undersized_middle_chunk() {
        let ranges = vec![
            ChunkRange { chunk_index: 0, start_s: 0.0, end_s: 20.0 },
            ChunkRange { chunk_index: 0, start_s: 20.0, end_s: 22.0 },
            ChunkRange { chunk_index: 0, start_s: 22.0, end_s: 50.0 },
        ];
        let merged = merge_undersized(ranges, 5.0);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].end_s, 22.0);
        assert_eq!(merged[1].start_s, 22.0);
    }
}
