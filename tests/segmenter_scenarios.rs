//! End-to-end segmentation scenarios: WAV file in, chunk ranges and
//! encoded chunk files out.

use neuravox::audio::{AudioDecoder, ChunkRange, ChunkWriter, SegmenterParams, SilenceSegmenter};
use neuravox::config::OutputFormat;
use std::path::{Path, PathBuf};

const RATE: u32 = 16000;

/// Write a mono 16kHz WAV built from (seconds, amplitude) phases.
fn write_phased_wav(dir: &Path, name: &str, phases: &[(f64, f32)]) -> PathBuf {
    let path = dir.join(name);
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for &(seconds, amplitude) in phases {
        let count = (seconds * RATE as f64) as usize;
        let value = (amplitude * i16::MAX as f32) as i16;
        for _ in 0..count {
            writer.write_sample(value).unwrap();
        }
    }
    writer.finalize().unwrap();
    path
}

fn segment_file(path: &Path, params: SegmenterParams) -> (Vec<ChunkRange>, f64) {
    let mut decoder = AudioDecoder::open(path, RATE, true).unwrap();
    let mut segmenter = SilenceSegmenter::new(params, RATE);
    while let Some(block) = decoder.next_block() {
        segmenter.push(&block.unwrap());
    }
    let duration_s = segmenter.elapsed_s();
    (segmenter.finish(), duration_s)
}

fn spec_params() -> SegmenterParams {
    SegmenterParams {
        silence_threshold: 0.01,
        min_silence_duration_s: 25.0,
        min_chunk_duration_s: 5.0,
        ..SegmenterParams::default()
    }
}

fn assert_covers(ranges: &[ChunkRange], duration_s: f64) {
    assert_eq!(ranges[0].start_s, 0.0);
    for pair in ranges.windows(2) {
        assert_eq!(pair[0].end_s, pair[1].start_s);
    }
    assert!((ranges.last().unwrap().end_s - duration_s).abs() < 1e-6);
}

#[test]
fn continuous_speech_yields_one_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_phased_wav(dir.path(), "tone.wav", &[(60.0, 0.2)]);

    let (ranges, duration) = segment_file(&path, spec_params());
    assert_eq!(ranges.len(), 1);
    assert!((duration - 60.0).abs() < 0.01);
    assert_covers(&ranges, duration);
}

#[test]
fn one_clean_split_at_silence_midpoint() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_phased_wav(
        dir.path(),
        "split.wav",
        &[(30.0, 0.3), (30.0, 0.0005), (30.0, 0.3)],
    );

    let (ranges, duration) = segment_file(&path, spec_params());
    assert_eq!(ranges.len(), 2);
    assert!((ranges[0].end_s - 45.0).abs() < 0.001);
    assert!(ranges.iter().all(|r| r.duration_s() >= 5.0));
    assert_covers(&ranges, duration);
}

#[test]
fn too_short_silence_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_phased_wav(
        dir.path(),
        "short_gap.wav",
        &[(20.0, 0.3), (10.0, 0.0), (20.0, 0.3)],
    );

    let (ranges, duration) = segment_file(&path, spec_params());
    assert_eq!(ranges.len(), 1);
    assert!((duration - 50.0).abs() < 0.01);
}

#[test]
fn multiple_splits_with_short_tail_merge() {
    // The trailing fragment after the last silence is shorter than the
    // minimum chunk duration and merges into its predecessor.
    let params = SegmenterParams {
        silence_threshold: 0.01,
        min_silence_duration_s: 10.0,
        min_chunk_duration_s: 10.0,
        ..SegmenterParams::default()
    };
    let dir = tempfile::tempdir().unwrap();
    let path = write_phased_wav(
        dir.path(),
        "tail.wav",
        &[(30.0, 0.3), (12.0, 0.0), (30.0, 0.3), (12.0, 0.0), (2.0, 0.3)],
    );

    let (ranges, duration) = segment_file(&path, params);
    // Boundaries at 36 and 78; the 8s tail [78, 86) merges back.
    assert_eq!(ranges.len(), 2);
    assert!((ranges[0].end_s - 36.0).abs() < 0.05);
    assert!((ranges[1].end_s - 86.0).abs() < 0.01);
    assert_covers(&ranges, duration);
    assert!(ranges.iter().all(|r| r.duration_s() >= 10.0));
}

#[test]
fn segmented_chunks_encode_to_flac() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_phased_wav(
        dir.path(),
        "encode.wav",
        &[(30.0, 0.3), (30.0, 0.0), (30.0, 0.3)],
    );

    let (ranges, _) = segment_file(&path, spec_params());
    assert_eq!(ranges.len(), 2);

    let mut decoder = AudioDecoder::open(&path, RATE, true).unwrap();
    let samples = decoder.read_all().unwrap();

    let out_dir = dir.path().join("chunks");
    let writer = ChunkWriter::new(&out_dir, RATE, OutputFormat::Flac);
    for range in &ranges {
        let start = (range.start_s * RATE as f64).round() as usize;
        let end = (range.end_s * RATE as f64).round() as usize;
        writer.write_chunk(range, &samples[start..end]).unwrap();
    }

    assert!(out_dir.join("chunk_000.flac").exists());
    assert!(out_dir.join("chunk_001.flac").exists());

    // Encoded chunks decode back to their range duration.
    let mut decoder = AudioDecoder::open(&out_dir.join("chunk_000.flac"), RATE, true).unwrap();
    let chunk_samples = decoder.read_all().unwrap();
    let expected = (ranges[0].duration_s() * RATE as f64).round() as usize;
    assert_eq!(chunk_samples.len(), expected);
}
