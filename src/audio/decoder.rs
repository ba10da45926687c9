//! Decoder adapter: arbitrary container/codec to mono f32 PCM.
//!
//! Wraps symphonia's probe + packet decode loop behind a pull interface.
//! Multi-channel audio is down-mixed by channel averaging and resampled to
//! the target rate with a fixed-chunk FFT resampler. The resulting stream
//! is finite, forward-only and non-restartable; callers that need a second
//! pass open a new decoder.

use crate::error::{NeuravoxError, Result};
use rubato::{FftFixedIn, Resampler};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Fixed input chunk size for the resampler.
const RESAMPLER_CHUNK: usize = 1024;

/// Source stream properties known before any samples are pulled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioPreamble {
    pub source_sample_rate: u32,
    pub channels: u16,
    /// Container-reported duration; the exact value comes from scanning.
    pub duration_hint_s: Option<f64>,
}

/// Forward-only decoder producing mono f32 blocks at the target rate.
pub struct AudioDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    preamble: AudioPreamble,
    normalize: bool,
    resampler: Option<FftFixedIn<f32>>,
    /// Mono samples waiting for a full resampler chunk.
    resample_in: Vec<f32>,
    /// Mono samples fed into the resampler path so far.
    in_samples: u64,
    /// Samples emitted to the caller so far.
    out_samples: u64,
    /// Approximate compressed-stream offset for error reporting.
    byte_offset: u64,
    target_rate: u32,
    finished: bool,
}

impl AudioDecoder {
    /// Probe and open an audio file for decoding at the target rate.
    pub fn open(path: &Path, target_sample_rate: u32, normalize: bool) -> Result<Self> {
        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|_| NeuravoxError::UnsupportedFormat {
                path: path.display().to_string(),
            })?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| NeuravoxError::UnsupportedFormat {
                path: path.display().to_string(),
            })?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|_| NeuravoxError::UnsupportedFormat {
                path: path.display().to_string(),
            })?;

        let channels = codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(1)
            .max(1);
        let source_sample_rate = codec_params.sample_rate.unwrap_or(target_sample_rate);
        let duration_hint_s = codec_params
            .n_frames
            .map(|frames| frames as f64 / source_sample_rate as f64);

        let resampler = if source_sample_rate != target_sample_rate {
            Some(
                FftFixedIn::<f32>::new(
                    source_sample_rate as usize,
                    target_sample_rate as usize,
                    RESAMPLER_CHUNK,
                    1,
                    1,
                )
                .map_err(|e| NeuravoxError::Decode {
                    offset: 0,
                    message: format!("failed to create resampler: {e}"),
                })?,
            )
        } else {
            None
        };

        log::debug!(
            "decoding {} ({} Hz, {} ch) -> {} Hz mono",
            path.display(),
            source_sample_rate,
            channels,
            target_sample_rate
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            preamble: AudioPreamble {
                source_sample_rate,
                channels,
                duration_hint_s,
            },
            normalize,
            resampler,
            resample_in: Vec::with_capacity(RESAMPLER_CHUNK),
            in_samples: 0,
            out_samples: 0,
            byte_offset: 0,
            target_rate: target_sample_rate,
            finished: false,
        })
    }

    pub fn preamble(&self) -> &AudioPreamble {
        &self.preamble
    }

    /// Pull the next block of mono samples at the target rate.
    ///
    /// Returns `None` once the stream is exhausted. Decode errors on
    /// individual packets are skipped; stream-level failures surface as
    /// `Err`.
    pub fn next_block(&mut self) -> Option<Result<Vec<f32>>> {
        if self.finished {
            return None;
        }

        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                // End of stream surfaces as an I/O error from the reader.
                Err(SymphoniaError::IoError(_)) => {
                    self.finished = true;
                    let tail = self.flush();
                    return if tail.is_empty() { None } else { Some(Ok(tail)) };
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(NeuravoxError::Decode {
                        offset: self.byte_offset,
                        message: e.to_string(),
                    }));
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }
            self.byte_offset += packet.buf().len() as u64;

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let mut sample_buf =
                        SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                    sample_buf.copy_interleaved_ref(decoded);

                    let mono = downmix(sample_buf.samples(), spec.channels.count().max(1));
                    let block = self.feed(&mono);
                    if !block.is_empty() {
                        return Some(Ok(block));
                    }
                    // Resampler needs more input; keep pulling packets.
                }
                // A corrupt packet is skipped; the rest may still decode.
                Err(SymphoniaError::DecodeError(_)) | Err(SymphoniaError::IoError(_)) => continue,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(NeuravoxError::Decode {
                        offset: self.byte_offset,
                        message: e.to_string(),
                    }));
                }
            }
        }
    }

    /// Push mono samples through the resampler path, returning whatever is
    /// ready for emission.
    fn feed(&mut self, mono: &[f32]) -> Vec<f32> {
        self.in_samples += mono.len() as u64;

        let Some(resampler) = self.resampler.as_mut() else {
            return self.emit(mono.to_vec());
        };

        let mut out = Vec::new();
        let mut rest = mono;
        while !rest.is_empty() {
            let space = RESAMPLER_CHUNK - self.resample_in.len();
            let take = space.min(rest.len());
            self.resample_in.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.resample_in.len() == RESAMPLER_CHUNK {
                if let Ok(blocks) = resampler.process(&[&self.resample_in[..]], None) {
                    out.extend_from_slice(&blocks[0]);
                }
                self.resample_in.clear();
            }
        }
        self.emit(out)
    }

    /// Flush the resampler at end of stream, trimming the zero padding so
    /// the emitted total matches the source duration.
    fn flush(&mut self) -> Vec<f32> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Vec::new();
        };

        let mut out = Vec::new();
        if !self.resample_in.is_empty() {
            self.resample_in.resize(RESAMPLER_CHUNK, 0.0);
            if let Ok(blocks) = resampler.process(&[&self.resample_in[..]], None) {
                out.extend_from_slice(&blocks[0]);
            }
            self.resample_in.clear();
        }

        let expected_total = (self.in_samples as f64 * self.target_rate as f64
            / self.preamble.source_sample_rate as f64)
            .round() as u64;
        let remaining = expected_total.saturating_sub(self.out_samples) as usize;
        out.truncate(remaining);
        self.emit(out)
    }

    fn emit(&mut self, mut block: Vec<f32>) -> Vec<f32> {
        if self.normalize {
            for sample in &mut block {
                *sample = sample.clamp(-1.0, 1.0);
            }
        }
        self.out_samples += block.len() as u64;
        block
    }

    /// Drain the remaining stream into one buffer. Intended for chunk
    /// encoding and tests; segmentation should pull blocks instead.
    pub fn read_all(&mut self) -> Result<Vec<f32>> {
        let mut all = Vec::new();
        while let Some(block) = self.next_block() {
            all.extend(block?);
        }
        Ok(all)
    }
}

/// Average interleaved channels into mono.
fn downmix(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        return samples.to_vec();
    }
    let frames = samples.len() / channels;
    let mut mono = Vec::with_capacity(frames);
    for frame in 0..frames {
        let mut sum = 0.0f32;
        for ch in 0..channels {
            sum += samples[frame * channels + ch];
        }
        mono.push(sum / channels as f32);
    }
    mono
}
