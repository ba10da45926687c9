//! Chunk encoding to FLAC or WAV.
//!
//! Each chunk is encoded to a temporary file in the destination directory
//! and renamed into place, so a crash mid-encode never leaves a partial
//! chunk under its final name.

use crate::audio::segmenter::ChunkRange;
use crate::config::OutputFormat;
use crate::error::{NeuravoxError, Result};
use flacenc::component::BitRepr;
use flacenc::error::Verify;
use std::fs;
use std::path::PathBuf;

/// Writes encoded chunk files for one recording.
pub struct ChunkWriter {
    dir: PathBuf,
    sample_rate: u32,
    format: OutputFormat,
}

impl ChunkWriter {
    pub fn new(dir: impl Into<PathBuf>, sample_rate: u32, format: OutputFormat) -> Self {
        Self {
            dir: dir.into(),
            sample_rate,
            format,
        }
    }

    /// File name for a chunk index, e.g. `chunk_003.flac`.
    pub fn chunk_file_name(index: usize, format: OutputFormat) -> String {
        format!("chunk_{index:03}.{}", format.extension())
    }

    /// Destination path for a chunk index.
    pub fn chunk_path(&self, index: usize) -> PathBuf {
        self.dir.join(Self::chunk_file_name(index, self.format))
    }

    /// Encode the PCM covering one range and atomically move it into place.
    pub fn write_chunk(&self, range: &ChunkRange, samples: &[f32]) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let final_path = self.chunk_path(range.chunk_index);
        let tmp_path = self.dir.join(format!(
            ".{}.tmp",
            Self::chunk_file_name(range.chunk_index, self.format)
        ));

        let encoded = match self.format {
            OutputFormat::Flac => encode_flac(samples, self.sample_rate)?,
            OutputFormat::Wav => encode_wav(samples, self.sample_rate)?,
            OutputFormat::Mp3 => {
                return Err(NeuravoxError::Encode {
                    message: "mp3 chunk output is not supported".to_string(),
                });
            }
        };

        fs::write(&tmp_path, &encoded)?;
        fs::rename(&tmp_path, &final_path)?;

        log::debug!(
            "wrote chunk {} [{:.3} - {:.3}) to {}",
            range.chunk_index,
            range.start_s,
            range.end_s,
            final_path.display()
        );
        Ok(final_path)
    }
}

fn samples_to_i32(samples: &[f32]) -> Vec<i32> {
    samples
        .iter()
        .map(|&s| (s * 32767.0).clamp(-32768.0, 32767.0) as i32)
        .collect()
}

fn encode_flac(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let pcm = samples_to_i32(samples);
    // Highest-compression settings, equivalent to libFLAC level 8:
    // 4096-sample blocks with order-12 LPC prediction.
    let mut config = flacenc::config::Encoder::default();
    config.block_size = 4096;
    config.subframe_coding.qlpc.lpc_order = 12;
    let config = config
        .into_verified()
        .map_err(|_| NeuravoxError::Encode {
            message: "invalid FLAC encoder configuration".to_string(),
        })?;
    let source = flacenc::source::MemSource::from_samples(&pcm, 1, 16, sample_rate as usize);
    let stream = flacenc::encode_with_fixed_block_size(&config, source, config.block_size)
        .map_err(|e| NeuravoxError::Encode {
            message: format!("FLAC encoding failed: {e:?}"),
        })?;

    let mut sink = flacenc::bitsink::ByteSink::new();
    stream.write(&mut sink).map_err(|e| NeuravoxError::Encode {
        message: format!("FLAC stream write failed: {e:?}"),
    })?;
    Ok(sink.as_slice().to_vec())
}

fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut buffer = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut buffer, spec).map_err(|e| NeuravoxError::Encode {
                message: format!("failed to create WAV writer: {e}"),
            })?;
        for &sample in samples {
            let value = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(value)
                .map_err(|e| NeuravoxError::Encode {
                    message: format!("failed to write sample: {e}"),
                })?;
        }
        writer.finalize().map_err(|e| NeuravoxError::Encode {
            message: format!("failed to finalize WAV: {e}"),
        })?;
    }
    Ok(buffer.into_inner())
}
