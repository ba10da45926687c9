//! Audio decode, segmentation and chunk encoding.

pub mod chunk_writer;
pub mod decoder;
pub mod segmenter;

pub use chunk_writer::ChunkWriter;
pub use decoder::{AudioDecoder, AudioPreamble};
pub use segmenter::{ChunkRange, SegmenterParams, SilenceSegmenter};
