//! Reading, verifying, and decoding self-describing song documents.
//!
//! A document carries mandatory metadata plus up to two audio payloads: a
//! base64-chunked lossless file and a neural-codec token stream. [`SongCodec`] parses
//! it, checks the lossless payload against its SHA-256 digest, and decodes the best
//! available payload, falling back lossless → neural → synthetic.

pub mod chain;
pub mod codec;
pub mod config;
pub mod conform;
pub mod decode;
pub mod error;
pub mod format;
pub mod integrity;
pub mod pcm;
pub mod reassemble;
pub mod song;
pub mod strategy;
pub mod synth;
pub mod transcode;
pub mod wav;
pub mod writer;

pub use codec::{DecodedSong, DecodedWav, SongCodec, SongCodecBuilder};
pub use config::{CodecConfig, TranscoderKind};
pub use conform::OutputFormat;
pub use error::{ConfigError, DecodeError, ParseError, ReassemblyError, WavError, WriterError};
pub use pcm::PcmBuffer;
pub use song::{Analysis, AudioDescriptor, NeuralDescriptor, Song, SongMeta, SongWarning};
pub use transcode::CancelToken;
pub use writer::SongDocument;

pub use song_codec_types::{
    DecodeReport, Downgrade, IntegrityReport, IntegrityStatus, PlaybackStrategy, SizeEstimate,
};
