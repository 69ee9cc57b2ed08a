//! Error types for the song codec.
//!
//! Each stage has its own enum so callers can tell a fatal parse failure apart from a
//! lossless-path failure that only downgrades playback.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Fatal to building a [`crate::Song`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("missing or malformed metadata block: {0}")]
    MissingMetadata(String),
}

/// Failure to rebuild the lossless payload from its chunks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReassemblyError {
    #[error("chunk {0} is missing")]
    MissingChunk(usize),

    #[error("descriptor declares {declared} chunks but {found} distinct indices were found")]
    ChunkCountMismatch { declared: usize, found: usize },

    #[error("chunk {0} appears more than once with different content")]
    ConflictingChunk(usize),

    #[error("malformed payload marker: {0}")]
    InvalidMarker(String),

    #[error("payload is not valid base64: {0}")]
    InvalidBase64(String),

    #[error("descriptor declares no chunks")]
    EmptyPayload,
}

/// Failure of a decode attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("native decode failed: {0}")]
    NativeDecodeFailed(String),

    #[error("transcode failed: {0}")]
    TranscodeFailed(String),

    #[error("transcode worker timed out after {0:?}")]
    WorkerTimeout(Duration),

    #[error("transcode worker crashed: {0}")]
    WorkerCrash(String),

    #[error("decode cancelled")]
    Cancelled,

    #[error("no {0} payload available")]
    MissingPayload(&'static str),

    #[error("invalid pcm buffer: {0}")]
    InvalidBuffer(String),

    #[error("output conversion failed: {0}")]
    Conform(String),

    #[error("all playback strategies failed: {0}")]
    Exhausted(String),

    #[error(transparent)]
    Wav(#[from] WavError),
}

/// The buffer cannot be represented as a canonical 16-bit WAV file.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WavError {
    #[error("buffer has no channels")]
    NoChannels,

    #[error("{0} channels exceed the WAV channel field")]
    TooManyChannels(usize),

    #[error("{data_bytes} bytes of PCM exceed the 32-bit RIFF size limit")]
    TooLarge { data_bytes: u64 },
}

/// A field value would change the structure of a rendered document.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WriterError {
    #[error("{field} cannot contain {found:?}")]
    UnsafeField { field: &'static str, found: String },
}

/// Failure to load a [`crate::config::CodecConfig`].
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
