//! Song data model produced by [`crate::format::parse`].

use serde::Serialize;
use thiserror::Error;

use crate::error::ReassemblyError;
use crate::integrity;

/// Placeholder chord summary used when a document has no analysis block.
pub const UNKNOWN_CHORDS: &str = "| N | N | N | N |";

/// Mandatory song metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SongMeta {
    pub bpm: u32,
    pub key: String,
    pub time_signature: String,
    /// Document format version, when declared.
    pub version: Option<String>,
    /// Producer build identifier, when declared.
    pub build: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Analysis {
    pub chord_summary: String,
}

impl Default for Analysis {
    fn default() -> Self {
        Self {
            chord_summary: UNKNOWN_CHORDS.to_string(),
        }
    }
}

/// Declared shape of the embedded lossless payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AudioDescriptor {
    /// Always `"flac"` for a descriptor that parsed.
    pub format: String,
    pub sample_rate: u32,
    pub channels: u16,
    /// Lowercase hex SHA-256 of the reassembled bytes.
    pub expected_digest: Option<String>,
    pub chunk_count: usize,
    /// Base64 characters per chunk used by the producer (informational).
    pub chunk_size_hint: usize,
}

/// Declared shape of the embedded neural-codec tokens.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NeuralDescriptor {
    pub model: String,
    pub token_count: usize,
    pub compression_ratio: f32,
}

/// Non-fatal findings recorded while parsing.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SongWarning {
    #[error("document version {found} is not supported format {supported}; parsing anyway")]
    VersionMismatch {
        found: String,
        supported: &'static str,
    },

    #[error("malformed {block} block: {reason}")]
    MalformedBlock { block: &'static str, reason: String },

    #[error("lossless payload unavailable: {0}")]
    LosslessUnavailable(ReassemblyError),

    #[error("neural tokens unreadable: {0}")]
    NeuralTokensUnreadable(String),

    #[error("neural block declares {declared} tokens but {found} were embedded")]
    TokenCountMismatch { declared: usize, found: usize },

    #[error("neural tokens present without a neural block; ignored")]
    OrphanNeuralTokens,
}

/// A parsed song document.
///
/// `raw_lossless_bytes` and `neural_tokens` are filled by the parser and released by
/// [`crate::SongCodec`] after a successful decode.
#[derive(Clone, Debug, PartialEq)]
pub struct Song {
    pub meta: SongMeta,
    pub analysis: Analysis,
    pub audio: Option<AudioDescriptor>,
    pub neural: Option<NeuralDescriptor>,
    pub raw_lossless_bytes: Option<Vec<u8>>,
    pub neural_tokens: Option<Vec<i32>>,
    pub warnings: Vec<SongWarning>,
    released_digest: Option<String>,
}

impl Song {
    /// A song with metadata only; every other field empty.
    pub fn new(meta: SongMeta) -> Self {
        Self {
            meta,
            analysis: Analysis::default(),
            audio: None,
            neural: None,
            raw_lossless_bytes: None,
            neural_tokens: None,
            warnings: Vec::new(),
            released_digest: None,
        }
    }

    /// Digest declared by the audio descriptor, if any.
    pub fn expected_digest(&self) -> Option<&str> {
        self.audio
            .as_ref()
            .and_then(|a| a.expected_digest.as_deref())
    }

    /// Digest of the lossless payload: computed from the bytes while present, or the
    /// value remembered when they were released.
    pub fn payload_digest(&self) -> Option<String> {
        match self.raw_lossless_bytes.as_deref() {
            Some(bytes) => Some(integrity::sha256_hex(bytes)),
            None => self.released_digest.clone(),
        }
    }

    /// Move the lossless bytes out, remembering their digest for later verification.
    pub fn take_lossless_bytes(&mut self) -> Option<Vec<u8>> {
        let bytes = self.raw_lossless_bytes.take()?;
        self.released_digest = Some(integrity::sha256_hex(&bytes));
        Some(bytes)
    }

    /// Drop the lossless bytes to bound peak memory. Returns the number of bytes freed.
    pub fn release_lossless_bytes(&mut self) -> usize {
        self.take_lossless_bytes().map(|b| b.len()).unwrap_or(0)
    }

    /// Drop the neural tokens. Returns the number of tokens freed.
    pub fn release_neural_tokens(&mut self) -> usize {
        self.neural_tokens.take().map(|t| t.len()).unwrap_or(0)
    }
}
