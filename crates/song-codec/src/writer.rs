//! Song document writer.
//!
//! Produces the text form read by [`crate::format::parse`]: metadata and analysis
//! blocks, an optional lossless payload split into base64 chunks, and optional neural
//! tokens.

use std::fmt::Write as _;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::error::WriterError;
use crate::format::{DEFAULT_CHUNK_SIZE, NEURAL_TOKENS_MARKER};
use crate::integrity::sha256_hex;
use crate::reassemble::PAYLOAD_MARKER_PREFIX;
use crate::song::{SongMeta, UNKNOWN_CHORDS};

/// Version written into the metadata block.
pub const WRITER_FORMAT_VERSION: &str = "2.0";

struct LosslessPart {
    bytes: Vec<u8>,
    sample_rate: u32,
    channels: u16,
}

struct NeuralPart {
    model: String,
    tokens: Vec<i32>,
    compression_ratio: f32,
}

/// Builder for a song document.
pub struct SongDocument {
    meta: SongMeta,
    chords: Option<String>,
    lossless: Option<LosslessPart>,
    neural: Option<NeuralPart>,
    chunk_size: usize,
}

impl SongDocument {
    pub fn new(meta: SongMeta) -> Self {
        Self {
            meta,
            chords: None,
            lossless: None,
            neural: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chords(mut self, chords: impl Into<String>) -> Self {
        self.chords = Some(chords.into());
        self
    }

    /// Embed an encoded audio file (normally FLAC) as the lossless payload.
    pub fn with_lossless(mut self, bytes: Vec<u8>, sample_rate: u32, channels: u16) -> Self {
        self.lossless = Some(LosslessPart {
            bytes,
            sample_rate,
            channels,
        });
        self
    }

    pub fn with_neural(
        mut self,
        model: impl Into<String>,
        tokens: Vec<i32>,
        compression_ratio: f32,
    ) -> Self {
        self.neural = Some(NeuralPart {
            model: model.into(),
            tokens,
            compression_ratio,
        });
        self
    }

    /// Base64 characters per payload chunk. Zero is treated as one.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Render the document text.
    ///
    /// Values are written verbatim, so text that would end a quoted value, close a
    /// block, or start a marker is rejected instead of escaped.
    pub fn render(&self) -> Result<String, WriterError> {
        let mut out = String::new();
        let meta = &self.meta;
        let version = meta.version.as_deref().unwrap_or(WRITER_FORMAT_VERSION);
        let chords = self.chords.as_deref().unwrap_or(UNKNOWN_CHORDS);

        check_quoted("key", &meta.key)?;
        check_quoted("time", &meta.time_signature)?;
        check_quoted("version", version)?;
        if let Some(build) = meta.build.as_deref() {
            check_quoted("build", build)?;
        }
        check_bare("chords", chords)?;
        if let Some(neural) = &self.neural {
            check_quoted("model", &neural.model)?;
        }

        out.push_str("Song {\n");
        let _ = write!(
            out,
            "  meta: {{ bpm: {}, key: \"{}\", time: \"{}\", version: \"{}\"",
            meta.bpm, meta.key, meta.time_signature, version
        );
        if let Some(build) = meta.build.as_deref() {
            let _ = write!(out, ", build: \"{build}\"");
        }
        out.push_str(" }\n");

        let _ = writeln!(out, "  analysis: {{\n    chords: {chords}\n  }}");

        if let Some(lossless) = &self.lossless {
            let encoded = STANDARD.encode(&lossless.bytes);
            let chunks: Vec<&str> = if encoded.is_empty() {
                vec![""]
            } else {
                encoded
                    .as_bytes()
                    .chunks(self.chunk_size)
                    .filter_map(|c| std::str::from_utf8(c).ok())
                    .collect()
            };

            let _ = writeln!(
                out,
                "  audio: {{\n    format: \"flac\", sr: {}, channels: {},\n    sha256: \"{}\", chunks: {}, chunk_size: {}\n  }}\n",
                lossless.sample_rate,
                lossless.channels,
                sha256_hex(&lossless.bytes),
                chunks.len(),
                self.chunk_size
            );
            for (i, chunk) in chunks.iter().enumerate() {
                let _ = writeln!(out, "{PAYLOAD_MARKER_PREFIX}{}>>\n{chunk}", i + 1);
            }
        }

        if let Some(neural) = &self.neural {
            let _ = writeln!(
                out,
                "\n  neural: {{\n    format: \"neural_codec\", model: \"{}\",\n    tokens: {}, compression_ratio: {:.2}\n  }}\n",
                neural.model,
                neural.tokens.len(),
                neural.compression_ratio
            );
            let tokens = serde_json::to_string(&neural.tokens).unwrap_or_else(|_| "[]".to_string());
            let _ = writeln!(out, "{NEURAL_TOKENS_MARKER}\n{tokens}");
        }

        out.push_str("}\n");
        Ok(out)
    }
}

const BLOCK_BREAKERS: [&str; 3] = ["{", "}", "<<"];

/// Text written without quotes, running to the end of its block.
fn check_bare(field: &'static str, value: &str) -> Result<(), WriterError> {
    match BLOCK_BREAKERS.iter().find(|s| value.contains(*s)) {
        Some(found) => Err(WriterError::UnsafeField {
            field,
            found: found.to_string(),
        }),
        None => Ok(()),
    }
}

fn check_quoted(field: &'static str, value: &str) -> Result<(), WriterError> {
    if let Some(c) = value.chars().find(|c| matches!(c, '"' | '\n' | '\r')) {
        return Err(WriterError::UnsafeField {
            field,
            found: c.to_string(),
        });
    }
    check_bare(field, value)
}
