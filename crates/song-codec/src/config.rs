//! Codec configuration loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::conform::{DEFAULT_CHUNK_FRAMES, OutputFormat};
use crate::error::ConfigError;

const DEFAULT_TRANSCODE_TIMEOUT_MS: u64 = 30_000;

/// Which [`crate::transcode::Transcoder`] backs the lossless fallback.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TranscoderKind {
    /// In-process Symphonia decode + WAV encode.
    #[default]
    Builtin,
    /// External program (see `transcoder_program`).
    Command,
}

/// Codec settings.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CodecConfig {
    /// Upper bound on one transcode in milliseconds.
    pub transcode_timeout_ms: u64,
    /// Transcoder used when native decode fails.
    pub transcoder: TranscoderKind,
    /// Program run by the command transcoder.
    pub transcoder_program: PathBuf,
    /// Resample decoded audio to this rate.
    pub output_sample_rate: Option<u32>,
    /// Remix decoded audio to this many channels.
    pub output_channels: Option<usize>,
    /// Drop the payload a decode consumed once it succeeds.
    pub release_payload_after_decode: bool,
    /// Resampler input chunk in frames.
    pub resample_chunk_frames: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            transcode_timeout_ms: DEFAULT_TRANSCODE_TIMEOUT_MS,
            transcoder: TranscoderKind::Builtin,
            transcoder_program: PathBuf::from("ffmpeg"),
            output_sample_rate: None,
            output_channels: None,
            release_payload_after_decode: true,
            resample_chunk_frames: DEFAULT_CHUNK_FRAMES,
        }
    }
}

impl CodecConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str::<CodecConfig>(raw)?)
    }

    pub fn transcode_timeout(&self) -> Duration {
        Duration::from_millis(self.transcode_timeout_ms)
    }

    pub fn output_format(&self) -> OutputFormat {
        OutputFormat {
            sample_rate: self.output_sample_rate,
            channels: self.output_channels,
        }
    }
}
