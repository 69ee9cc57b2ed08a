use serde::{Deserialize, Serialize};

/// Outcome of comparing the lossless payload against its declared digest.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityStatus {
    /// No digest was declared, or there is no lossless payload to hash.
    #[default]
    Unverified,
    /// A verification is in flight (reported by async callers only).
    Verifying,
    /// SHA-256 of the reassembled bytes equals the declared digest.
    Verified,
    /// SHA-256 of the reassembled bytes differs from the declared digest.
    Mismatch,
}

impl IntegrityStatus {
    /// Short label for logs and CLI output.
    pub fn label(&self) -> &'static str {
        match self {
            IntegrityStatus::Unverified => "unverified",
            IntegrityStatus::Verifying => "verifying",
            IntegrityStatus::Verified => "verified",
            IntegrityStatus::Mismatch => "mismatch",
        }
    }
}

/// Fidelity tier used to produce playable audio.
///
/// Variants are listed from highest to lowest fidelity.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStrategy {
    /// Decode the embedded lossless payload.
    Lossless,
    /// Synthesize from neural-codec tokens.
    Neural,
    /// Synthesize a placeholder from song metadata.
    Synthetic,
}

impl PlaybackStrategy {
    /// All strategies in preference order.
    pub const ALL: [PlaybackStrategy; 3] = [
        PlaybackStrategy::Lossless,
        PlaybackStrategy::Neural,
        PlaybackStrategy::Synthetic,
    ];

    /// Higher is better.
    pub fn fidelity(&self) -> u8 {
        match self {
            PlaybackStrategy::Lossless => 2,
            PlaybackStrategy::Neural => 1,
            PlaybackStrategy::Synthetic => 0,
        }
    }

    /// Next strategy down the fallback order, if any.
    pub fn fallback(&self) -> Option<PlaybackStrategy> {
        match self {
            PlaybackStrategy::Lossless => Some(PlaybackStrategy::Neural),
            PlaybackStrategy::Neural => Some(PlaybackStrategy::Synthetic),
            PlaybackStrategy::Synthetic => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PlaybackStrategy::Lossless => "lossless",
            PlaybackStrategy::Neural => "neural",
            PlaybackStrategy::Synthetic => "synthetic",
        }
    }
}

/// Digest comparison details returned to UI/transport layers.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    /// Comparison outcome.
    pub status: IntegrityStatus,
    /// Lowercase hex SHA-256 of the payload, when a payload exists.
    pub computed: Option<String>,
    /// Digest declared by the document, when present.
    pub expected: Option<String>,
}

/// Approximate embedded payload sizes in bytes.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SizeEstimate {
    /// Raw lossless payload size.
    pub lossless: u64,
    /// Neural token payload size (2 bytes per token).
    pub neural: u64,
    /// Sum of both payloads.
    pub total: u64,
}

/// A single explicit step down the fallback order.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Downgrade {
    /// Strategy that failed.
    pub from: PlaybackStrategy,
    /// Strategy tried next.
    pub to: PlaybackStrategy,
    /// Human-readable failure reason.
    pub reason: String,
}

/// Summary of one decode call, reported alongside the produced audio.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecodeReport {
    /// Strategy selected from the song contents before decoding.
    pub requested: PlaybackStrategy,
    /// Strategy that actually produced the audio.
    pub used: PlaybackStrategy,
    /// Integrity of the lossless payload (independent of decode success).
    pub integrity: IntegrityStatus,
    /// Downgrades taken on the way, in order.
    pub downgrades: Vec<Downgrade>,
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Output channel count.
    pub channels: u16,
    /// Output length in frames.
    pub frames: u64,
    /// Output duration in milliseconds.
    pub duration_ms: u64,
}

impl DecodeReport {
    /// `true` only when the audio came from a lossless payload whose digest matched.
    ///
    /// Neural and synthetic output is never reported as verified.
    pub fn is_verified_audio(&self) -> bool {
        self.used == PlaybackStrategy::Lossless && self.integrity == IntegrityStatus::Verified
    }

    /// `true` when at least one fallback step was taken.
    pub fn downgraded(&self) -> bool {
        !self.downgrades.is_empty()
    }
}
