//! Lower-fidelity audio sources: neural tokens and metadata.
//!
//! Neither path is ever reported as integrity-verified audio.

use std::f32::consts::TAU;

use crate::error::DecodeError;
use crate::pcm::PcmBuffer;
use crate::song::SongMeta;

/// Output rate of the neural codec.
pub const NEURAL_SAMPLE_RATE: u32 = 24_000;
/// Tokens per second of audio (each token covers 10 ms).
pub const NEURAL_TOKENS_PER_SECOND: u32 = 100;
pub const NEURAL_FRAMES_PER_TOKEN: usize = (NEURAL_SAMPLE_RATE / NEURAL_TOKENS_PER_SECOND) as usize;

pub const METADATA_SAMPLE_RATE: u32 = 44_100;
pub const METADATA_DURATION_SECS: u32 = 4;
pub const METADATA_TONE_HZ: f32 = 440.0;
const TONE_AMPLITUDE: f32 = 0.1;

/// Token-to-audio model for the neural path.
///
/// Implementations must be deterministic for a given token sequence, and produce
/// output whose length is proportional to the token count.
pub trait NeuralVocoder: Send + Sync {
    fn name(&self) -> &str;

    fn decode(&self, tokens: &[i32]) -> Result<PcmBuffer, DecodeError>;
}

/// Arithmetic stand-in used until a real codec model is plugged in.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlaceholderVocoder;

impl NeuralVocoder for PlaceholderVocoder {
    fn name(&self) -> &str {
        "placeholder"
    }

    fn decode(&self, tokens: &[i32]) -> Result<PcmBuffer, DecodeError> {
        Ok(decode_neural(tokens))
    }
}

/// Map tokens to 24 kHz mono audio, holding each token for 10 ms.
pub fn decode_neural(tokens: &[i32]) -> PcmBuffer {
    let mut samples = Vec::with_capacity(tokens.len() * NEURAL_FRAMES_PER_TOKEN);
    for &token in tokens {
        let level = (token as f32 / 1000.0 * TONE_AMPLITUDE).clamp(-1.0, 1.0);
        samples.extend(std::iter::repeat_n(level, NEURAL_FRAMES_PER_TOKEN));
    }
    PcmBuffer::mono(NEURAL_SAMPLE_RATE, samples)
}

/// Fixed four-second reference tone. Never fails.
pub fn synthesize_from_metadata(meta: &SongMeta) -> PcmBuffer {
    let frames = (METADATA_SAMPLE_RATE * METADATA_DURATION_SECS) as usize;
    let step = TAU * METADATA_TONE_HZ / METADATA_SAMPLE_RATE as f32;
    let tone: Vec<f32> = (0..frames)
        .map(|i| (step * (i % METADATA_SAMPLE_RATE as usize) as f32).sin() * TONE_AMPLITUDE)
        .collect();
    tracing::debug!(bpm = meta.bpm, key = %meta.key, "synthesizing placeholder tone");
    PcmBuffer::mono(METADATA_SAMPLE_RATE, tone)
}
