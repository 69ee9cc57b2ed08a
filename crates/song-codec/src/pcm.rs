//! In-memory decoded audio.

use std::time::Duration;

use crate::error::DecodeError;

/// Planar `f32` audio: one equal-length plane per channel.
///
/// Produced by every decode strategy and consumed by [`crate::wav::encode_wav`]. A buffer
/// owns its samples and holds no reference back to the song it came from.
#[derive(Clone, Debug, PartialEq)]
pub struct PcmBuffer {
    sample_rate: u32,
    planes: Vec<Vec<f32>>,
}

impl PcmBuffer {
    /// Build from per-channel planes. All planes must have the same length.
    pub fn from_planes(sample_rate: u32, planes: Vec<Vec<f32>>) -> Result<Self, DecodeError> {
        let Some(first) = planes.first() else {
            return Err(DecodeError::InvalidBuffer("no channels".to_string()));
        };
        let frames = first.len();
        if let Some((ch, plane)) = planes.iter().enumerate().find(|(_, p)| p.len() != frames) {
            return Err(DecodeError::InvalidBuffer(format!(
                "channel {ch} has {} frames, expected {frames}",
                plane.len()
            )));
        }
        Ok(Self {
            sample_rate,
            planes,
        })
    }

    /// Build from interleaved samples (`frame0[ch0], frame0[ch1], ...`).
    ///
    /// A trailing partial frame is dropped.
    pub fn from_interleaved(
        sample_rate: u32,
        channels: usize,
        samples: &[f32],
    ) -> Result<Self, DecodeError> {
        if channels == 0 {
            return Err(DecodeError::InvalidBuffer("no channels".to_string()));
        }
        let frames = samples.len() / channels;
        let mut planes = vec![Vec::with_capacity(frames); channels];
        for frame in samples.chunks_exact(channels) {
            for (plane, sample) in planes.iter_mut().zip(frame) {
                plane.push(*sample);
            }
        }
        Ok(Self {
            sample_rate,
            planes,
        })
    }

    pub fn mono(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            sample_rate,
            planes: vec![samples],
        }
    }

    /// Silent buffer. `channels` is raised to at least one.
    pub fn silence(sample_rate: u32, channels: usize, frames: usize) -> Self {
        Self {
            sample_rate,
            planes: vec![vec![0.0; frames]; channels.max(1)],
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.planes.len()
    }

    /// Samples per channel.
    pub fn frames(&self) -> usize {
        self.planes.first().map(Vec::len).unwrap_or(0)
    }

    pub fn plane(&self, channel: usize) -> Option<&[f32]> {
        self.planes.get(channel).map(Vec::as_slice)
    }

    pub fn planes(&self) -> &[Vec<f32>] {
        &self.planes
    }

    pub fn into_planes(self) -> Vec<Vec<f32>> {
        self.planes
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    /// Duration in whole milliseconds, rounded down.
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.frames() as u64).saturating_mul(1000) / self.sample_rate as u64
    }

    /// Sample-major copy of the buffer.
    pub fn interleaved(&self) -> Vec<f32> {
        let channels = self.channels();
        let frames = self.frames();
        let mut out = Vec::with_capacity(frames * channels);
        for i in 0..frames {
            for plane in &self.planes {
                out.push(plane[i]);
            }
        }
        out
    }
}
