//! Canonical 16-bit PCM WAV serialization.
//!
//! Layout (all integers little-endian):
//!
//! | offset | field |
//! |---|---|
//! | 0 | `RIFF`, then `36 + data_len` |
//! | 8 | `WAVE` |
//! | 12 | `fmt `, 16, format 1 (PCM), channels, sample rate, byte rate, block align, 16 |
//! | 36 | `data`, then `data_len` |
//! | 44 | interleaved `i16` samples |

use crate::error::WavError;
use crate::pcm::PcmBuffer;

pub const WAV_HEADER_LEN: usize = 44;
const BYTES_PER_SAMPLE: u16 = 2;
const FMT_CHUNK_LEN: u32 = 16;
const FORMAT_PCM: u16 = 1;

/// Quantize one sample to `i16`: clamp to `[-1, 1]`, scale by `i16::MAX`, round.
///
/// NaN maps to silence.
pub fn quantize(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

/// Serialize `buffer` as a canonical 44-byte-header WAV file.
pub fn encode_wav(buffer: &PcmBuffer) -> Result<Vec<u8>, WavError> {
    let channels = buffer.channels();
    if channels == 0 {
        return Err(WavError::NoChannels);
    }
    let channels_field = u16::try_from(channels).map_err(|_| WavError::TooManyChannels(channels))?;

    let block_align = channels_field
        .checked_mul(BYTES_PER_SAMPLE)
        .ok_or(WavError::TooManyChannels(channels))?;
    let data_len = buffer.frames() as u64 * block_align as u64;
    let riff_len = data_len + 36;
    if riff_len > u32::MAX as u64 {
        return Err(WavError::TooLarge {
            data_bytes: data_len,
        });
    }
    let byte_rate = buffer.sample_rate() as u64 * block_align as u64;
    let byte_rate = u32::try_from(byte_rate).map_err(|_| WavError::TooLarge {
        data_bytes: data_len,
    })?;

    let mut out = Vec::with_capacity(WAV_HEADER_LEN + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(riff_len as u32).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&FMT_CHUNK_LEN.to_le_bytes());
    out.extend_from_slice(&FORMAT_PCM.to_le_bytes());
    out.extend_from_slice(&channels_field.to_le_bytes());
    out.extend_from_slice(&buffer.sample_rate().to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&(BYTES_PER_SAMPLE * 8).to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&(data_len as u32).to_le_bytes());

    let planes = buffer.planes();
    for i in 0..buffer.frames() {
        for plane in planes {
            out.extend_from_slice(&quantize(plane[i]).to_le_bytes());
        }
    }

    Ok(out)
}
