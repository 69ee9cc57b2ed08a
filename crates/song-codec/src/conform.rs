//! Output conforming: channel remix and sample-rate conversion.
//!
//! Decoded audio comes out at whatever shape its source had (24 kHz mono for neural,
//! 44.1 kHz mono for the metadata tone, anything for lossless). Hosts that need a fixed
//! output shape set an [`OutputFormat`]; buffers are converted before WAV encoding.

use anyhow::{Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use crate::error::DecodeError;
use crate::pcm::PcmBuffer;

/// Default resampler input chunk in frames.
pub const DEFAULT_CHUNK_FRAMES: usize = 1024;

/// Target shape for decoded audio. `None` keeps the source value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OutputFormat {
    pub sample_rate: Option<u32>,
    pub channels: Option<usize>,
}

impl OutputFormat {
    /// 44.1 kHz stereo, the usual playback target.
    pub const CD: OutputFormat = OutputFormat {
        sample_rate: Some(44_100),
        channels: Some(2),
    };

    pub fn is_passthrough(&self) -> bool {
        self.sample_rate.is_none() && self.channels.is_none()
    }
}

/// Convert `buffer` to `format`.
///
/// Channel reduction happens before resampling and channel expansion after, so the
/// resampler always runs on the smaller layout.
pub fn conform(
    buffer: PcmBuffer,
    format: &OutputFormat,
    chunk_frames: usize,
) -> Result<PcmBuffer, DecodeError> {
    if format.is_passthrough() {
        return Ok(buffer);
    }
    let target_channels = format.channels.unwrap_or(buffer.channels());
    let mut buffer = buffer;

    if target_channels < buffer.channels() {
        buffer = remix(buffer, target_channels)?;
    }
    if let Some(rate) = format.sample_rate {
        buffer = resample(&buffer, rate, chunk_frames)
            .map_err(|e| DecodeError::Conform(format!("{e:#}")))?;
    }
    if target_channels > buffer.channels() {
        buffer = remix(buffer, target_channels)?;
    }
    Ok(buffer)
}

/// Change the channel count.
///
/// Mono is duplicated to every output channel and any layout folds to mono by
/// averaging. Other changes drop trailing channels or repeat the last one.
pub fn remix(buffer: PcmBuffer, channels: usize) -> Result<PcmBuffer, DecodeError> {
    if channels == 0 {
        return Err(DecodeError::Conform("cannot remix to zero channels".to_string()));
    }
    let source_channels = buffer.channels();
    if channels == source_channels {
        return Ok(buffer);
    }
    let rate = buffer.sample_rate();
    let frames = buffer.frames();
    let mut planes = buffer.into_planes();

    let planes = if channels == 1 {
        let scale = 1.0 / source_channels as f32;
        let mut mixed = vec![0.0f32; frames];
        for plane in &planes {
            for (out, s) in mixed.iter_mut().zip(plane) {
                *out += s * scale;
            }
        }
        vec![mixed]
    } else if channels < source_channels {
        planes.truncate(channels);
        planes
    } else {
        let last = planes.last().cloned().unwrap_or_else(|| vec![0.0; frames]);
        planes.resize(channels, last);
        planes
    };

    PcmBuffer::from_planes(rate, planes)
}

/// Sample-rate conversion with Rubato's asynchronous sinc resampler.
///
/// The whole buffer is pushed through in fixed input chunks, zero-padded at the end,
/// and the resampler's output delay is trimmed so the result is aligned with the input
/// and exactly `ceil(frames * ratio)` frames long.
pub fn resample(buffer: &PcmBuffer, target_rate: u32, chunk_frames: usize) -> Result<PcmBuffer> {
    let source_rate = buffer.sample_rate();
    if target_rate == 0 || source_rate == 0 {
        return Err(anyhow!("invalid sample rate {source_rate} -> {target_rate}"));
    }
    let channels = buffer.channels();
    if source_rate == target_rate {
        return Ok(buffer.clone());
    }

    let frames = buffer.frames();
    let f_ratio = target_rate as f64 / source_rate as f64;
    let expected = (frames as u64 * target_rate as u64).div_ceil(source_rate as u64) as usize;
    if frames == 0 {
        return Ok(PcmBuffer::silence(target_rate, channels, 0));
    }

    let sinc_len = 128;
    let window = WindowFunction::BlackmanHarris2;
    let params = SincInterpolationParameters {
        sinc_len,
        f_cutoff: calculate_cutoff(sinc_len, window),
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window,
    };

    let chunk = chunk_frames.max(1);
    let mut resampler = Async::<f32>::new_sinc(
        f_ratio,
        1.1,
        &params,
        chunk,
        channels,
        FixedAsync::Input,
    )?;

    let delay = resampler.output_delay();
    let needed = delay + expected;
    let input = buffer.interleaved();

    let delay_in_input = (delay as f64 / f_ratio).ceil() as usize;
    let max_chunks = (frames + delay_in_input).div_ceil(chunk) + 2;

    let mut chunk_in = vec![0.0f32; chunk * channels];
    let mut chunk_out = vec![0.0f32; resampler.output_frames_max() * channels];
    let mut output: Vec<f32> = Vec::with_capacity(needed * channels);

    for index in 0..max_chunks {
        if output.len() / channels >= needed {
            break;
        }

        let start = (index * chunk * channels).min(input.len());
        let end = ((index + 1) * chunk * channels).min(input.len());
        let available = end - start;
        chunk_in[..available].copy_from_slice(&input[start..end]);
        chunk_in[available..].fill(0.0);

        let input_adapter = InterleavedSlice::new(&chunk_in, channels, chunk)
            .map_err(|e| anyhow!("interleaved slice (input): {e}"))?;
        let out_capacity = chunk_out.len() / channels;
        let mut output_adapter = InterleavedSlice::new_mut(&mut chunk_out, channels, out_capacity)
            .map_err(|e| anyhow!("interleaved slice (output): {e}"))?;

        let (_nbr_in, nbr_out) =
            resampler.process_into_buffer(&input_adapter, &mut output_adapter, None)?;
        output.extend_from_slice(&chunk_out[..nbr_out * channels]);
    }

    let skip = (delay * channels).min(output.len());
    let mut aligned = output.split_off(skip);
    aligned.resize(expected * channels, 0.0);

    tracing::debug!(
        from_hz = source_rate,
        to_hz = target_rate,
        frames_in = frames,
        frames_out = expected,
        "resampled"
    );

    PcmBuffer::from_interleaved(target_rate, channels, &aligned).map_err(Into::into)
}
