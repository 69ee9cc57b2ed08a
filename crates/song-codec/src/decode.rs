//! Native in-memory decode.
//!
//! Uses Symphonia to:
//! - probe the payload container/codec
//! - decode every packet into interleaved `f32` samples
//! - hand back a planar [`PcmBuffer`]
//!
//! The [`Decoder`] trait is the injection seam for the lossless path; tests and hosts
//! with a hardware decoder swap in their own implementation.

use std::io::{Cursor, ErrorKind};
use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::DecodeError;
use crate::pcm::PcmBuffer;

/// Decode capability for compressed or PCM byte payloads.
pub trait Decoder: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Decode a complete payload. `hint` is a file extension such as `"flac"` or `"wav"`.
    ///
    /// The payload is shared, not copied. Implementations must drop their handle before
    /// returning so the caller can reclaim sole ownership.
    fn decode(&self, bytes: Arc<Vec<u8>>, hint: Option<&str>) -> Result<PcmBuffer, DecodeError>;
}

/// Decoder backed by Symphonia's default codec registry.
#[derive(Clone, Copy, Debug, Default)]
pub struct SymphoniaDecoder;

impl Decoder for SymphoniaDecoder {
    fn name(&self) -> &str {
        "symphonia"
    }

    fn decode(&self, bytes: Arc<Vec<u8>>, hint: Option<&str>) -> Result<PcmBuffer, DecodeError> {
        decode_media_source(Box::new(Cursor::new(SharedPayload(bytes))), hint)
            .map_err(|e| DecodeError::NativeDecodeFailed(format!("{e:#}")))
    }
}

/// Read-only view of a shared payload for Symphonia's cursor source.
struct SharedPayload(Arc<Vec<u8>>);

impl AsRef<[u8]> for SharedPayload {
    fn as_ref(&self) -> &[u8] {
        self.0.as_slice()
    }
}

/// Stream parameters captured while probing a payload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamInfo {
    pub sample_rate: u32,
    pub channels: u16,
    /// Codec name (best-effort).
    pub codec: Option<String>,
    /// Total frames when the container declares them.
    pub frames: Option<u64>,
}

impl StreamInfo {
    /// Best-effort duration in milliseconds.
    pub fn duration_ms(&self) -> Option<u64> {
        let frames = self.frames?;
        if self.sample_rate == 0 {
            return None;
        }
        Some(frames.saturating_mul(1000) / self.sample_rate as u64)
    }
}

/// Probe a payload without decoding its packets.
pub fn probe_stream(bytes: Vec<u8>, hint: Option<&str>) -> Result<StreamInfo, DecodeError> {
    let probe = || -> Result<StreamInfo> {
        let format = open_format(Box::new(Cursor::new(bytes)), hint)?;
        let track = format
            .default_track()
            .ok_or_else(|| anyhow!("No default audio track"))?;
        stream_info_from_params(&track.codec_params)
    };
    probe().map_err(|e| DecodeError::NativeDecodeFailed(format!("{e:#}")))
}

/// Decode an owned payload to memory.
pub(crate) fn decode_bytes(bytes: Vec<u8>, hint: Option<&str>) -> Result<PcmBuffer> {
    decode_media_source(Box::new(Cursor::new(bytes)), hint)
}

/// Probe `source` and decode its default track to the end.
pub(crate) fn decode_media_source(
    source: Box<dyn MediaSource>,
    hint: Option<&str>,
) -> Result<PcmBuffer> {
    let mut format = open_format(source, hint)?;

    let track = format
        .default_track()
        .ok_or_else(|| anyhow!("No default audio track"))?;
    let track_id = track.id;
    let codec_params: CodecParameters = track.codec_params.clone();
    let info = stream_info_from_params(&codec_params)?;
    let channels = info.channels as usize;

    tracing::debug!(
        codec = info.codec.as_deref().unwrap_or("unknown"),
        rate_hz = info.sample_rate,
        channels,
        "payload probed"
    );

    let mut decoder =
        symphonia::default::get_codecs().make(&codec_params, &DecoderOptions::default())?;

    let mut interleaved: Vec<f32> = Vec::new();
    let mut skipped_packets = 0usize;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(reason)) => {
                skipped_packets += 1;
                tracing::debug!(reason, "skipping undecodable packet");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, *decoded.spec());
        sample_buf.copy_interleaved_ref(decoded);
        interleaved.extend_from_slice(sample_buf.samples());
    }

    if interleaved.is_empty() {
        bail!("no audio frames decoded ({skipped_packets} packets skipped)");
    }
    if skipped_packets > 0 {
        tracing::warn!(skipped_packets, "payload decoded with packet errors");
    }

    Ok(PcmBuffer::from_interleaved(
        info.sample_rate,
        channels,
        &interleaved,
    )?)
}

fn open_format(source: Box<dyn MediaSource>, hint: Option<&str>) -> Result<Box<dyn FormatReader>> {
    let mss = MediaSourceStream::new(source, Default::default());

    let mut probe_hint = Hint::new();
    if let Some(ext) = hint {
        probe_hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe().format(
        &probe_hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    Ok(probed.format)
}

fn stream_info_from_params(params: &CodecParameters) -> Result<StreamInfo> {
    let channels = params
        .channels
        .ok_or_else(|| anyhow!("Unknown channels"))?
        .count();
    let sample_rate = params
        .sample_rate
        .ok_or_else(|| anyhow!("Unknown sample rate"))?;
    if channels == 0 {
        bail!("Track has no channels");
    }
    Ok(StreamInfo {
        sample_rate,
        channels: u16::try_from(channels)?,
        codec: codec_name_from_params(params),
        frames: params.n_frames,
    })
}

/// Best-effort codec label used for logs and probe output.
fn codec_name_from_params(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::{
        CODEC_TYPE_AAC, CODEC_TYPE_ALAC, CODEC_TYPE_FLAC, CODEC_TYPE_MP3, CODEC_TYPE_PCM_F32BE,
        CODEC_TYPE_PCM_F32LE, CODEC_TYPE_PCM_S16BE, CODEC_TYPE_PCM_S16LE, CODEC_TYPE_PCM_S24BE,
        CODEC_TYPE_PCM_S24LE, CODEC_TYPE_PCM_S32BE, CODEC_TYPE_PCM_S32LE, CODEC_TYPE_VORBIS,
    };
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wav::encode_wav;
    use symphonia::core::codecs::{CODEC_TYPE_FLAC, CODEC_TYPE_PCM_S16LE};

    fn ramp(frames: usize) -> PcmBuffer {
        let left: Vec<f32> = (0..frames).map(|i| i as f32 / frames as f32 - 0.5).collect();
        let right: Vec<f32> = left.iter().map(|s| -s).collect();
        PcmBuffer::from_planes(22_050, vec![left, right]).unwrap()
    }

    #[test]
    fn decodes_canonical_wav_bytes() {
        let source = ramp(2_000);
        let wav = encode_wav(&source).unwrap();

        let decoded = SymphoniaDecoder.decode(Arc::new(wav), Some("wav")).unwrap();
        assert_eq!(decoded.sample_rate(), 22_050);
        assert_eq!(decoded.channels(), 2);
        assert_eq!(decoded.frames(), 2_000);
        for (a, b) in decoded.plane(0).unwrap().iter().zip(source.plane(0).unwrap()) {
            assert!((a - b).abs() < 1.0e-3);
        }
    }

    #[test]
    fn garbage_is_a_native_decode_failure() {
        let err = SymphoniaDecoder
            .decode(Arc::new(vec![0x13, 0x37, 0x00, 0x42, 0x99]), Some("flac"))
            .unwrap_err();
        assert!(matches!(err, DecodeError::NativeDecodeFailed(_)));
    }

    #[test]
    fn decoder_reads_payload_in_place() {
        let payload = Arc::new(encode_wav(&ramp(500)).unwrap());
        let address = payload.as_ptr();
        SymphoniaDecoder.decode(Arc::clone(&payload), None).unwrap();
        let reclaimed = Arc::try_unwrap(payload).unwrap();
        assert_eq!(reclaimed.as_ptr(), address);

        let garbage = Arc::new(vec![0u8; 64]);
        assert!(SymphoniaDecoder.decode(Arc::clone(&garbage), Some("flac")).is_err());
        assert_eq!(Arc::strong_count(&garbage), 1);
    }

    #[test]
    fn probe_reports_stream_shape() {
        let wav = encode_wav(&ramp(22_050)).unwrap();
        let info = probe_stream(wav, None).unwrap();
        assert_eq!(info.sample_rate, 22_050);
        assert_eq!(info.channels, 2);
        assert_eq!(info.codec.as_deref(), Some("PCM_S16"));
        assert_eq!(info.duration_ms(), Some(1000));
    }

    #[test]
    fn codec_name_from_params_maps_known_codecs() {
        let mut params = CodecParameters::new();
        params.codec = CODEC_TYPE_FLAC;
        assert_eq!(codec_name_from_params(&params), Some("FLAC".to_string()));
        params.codec = CODEC_TYPE_PCM_S16LE;
        assert_eq!(codec_name_from_params(&params), Some("PCM_S16".to_string()));
        assert!(codec_name_from_params(&CodecParameters::new()).is_none());
    }

    #[test]
    fn duration_needs_frames_and_rate() {
        let info = StreamInfo {
            sample_rate: 0,
            channels: 1,
            codec: None,
            frames: Some(100),
        };
        assert!(info.duration_ms().is_none());
    }
}
