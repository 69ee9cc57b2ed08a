//! `SongCodec` facade: parse, verify, decode.

use std::sync::Arc;
use std::time::Instant;

use song_codec_types::{
    DecodeReport, IntegrityReport, IntegrityStatus, PlaybackStrategy, SizeEstimate,
};

use crate::chain::{DecodeChain, LosslessStage};
use crate::config::{CodecConfig, TranscoderKind};
use crate::conform::conform;
use crate::decode::{Decoder, SymphoniaDecoder};
use crate::error::{DecodeError, ParseError};
use crate::format;
use crate::integrity;
use crate::pcm::PcmBuffer;
use crate::song::Song;
use crate::strategy;
use crate::synth::{NeuralVocoder, PlaceholderVocoder};
use crate::transcode::{
    CancelToken, CommandTranscoder, SymphoniaTranscoder, TranscodeWorker, Transcoder,
};
use crate::wav::encode_wav;

/// Size of one neural token in the embedded payload.
const NEURAL_TOKEN_BYTES: u64 = 2;

/// Decoded audio plus how it was obtained.
#[derive(Debug)]
pub struct DecodedSong {
    pub buffer: PcmBuffer,
    pub report: DecodeReport,
}

/// WAV-encoded audio plus how it was obtained.
#[derive(Debug)]
pub struct DecodedWav {
    pub bytes: Vec<u8>,
    pub report: DecodeReport,
}

/// Builder for [`SongCodec`] with injectable capabilities.
pub struct SongCodecBuilder {
    config: CodecConfig,
    decoder: Option<Arc<dyn Decoder>>,
    transcoder: Option<Arc<dyn Transcoder>>,
    vocoder: Option<Arc<dyn NeuralVocoder>>,
}

impl SongCodecBuilder {
    pub fn decoder(mut self, decoder: Arc<dyn Decoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn transcoder(mut self, transcoder: Arc<dyn Transcoder>) -> Self {
        self.transcoder = Some(transcoder);
        self
    }

    pub fn vocoder(mut self, vocoder: Arc<dyn NeuralVocoder>) -> Self {
        self.vocoder = Some(vocoder);
        self
    }

    pub fn build(self) -> SongCodec {
        let config = self.config;
        let decoder: Arc<dyn Decoder> = self
            .decoder
            .unwrap_or_else(|| Arc::new(SymphoniaDecoder));
        let transcoder: Arc<dyn Transcoder> = match self.transcoder {
            Some(transcoder) => transcoder,
            None => match config.transcoder {
                TranscoderKind::Builtin => Arc::new(SymphoniaTranscoder),
                TranscoderKind::Command => Arc::new(CommandTranscoder::ffmpeg(
                    config.transcoder_program.clone(),
                )),
            },
        };
        let vocoder: Arc<dyn NeuralVocoder> = self
            .vocoder
            .unwrap_or_else(|| Arc::new(PlaceholderVocoder));

        let worker = TranscodeWorker::new(transcoder, config.transcode_timeout());
        tracing::debug!(
            decoder = decoder.name(),
            transcoder = worker.transcoder_name(),
            vocoder = vocoder.name(),
            timeout_ms = config.transcode_timeout_ms,
            "song codec ready"
        );

        SongCodec {
            lossless: LosslessStage::new(decoder.clone(), worker.clone()),
            chain: DecodeChain::standard(decoder, worker, vocoder),
            config,
        }
    }
}

/// Entry point for reading song documents and turning them into audio.
pub struct SongCodec {
    config: CodecConfig,
    chain: DecodeChain,
    lossless: LosslessStage,
}

impl Default for SongCodec {
    fn default() -> Self {
        Self::new(CodecConfig::default())
    }
}

impl SongCodec {
    /// Codec with the default Symphonia decoder, configured transcoder, and placeholder
    /// vocoder.
    pub fn new(config: CodecConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: CodecConfig) -> SongCodecBuilder {
        SongCodecBuilder {
            config,
            decoder: None,
            transcoder: None,
            vocoder: None,
        }
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    pub fn parse(&self, text: &str) -> Result<Song, ParseError> {
        format::parse(text)
    }

    /// Integrity of the song's lossless payload.
    ///
    /// Still answers after the payload was released by a decode.
    pub fn verify(&self, song: &Song) -> IntegrityStatus {
        self.integrity_report(song).status
    }

    pub fn integrity_report(&self, song: &Song) -> IntegrityReport {
        let report = integrity::report(song.payload_digest(), song.expected_digest());
        if report.status == IntegrityStatus::Mismatch {
            tracing::warn!(
                computed = report.computed.as_deref().unwrap_or_default(),
                expected = report.expected.as_deref().unwrap_or_default(),
                "lossless payload digest mismatch"
            );
        }
        report
    }

    pub fn strategy_for(&self, song: &Song) -> PlaybackStrategy {
        strategy::strategy_for(song)
    }

    pub fn decode_to_buffer(&self, song: &mut Song) -> Result<DecodedSong, DecodeError> {
        self.decode_to_buffer_with_cancel(song, &CancelToken::new())
    }

    /// Decode through the fallback chain, then conform to the configured output format.
    ///
    /// On success the consumed payload is released when
    /// `release_payload_after_decode` is set.
    pub fn decode_to_buffer_with_cancel(
        &self,
        song: &mut Song,
        cancel: &CancelToken,
    ) -> Result<DecodedSong, DecodeError> {
        let started = Instant::now();
        let integrity = self.verify(song);
        let outcome = self.chain.run(song, cancel)?;

        if self.config.release_payload_after_decode {
            let freed = match outcome.used {
                PlaybackStrategy::Lossless => song.release_lossless_bytes(),
                PlaybackStrategy::Neural => song.release_neural_tokens(),
                PlaybackStrategy::Synthetic => 0,
            };
            tracing::debug!(strategy = outcome.used.label(), freed, "payload released");
        }

        let buffer = conform(
            outcome.buffer,
            &self.config.output_format(),
            self.config.resample_chunk_frames,
        )?;
        let channels = u16::try_from(buffer.channels())
            .map_err(|_| DecodeError::InvalidBuffer(format!("{} channels", buffer.channels())))?;

        let report = DecodeReport {
            requested: outcome.requested,
            used: outcome.used,
            integrity,
            downgrades: outcome.downgrades,
            sample_rate: buffer.sample_rate(),
            channels,
            frames: buffer.frames() as u64,
            duration_ms: buffer.duration_ms(),
        };

        tracing::info!(
            requested = report.requested.label(),
            used = report.used.label(),
            integrity = report.integrity.label(),
            downgrades = report.downgrades.len(),
            duration_ms = report.duration_ms,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "song decoded"
        );

        Ok(DecodedSong { buffer, report })
    }

    pub fn decode_to_wav(&self, song: &mut Song) -> Result<DecodedWav, DecodeError> {
        self.decode_to_wav_with_cancel(song, &CancelToken::new())
    }

    pub fn decode_to_wav_with_cancel(
        &self,
        song: &mut Song,
        cancel: &CancelToken,
    ) -> Result<DecodedWav, DecodeError> {
        let decoded = self.decode_to_buffer_with_cancel(song, cancel)?;
        Ok(DecodedWav {
            bytes: encode_wav(&decoded.buffer)?,
            report: decoded.report,
        })
    }

    /// Decode a standalone lossless payload (native first, then transcode).
    pub fn decode_lossless(
        &self,
        bytes: Vec<u8>,
        cancel: &CancelToken,
    ) -> Result<PcmBuffer, DecodeError> {
        self.lossless.decode_lossless(bytes, cancel)
    }

    /// Embedded payload sizes; neural tokens count two bytes each.
    pub fn size_estimate(&self, song: &Song) -> SizeEstimate {
        let lossless = song
            .raw_lossless_bytes
            .as_ref()
            .map(|b| b.len() as u64)
            .unwrap_or(0);
        let neural = song
            .neural_tokens
            .as_ref()
            .map(|t| t.len() as u64 * NEURAL_TOKEN_BYTES)
            .unwrap_or(0);
        SizeEstimate {
            lossless,
            neural,
            total: lossless + neural,
        }
    }
}
