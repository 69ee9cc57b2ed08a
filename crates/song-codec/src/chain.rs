//! Ordered playback stages and the fallback loop that walks them.
//!
//! Each stage wraps one [`PlaybackStrategy`]. The chain starts at the strategy the
//! song's payloads allow and moves down the fidelity order until a stage produces
//! audio. Every step down is recorded as a [`Downgrade`] and logged.

use std::sync::Arc;
use std::time::Instant;

use song_codec_types::{Downgrade, PlaybackStrategy};

use crate::decode::Decoder;
use crate::error::DecodeError;
use crate::pcm::PcmBuffer;
use crate::song::Song;
use crate::strategy::strategy_for;
use crate::synth::{NeuralVocoder, synthesize_from_metadata};
use crate::transcode::{CancelToken, TranscodeWorker};

/// One way of turning a song into audio.
pub trait PlaybackStage: Send + Sync {
    fn strategy(&self) -> PlaybackStrategy;

    /// Whether the song carries the payload this stage needs.
    fn is_available(&self, song: &Song) -> bool;

    fn try_decode(&self, song: &mut Song, cancel: &CancelToken) -> Result<PcmBuffer, DecodeError>;
}

/// Native decode with an off-thread transcode fallback.
pub struct LosslessStage {
    native: Arc<dyn Decoder>,
    worker: TranscodeWorker,
}

impl LosslessStage {
    pub fn new(native: Arc<dyn Decoder>, worker: TranscodeWorker) -> Self {
        Self { native, worker }
    }

    /// Decode an owned lossless payload, transcoding it when the native decoder refuses.
    pub fn decode_lossless(
        &self,
        bytes: Vec<u8>,
        cancel: &CancelToken,
    ) -> Result<PcmBuffer, DecodeError> {
        let (result, bytes) = self.decode_native(bytes);
        match result {
            Ok(buffer) => Ok(buffer),
            Err(e) => {
                self.log_native_failure(&e);
                self.transcode_and_decode(bytes, cancel)
            }
        }
    }

    /// Lend `bytes` to the native decoder and take them back afterwards.
    fn decode_native(&self, bytes: Vec<u8>) -> (Result<PcmBuffer, DecodeError>, Vec<u8>) {
        let shared = Arc::new(bytes);
        let result = self.native.decode(Arc::clone(&shared), Some("flac"));
        if Arc::strong_count(&shared) > 1 {
            tracing::debug!(decoder = self.native.name(), "decoder kept the payload; copying");
        }
        (result, Arc::unwrap_or_clone(shared))
    }

    fn log_native_failure(&self, err: &DecodeError) {
        tracing::warn!(
            decoder = self.native.name(),
            transcoder = self.worker.transcoder_name(),
            "native decode failed, transcoding: {err}"
        );
    }

    fn transcode_and_decode(
        &self,
        bytes: Vec<u8>,
        cancel: &CancelToken,
    ) -> Result<PcmBuffer, DecodeError> {
        let wav = self.worker.run(bytes, cancel)?;
        self.native
            .decode(Arc::new(wav), Some("wav"))
            .map_err(|e| DecodeError::TranscodeFailed(format!("transcoded output unreadable: {e}")))
    }
}

impl PlaybackStage for LosslessStage {
    fn strategy(&self) -> PlaybackStrategy {
        PlaybackStrategy::Lossless
    }

    fn is_available(&self, song: &Song) -> bool {
        song.raw_lossless_bytes.is_some()
    }

    fn try_decode(&self, song: &mut Song, cancel: &CancelToken) -> Result<PcmBuffer, DecodeError> {
        let bytes = song
            .raw_lossless_bytes
            .take()
            .ok_or(DecodeError::MissingPayload("lossless"))?;
        let (result, bytes) = self.decode_native(bytes);
        song.raw_lossless_bytes = Some(bytes);
        match result {
            Ok(buffer) => return Ok(buffer),
            Err(e) => self.log_native_failure(&e),
        }

        // The worker takes ownership; the song keeps only the digest.
        let owned = song
            .take_lossless_bytes()
            .ok_or(DecodeError::MissingPayload("lossless"))?;
        self.transcode_and_decode(owned, cancel)
    }
}

pub struct NeuralStage {
    vocoder: Arc<dyn NeuralVocoder>,
}

impl NeuralStage {
    pub fn new(vocoder: Arc<dyn NeuralVocoder>) -> Self {
        Self { vocoder }
    }
}

impl PlaybackStage for NeuralStage {
    fn strategy(&self) -> PlaybackStrategy {
        PlaybackStrategy::Neural
    }

    fn is_available(&self, song: &Song) -> bool {
        song.neural_tokens.is_some()
    }

    fn try_decode(&self, song: &mut Song, _cancel: &CancelToken) -> Result<PcmBuffer, DecodeError> {
        let tokens = song
            .neural_tokens
            .as_deref()
            .ok_or(DecodeError::MissingPayload("neural"))?;
        let buffer = self.vocoder.decode(tokens)?;
        if buffer.frames() == 0 {
            return Err(DecodeError::InvalidBuffer(format!(
                "vocoder {} produced no audio",
                self.vocoder.name()
            )));
        }
        Ok(buffer)
    }
}

/// Metadata tone. Always available, never fails.
#[derive(Clone, Copy, Debug, Default)]
pub struct SyntheticStage;

impl PlaybackStage for SyntheticStage {
    fn strategy(&self) -> PlaybackStrategy {
        PlaybackStrategy::Synthetic
    }

    fn is_available(&self, _song: &Song) -> bool {
        true
    }

    fn try_decode(&self, song: &mut Song, _cancel: &CancelToken) -> Result<PcmBuffer, DecodeError> {
        Ok(synthesize_from_metadata(&song.meta))
    }
}

/// Result of a successful chain run.
#[derive(Debug)]
pub struct ChainOutcome {
    pub buffer: PcmBuffer,
    pub requested: PlaybackStrategy,
    pub used: PlaybackStrategy,
    pub downgrades: Vec<Downgrade>,
}

/// Stages in fidelity order.
pub struct DecodeChain {
    stages: Vec<Box<dyn PlaybackStage>>,
}

impl DecodeChain {
    /// Build a chain; stages are sorted from highest to lowest fidelity.
    pub fn new(mut stages: Vec<Box<dyn PlaybackStage>>) -> Self {
        stages.sort_by_key(|s| std::cmp::Reverse(s.strategy().fidelity()));
        Self { stages }
    }

    /// The standard lossless → neural → synthetic chain.
    pub fn standard(
        native: Arc<dyn Decoder>,
        worker: TranscodeWorker,
        vocoder: Arc<dyn NeuralVocoder>,
    ) -> Self {
        Self::new(vec![
            Box::new(LosslessStage::new(native, worker)),
            Box::new(NeuralStage::new(vocoder)),
            Box::new(SyntheticStage),
        ])
    }

    /// Walk the stages from the song's best strategy downwards.
    ///
    /// Stages whose payload is absent are skipped without a downgrade of their own, so a
    /// failed lossless decode on a song without tokens is recorded as lossless →
    /// synthetic. Cancellation stops the walk immediately.
    pub fn run(&self, song: &mut Song, cancel: &CancelToken) -> Result<ChainOutcome, DecodeError> {
        let requested = strategy_for(song);
        let mut downgrades = Vec::new();
        let mut failed: Option<(PlaybackStrategy, String)> = None;

        let candidates = self
            .stages
            .iter()
            .filter(|s| s.strategy().fidelity() <= requested.fidelity());

        for stage in candidates {
            if cancel.is_cancelled() {
                return Err(DecodeError::Cancelled);
            }
            if !stage.is_available(song) {
                continue;
            }
            let strategy = stage.strategy();

            if let Some((from, reason)) = failed.take() {
                tracing::warn!(
                    from = from.label(),
                    to = strategy.label(),
                    "playback downgraded: {reason}"
                );
                downgrades.push(Downgrade {
                    from,
                    to: strategy,
                    reason,
                });
            }

            let started = Instant::now();
            match stage.try_decode(song, cancel) {
                Ok(buffer) => {
                    tracing::debug!(
                        strategy = strategy.label(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        frames = buffer.frames(),
                        "stage decoded"
                    );
                    return Ok(ChainOutcome {
                        buffer,
                        requested,
                        used: strategy,
                        downgrades,
                    });
                }
                Err(DecodeError::Cancelled) => return Err(DecodeError::Cancelled),
                Err(e) => failed = Some((strategy, e.to_string())),
            }
        }

        let reason = failed
            .map(|(from, reason)| format!("{}: {reason}", from.label()))
            .unwrap_or_else(|| "no playback stage available".to_string());
        tracing::error!("decode chain exhausted: {reason}");
        Err(DecodeError::Exhausted(reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::song::SongMeta;
    use crate::synth::{METADATA_SAMPLE_RATE, NEURAL_SAMPLE_RATE, PlaceholderVocoder};
    use crate::transcode::Transcoder;

    #[derive(Default)]
    struct CountingDecoder {
        calls: AtomicUsize,
        fail_flac: bool,
    }

    impl Decoder for CountingDecoder {
        fn name(&self) -> &str {
            "counting"
        }

        fn decode(
            &self,
            bytes: Arc<Vec<u8>>,
            hint: Option<&str>,
        ) -> Result<PcmBuffer, DecodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_flac && hint == Some("flac") {
                return Err(DecodeError::NativeDecodeFailed("unsupported".to_string()));
            }
            Ok(PcmBuffer::silence(48_000, 2, bytes.len()))
        }
    }

    struct FailingTranscoder;

    impl Transcoder for FailingTranscoder {
        fn name(&self) -> &str {
            "failing"
        }

        fn transcode(&self, _input: Vec<u8>, _abort: &CancelToken) -> Result<Vec<u8>, DecodeError> {
            Err(DecodeError::TranscodeFailed("no codec".to_string()))
        }
    }

    struct DoublingTranscoder;

    impl Transcoder for DoublingTranscoder {
        fn name(&self) -> &str {
            "doubling"
        }

        fn transcode(&self, input: Vec<u8>, _abort: &CancelToken) -> Result<Vec<u8>, DecodeError> {
            Ok([input.clone(), input].concat())
        }
    }

    fn song() -> Song {
        Song::new(SongMeta {
            bpm: 100,
            key: "D".to_string(),
            time_signature: "4/4".to_string(),
            version: None,
            build: None,
        })
    }

    fn chain(decoder: Arc<CountingDecoder>, transcoder: Arc<dyn Transcoder>) -> DecodeChain {
        DecodeChain::standard(
            decoder,
            TranscodeWorker::new(transcoder, Duration::from_secs(2)),
            Arc::new(PlaceholderVocoder),
        )
    }

    #[test]
    fn neural_only_song_never_touches_lossless_decoder() {
        let decoder = Arc::new(CountingDecoder::default());
        let chain = chain(decoder.clone(), Arc::new(FailingTranscoder));
        let mut s = song();
        s.neural_tokens = Some(vec![10; 100]);

        let outcome = chain.run(&mut s, &CancelToken::new()).unwrap();
        assert_eq!(outcome.requested, PlaybackStrategy::Neural);
        assert_eq!(outcome.used, PlaybackStrategy::Neural);
        assert!(outcome.downgrades.is_empty());
        assert_eq!(outcome.buffer.sample_rate(), NEURAL_SAMPLE_RATE);
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn lossless_success_uses_native_decoder_once() {
        let decoder = Arc::new(CountingDecoder::default());
        let chain = chain(decoder.clone(), Arc::new(FailingTranscoder));
        let mut s = song();
        s.raw_lossless_bytes = Some(vec![0; 32]);

        let outcome = chain.run(&mut s, &CancelToken::new()).unwrap();
        assert_eq!(outcome.used, PlaybackStrategy::Lossless);
        assert_eq!(outcome.buffer.frames(), 32);
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 1);
        assert!(s.raw_lossless_bytes.is_some());
    }

    #[test]
    fn native_decode_borrows_the_song_payload() {
        let decoder = Arc::new(CountingDecoder::default());
        let stage = LosslessStage::new(
            decoder,
            TranscodeWorker::new(Arc::new(FailingTranscoder), Duration::from_secs(2)),
        );
        let mut s = song();
        s.raw_lossless_bytes = Some(vec![7; 4_096]);
        let address = s.raw_lossless_bytes.as_ref().unwrap().as_ptr();

        let buffer = stage.try_decode(&mut s, &CancelToken::new()).unwrap();
        assert_eq!(buffer.frames(), 4_096);
        let kept = s.raw_lossless_bytes.as_ref().unwrap();
        assert_eq!(kept.as_ptr(), address);
        assert_eq!(kept.len(), 4_096);
    }

    #[test]
    fn native_failure_is_recovered_by_transcode() {
        let decoder = Arc::new(CountingDecoder {
            fail_flac: true,
            ..Default::default()
        });
        let chain = chain(decoder.clone(), Arc::new(DoublingTranscoder));
        let mut s = song();
        s.raw_lossless_bytes = Some(vec![0; 8]);
        let digest = s.payload_digest();

        let outcome = chain.run(&mut s, &CancelToken::new()).unwrap();
        assert_eq!(outcome.used, PlaybackStrategy::Lossless);
        assert_eq!(outcome.buffer.frames(), 16);
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 2);
        assert!(s.raw_lossless_bytes.is_none());
        assert_eq!(s.payload_digest(), digest);
    }

    #[test]
    fn lossless_failure_downgrades_to_neural() {
        let decoder = Arc::new(CountingDecoder {
            fail_flac: true,
            ..Default::default()
        });
        let chain = chain(decoder, Arc::new(FailingTranscoder));
        let mut s = song();
        s.raw_lossless_bytes = Some(vec![0; 8]);
        s.neural_tokens = Some(vec![1, 2, 3]);

        let outcome = chain.run(&mut s, &CancelToken::new()).unwrap();
        assert_eq!(outcome.requested, PlaybackStrategy::Lossless);
        assert_eq!(outcome.used, PlaybackStrategy::Neural);
        assert_eq!(outcome.downgrades.len(), 1);
        assert_eq!(outcome.downgrades[0].from, PlaybackStrategy::Lossless);
        assert_eq!(outcome.downgrades[0].to, PlaybackStrategy::Neural);
        assert!(outcome.downgrades[0].reason.contains("no codec"));
    }

    #[test]
    fn missing_tokens_skip_straight_to_synthetic() {
        let decoder = Arc::new(CountingDecoder {
            fail_flac: true,
            ..Default::default()
        });
        let chain = chain(decoder, Arc::new(FailingTranscoder));
        let mut s = song();
        s.raw_lossless_bytes = Some(vec![0; 8]);

        let outcome = chain.run(&mut s, &CancelToken::new()).unwrap();
        assert_eq!(outcome.used, PlaybackStrategy::Synthetic);
        assert_eq!(outcome.buffer.sample_rate(), METADATA_SAMPLE_RATE);
        assert_eq!(
            outcome
                .downgrades
                .iter()
                .map(|d| (d.from, d.to))
                .collect::<Vec<_>>(),
            vec![(PlaybackStrategy::Lossless, PlaybackStrategy::Synthetic)]
        );
    }

    #[test]
    fn empty_neural_output_downgrades() {
        let chain = chain(Arc::new(CountingDecoder::default()), Arc::new(FailingTranscoder));
        let mut s = song();
        s.neural_tokens = Some(Vec::new());

        let outcome = chain.run(&mut s, &CancelToken::new()).unwrap();
        assert_eq!(outcome.used, PlaybackStrategy::Synthetic);
        assert_eq!(outcome.downgrades.len(), 1);
    }

    #[test]
    fn cancelled_chain_does_not_fall_back() {
        let chain = chain(Arc::new(CountingDecoder::default()), Arc::new(FailingTranscoder));
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = chain.run(&mut song(), &cancel).unwrap_err();
        assert_eq!(err, DecodeError::Cancelled);
    }

    #[test]
    fn chain_without_stages_is_exhausted() {
        let chain = DecodeChain::new(Vec::new());
        let err = chain.run(&mut song(), &CancelToken::new()).unwrap_err();
        assert!(matches!(err, DecodeError::Exhausted(_)));
    }
}
