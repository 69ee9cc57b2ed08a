//! Off-thread transcoding to canonical WAV.
//!
//! When the native decoder rejects a payload, the owned byte buffer is moved into a
//! [`TranscodeJob`] running on its own thread. The caller waits on a bounded crossbeam
//! channel with a deadline and a [`CancelToken`]:
//! - a reply within the deadline is returned as-is
//! - an expired deadline yields [`DecodeError::WorkerTimeout`]
//! - a worker that unwinds without replying yields [`DecodeError::WorkerCrash`]
//! - a cancelled caller yields [`DecodeError::Cancelled`]
//!
//! In every early-exit case the worker's abort flag is raised so it can stop work and
//! its late reply is discarded.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::decode;
use crate::error::DecodeError;
use crate::wav::encode_wav;

/// Granularity at which waiters and workers re-check cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Shared cancellation flag.
///
/// Clones observe the same flag; cancelling is one-way.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Converts an arbitrary compressed payload into canonical 16-bit PCM WAV bytes.
///
/// Runs on the worker thread; long-running implementations should poll `abort`.
pub trait Transcoder: Send + Sync {
    fn name(&self) -> &str;

    fn transcode(&self, input: Vec<u8>, abort: &CancelToken) -> Result<Vec<u8>, DecodeError>;
}

/// In-process transcoder: full Symphonia decode followed by WAV encoding.
#[derive(Clone, Copy, Debug, Default)]
pub struct SymphoniaTranscoder;

impl Transcoder for SymphoniaTranscoder {
    fn name(&self) -> &str {
        "symphonia"
    }

    fn transcode(&self, input: Vec<u8>, abort: &CancelToken) -> Result<Vec<u8>, DecodeError> {
        let buffer = decode::decode_bytes(input, None)
            .map_err(|e| DecodeError::TranscodeFailed(format!("{e:#}")))?;
        if abort.is_cancelled() {
            return Err(DecodeError::Cancelled);
        }
        Ok(encode_wav(&buffer)?)
    }
}

/// Pipes the payload through an external program (stdin → stdout).
///
/// The default arguments suit `ffmpeg`. The child is killed when the job is aborted.
#[derive(Clone, Debug)]
pub struct CommandTranscoder {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandTranscoder {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// `ffmpeg` reading any input on stdin and writing 16-bit WAV on stdout.
    pub fn ffmpeg(program: impl Into<PathBuf>) -> Self {
        let args = [
            "-hide_banner",
            "-loglevel",
            "error",
            "-i",
            "pipe:0",
            "-f",
            "wav",
            "-acodec",
            "pcm_s16le",
            "pipe:1",
        ];
        Self::new(program, args.iter().map(|a| a.to_string()).collect())
    }
}

impl Transcoder for CommandTranscoder {
    fn name(&self) -> &str {
        "command"
    }

    fn transcode(&self, input: Vec<u8>, abort: &CancelToken) -> Result<Vec<u8>, DecodeError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                DecodeError::TranscodeFailed(format!("spawn {:?}: {e}", self.program))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| DecodeError::TranscodeFailed("child stdin unavailable".to_string()))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| DecodeError::TranscodeFailed("child stdout unavailable".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| DecodeError::TranscodeFailed("child stderr unavailable".to_string()))?;

        // Feed and drain on helper threads so a full pipe never stalls the child.
        let feeder = thread::spawn(move || {
            let _ = stdin.write_all(&input);
        });
        let reader = thread::spawn(move || {
            let mut out = Vec::new();
            let _ = stdout.read_to_end(&mut out);
            out
        });
        let err_reader = thread::spawn(move || {
            let mut err = String::new();
            let _ = stderr.read_to_string(&mut err);
            err
        });

        let status = loop {
            if abort.is_cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                return Err(DecodeError::Cancelled);
            }
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => return Err(DecodeError::TranscodeFailed(format!("wait: {e}"))),
            }
        };

        let _ = feeder.join();
        let out = reader.join().unwrap_or_default();
        let err = err_reader.join().unwrap_or_default();

        if !status.success() {
            return Err(DecodeError::TranscodeFailed(format!(
                "{:?} exited with {status}: {}",
                self.program,
                err.trim()
            )));
        }
        if out.is_empty() {
            return Err(DecodeError::TranscodeFailed(
                "transcoder produced no output".to_string(),
            ));
        }
        Ok(out)
    }
}

/// Spawns transcode jobs with a shared transcoder and deadline.
#[derive(Clone)]
pub struct TranscodeWorker {
    transcoder: Arc<dyn Transcoder>,
    timeout: Duration,
}

impl TranscodeWorker {
    pub fn new(transcoder: Arc<dyn Transcoder>, timeout: Duration) -> Self {
        Self {
            transcoder,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn transcoder_name(&self) -> &str {
        self.transcoder.name()
    }

    /// Move `input` onto a new worker thread and start transcoding.
    pub fn spawn(&self, input: Vec<u8>) -> Result<TranscodeJob, DecodeError> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let abort = CancelToken::new();
        let abort_for_thread = abort.clone();
        let transcoder = self.transcoder.clone();
        let input_len = input.len();

        let handle = thread::Builder::new()
            .name("song-transcode".to_string())
            .spawn(move || {
                let started = Instant::now();
                let result = transcoder.transcode(input, &abort_for_thread);
                if abort_for_thread.is_cancelled() {
                    tracing::debug!("transcode result discarded after abort");
                    return;
                }
                tracing::debug!(
                    transcoder = transcoder.name(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    ok = result.is_ok(),
                    "transcode finished"
                );
                let _ = tx.send(result);
            })
            .map_err(|e| DecodeError::WorkerCrash(format!("spawn transcode thread: {e}")))?;

        tracing::debug!(bytes = input_len, transcoder = self.transcoder.name(), "transcode started");

        Ok(TranscodeJob {
            rx,
            abort,
            handle: Some(handle),
            timeout: self.timeout,
        })
    }

    /// Spawn and wait in one step.
    pub fn run(&self, input: Vec<u8>, cancel: &CancelToken) -> Result<Vec<u8>, DecodeError> {
        self.spawn(input)?.wait(cancel)
    }
}

/// A transcode in flight. Dropping the job aborts the worker.
pub struct TranscodeJob {
    rx: Receiver<Result<Vec<u8>, DecodeError>>,
    abort: CancelToken,
    handle: Option<JoinHandle<()>>,
    timeout: Duration,
}

impl TranscodeJob {
    /// Block until the worker replies, the deadline passes, or `cancel` fires.
    pub fn wait(mut self, cancel: &CancelToken) -> Result<Vec<u8>, DecodeError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if cancel.is_cancelled() {
                self.abort.cancel();
                return Err(DecodeError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                self.abort.cancel();
                tracing::warn!(timeout_ms = self.timeout.as_millis() as u64, "transcode worker timed out");
                return Err(DecodeError::WorkerTimeout(self.timeout));
            }

            match self.rx.recv_timeout((deadline - now).min(POLL_INTERVAL)) {
                Ok(result) => return result,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(DecodeError::WorkerCrash(self.crash_reason()));
                }
            }
        }
    }

    /// Abort the worker without waiting for it.
    pub fn abort(&self) {
        self.abort.cancel();
    }

    fn crash_reason(&mut self) -> String {
        let Some(handle) = self.handle.take() else {
            return "worker exited without a result".to_string();
        };
        match handle.join() {
            Ok(()) => "worker exited without a result".to_string(),
            Err(payload) => {
                if let Some(msg) = payload.downcast_ref::<&str>() {
                    format!("worker panicked: {msg}")
                } else if let Some(msg) = payload.downcast_ref::<String>() {
                    format!("worker panicked: {msg}")
                } else {
                    "worker panicked".to_string()
                }
            }
        }
    }
}

impl Drop for TranscodeJob {
    fn drop(&mut self) {
        self.abort.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pcm::PcmBuffer;

    struct EchoTranscoder;

    impl Transcoder for EchoTranscoder {
        fn name(&self) -> &str {
            "echo"
        }

        fn transcode(&self, input: Vec<u8>, _abort: &CancelToken) -> Result<Vec<u8>, DecodeError> {
            Ok(input.into_iter().rev().collect())
        }
    }

    /// Spins until aborted, recording that it observed the abort.
    struct StuckTranscoder {
        saw_abort: Arc<AtomicBool>,
    }

    impl Transcoder for StuckTranscoder {
        fn name(&self) -> &str {
            "stuck"
        }

        fn transcode(&self, _input: Vec<u8>, abort: &CancelToken) -> Result<Vec<u8>, DecodeError> {
            let give_up = Instant::now() + Duration::from_secs(5);
            while !abort.is_cancelled() && Instant::now() < give_up {
                thread::sleep(Duration::from_millis(2));
            }
            self.saw_abort.store(abort.is_cancelled(), Ordering::SeqCst);
            Err(DecodeError::Cancelled)
        }
    }

    struct PanickingTranscoder;

    impl Transcoder for PanickingTranscoder {
        fn name(&self) -> &str {
            "panicking"
        }

        fn transcode(&self, _input: Vec<u8>, _abort: &CancelToken) -> Result<Vec<u8>, DecodeError> {
            panic!("codec exploded");
        }
    }

    fn wait_for(flag: &AtomicBool) -> bool {
        let until = Instant::now() + Duration::from_secs(2);
        while Instant::now() < until {
            if flag.load(Ordering::SeqCst) {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn worker_returns_transcoded_bytes() {
        let worker = TranscodeWorker::new(Arc::new(EchoTranscoder), Duration::from_secs(2));
        let out = worker.run(vec![1, 2, 3], &CancelToken::new()).unwrap();
        assert_eq!(out, vec![3, 2, 1]);
    }

    #[test]
    fn hung_worker_times_out_and_is_aborted() {
        let saw_abort = Arc::new(AtomicBool::new(false));
        let worker = TranscodeWorker::new(
            Arc::new(StuckTranscoder {
                saw_abort: saw_abort.clone(),
            }),
            Duration::from_millis(50),
        );
        let started = Instant::now();
        let err = worker.run(vec![0; 16], &CancelToken::new()).unwrap_err();

        assert_eq!(err, DecodeError::WorkerTimeout(Duration::from_millis(50)));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(wait_for(&saw_abort));
    }

    #[test]
    fn cancelled_caller_stops_waiting() {
        let saw_abort = Arc::new(AtomicBool::new(false));
        let worker = TranscodeWorker::new(
            Arc::new(StuckTranscoder {
                saw_abort: saw_abort.clone(),
            }),
            Duration::from_secs(30),
        );
        let cancel = CancelToken::new();
        let job = worker.spawn(vec![0; 16]).unwrap();

        let canceller = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            canceller.cancel();
        });

        assert_eq!(job.wait(&cancel).unwrap_err(), DecodeError::Cancelled);
        assert!(wait_for(&saw_abort));
    }

    #[test]
    fn dropping_a_job_aborts_the_worker() {
        let saw_abort = Arc::new(AtomicBool::new(false));
        let worker = TranscodeWorker::new(
            Arc::new(StuckTranscoder {
                saw_abort: saw_abort.clone(),
            }),
            Duration::from_secs(30),
        );
        drop(worker.spawn(vec![0; 4]).unwrap());
        assert!(wait_for(&saw_abort));
    }

    #[test]
    fn panicking_worker_is_a_crash() {
        let worker = TranscodeWorker::new(Arc::new(PanickingTranscoder), Duration::from_secs(2));
        match worker.run(vec![1], &CancelToken::new()) {
            Err(DecodeError::WorkerCrash(reason)) => assert!(reason.contains("codec exploded")),
            other => panic!("expected crash, got {other:?}"),
        }
    }

    #[test]
    fn symphonia_transcoder_normalizes_to_wav() {
        let source = PcmBuffer::from_planes(16_000, vec![vec![0.25; 800]]).unwrap();
        let wav = encode_wav(&source).unwrap();
        let out = SymphoniaTranscoder
            .transcode(wav.clone(), &CancelToken::new())
            .unwrap();
        assert_eq!(out, wav);
    }

    #[test]
    fn symphonia_transcoder_rejects_garbage() {
        let err = SymphoniaTranscoder
            .transcode(vec![7; 64], &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, DecodeError::TranscodeFailed(_)));
    }

    #[test]
    fn missing_program_is_a_transcode_failure() {
        let transcoder = CommandTranscoder::ffmpeg("/nonexistent/song-codec-transcoder");
        let err = transcoder
            .transcode(vec![1, 2, 3], &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, DecodeError::TranscodeFailed(_)));
    }
}
