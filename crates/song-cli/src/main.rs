//! `songcodec`: inspect, verify, decode, and pack song documents.
//!
//! ## Commands
//! - `inspect`: print what a document contains and how it would be played.
//! - `verify`: check the lossless payload digest.
//! - `decode`: run the fallback chain and write a WAV file. Ctrl-C cancels an in-flight
//!   transcode.
//! - `pack`: embed an audio file in a new document.

mod cli;

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use song_codec::decode::probe_stream;
use song_codec::{
    CancelToken, CodecConfig, IntegrityStatus, Song, SongCodec, SongDocument, SongMeta,
    TranscoderKind,
};
use tracing_subscriber::EnvFilter;

use cli::{Command, TranscoderArg};

/// Exit code for a digest mismatch.
const EXIT_MISMATCH: u8 = 2;

fn main() -> Result<ExitCode> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,song_codec=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(args.config.as_deref())?;

    match args.cmd {
        Command::Inspect { doc, json } => inspect(config, &doc, json),
        Command::Verify { doc } => verify(config, &doc),
        Command::Decode {
            doc,
            output,
            sample_rate,
            channels,
            timeout_ms,
            transcoder,
        } => {
            let config = DecodeOverrides {
                sample_rate,
                channels,
                timeout_ms,
                transcoder,
            }
            .apply(config);
            decode(config, &doc, &output)
        }
        Command::Pack {
            audio,
            output,
            bpm,
            key,
            time,
            chords,
            chunk_size,
        } => {
            let meta = SongMeta {
                bpm,
                key,
                time_signature: time,
                version: None,
                build: Some(env!("GIT_SHA").to_string()),
            };
            pack(&audio, &output, meta, chords, chunk_size)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<CodecConfig> {
    match path {
        Some(path) => {
            let config = CodecConfig::load(path)?;
            tracing::debug!(path = %path.display(), "config loaded");
            Ok(config)
        }
        None => Ok(CodecConfig::default()),
    }
}

/// Command-line values that take precedence over the config file.
struct DecodeOverrides {
    sample_rate: Option<u32>,
    channels: Option<usize>,
    timeout_ms: Option<u64>,
    transcoder: Option<TranscoderArg>,
}

impl DecodeOverrides {
    fn apply(self, mut config: CodecConfig) -> CodecConfig {
        if let Some(rate) = self.sample_rate {
            config.output_sample_rate = Some(rate);
        }
        if let Some(channels) = self.channels {
            config.output_channels = Some(channels);
        }
        if let Some(ms) = self.timeout_ms {
            config.transcode_timeout_ms = ms;
        }
        match self.transcoder {
            Some(TranscoderArg::Builtin) => config.transcoder = TranscoderKind::Builtin,
            Some(TranscoderArg::Ffmpeg) => config.transcoder = TranscoderKind::Command,
            None => {}
        }
        config
    }
}

fn read_song(codec: &SongCodec, path: &Path) -> Result<Song> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("read document {:?}", path))?;
    let song = codec
        .parse(&text)
        .with_context(|| format!("parse document {:?}", path))?;
    for warning in &song.warnings {
        tracing::warn!("{warning}");
    }
    Ok(song)
}

fn inspect(config: CodecConfig, doc: &Path, json: bool) -> Result<ExitCode> {
    let codec = SongCodec::new(config);
    let song = read_song(&codec, doc)?;
    let strategy = codec.strategy_for(&song);
    let integrity = codec.integrity_report(&song);
    let size = codec.size_estimate(&song);

    if json {
        let value = serde_json::json!({
            "meta": &song.meta,
            "analysis": &song.analysis,
            "audio": &song.audio,
            "neural": &song.neural,
            "warnings": song.warnings.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "strategy": strategy,
            "integrity": integrity,
            "size": size,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(ExitCode::SUCCESS);
    }

    let meta = &song.meta;
    println!("bpm:       {}", meta.bpm);
    println!("key:       {}", meta.key);
    println!("time:      {}", meta.time_signature);
    if let Some(version) = meta.version.as_deref() {
        println!("version:   {version}");
    }
    println!("chords:    {}", song.analysis.chord_summary);
    match &song.audio {
        Some(audio) => println!(
            "lossless:  {} Hz, {} ch, {} chunks, {} bytes",
            audio.sample_rate, audio.channels, audio.chunk_count, size.lossless
        ),
        None => println!("lossless:  none"),
    }
    match &song.neural {
        Some(neural) => println!(
            "neural:    {} ({} tokens, ratio {:.2})",
            neural.model, neural.token_count, neural.compression_ratio
        ),
        None => println!("neural:    none"),
    }
    println!("integrity: {}", integrity.status.label());
    println!("strategy:  {}", strategy.label());
    println!("size:      {} bytes", size.total);
    for warning in &song.warnings {
        println!("warning:   {warning}");
    }
    Ok(ExitCode::SUCCESS)
}

fn verify(config: CodecConfig, doc: &Path) -> Result<ExitCode> {
    let codec = SongCodec::new(config);
    let song = read_song(&codec, doc)?;
    let report = codec.integrity_report(&song);

    println!("status:   {}", report.status.label());
    println!("computed: {}", report.computed.as_deref().unwrap_or("-"));
    println!("expected: {}", report.expected.as_deref().unwrap_or("-"));

    if report.status == IntegrityStatus::Mismatch {
        return Ok(ExitCode::from(EXIT_MISMATCH));
    }
    Ok(ExitCode::SUCCESS)
}

fn decode(config: CodecConfig, doc: &Path, output: &Path) -> Result<ExitCode> {
    let codec = SongCodec::new(config);
    let mut song = read_song(&codec, doc)?;

    let cancel = CancelToken::new();
    let cancel_for_signal = cancel.clone();
    ctrlc::set_handler(move || {
        tracing::warn!("interrupt received, cancelling decode");
        cancel_for_signal.cancel();
    })
    .context("install Ctrl-C handler")?;

    let wav = codec
        .decode_to_wav_with_cancel(&mut song, &cancel)
        .with_context(|| format!("decode {:?}", doc))?;
    std::fs::write(output, &wav.bytes).with_context(|| format!("write {:?}", output))?;

    let report = &wav.report;
    for downgrade in &report.downgrades {
        println!(
            "downgraded: {} -> {} ({})",
            downgrade.from.label(),
            downgrade.to.label(),
            downgrade.reason
        );
    }
    println!(
        "{}: {} Hz, {} ch, {} ms, strategy {}, integrity {}",
        output.display(),
        report.sample_rate,
        report.channels,
        report.duration_ms,
        report.used.label(),
        report.integrity.label()
    );
    Ok(ExitCode::SUCCESS)
}

fn pack(
    audio: &Path,
    output: &Path,
    meta: SongMeta,
    chords: Option<String>,
    chunk_size: usize,
) -> Result<ExitCode> {
    let bytes = std::fs::read(audio).with_context(|| format!("read audio {:?}", audio))?;
    let text = pack_document(bytes, audio, meta, chords, chunk_size)?;
    std::fs::write(output, &text).with_context(|| format!("write {:?}", output))?;
    tracing::info!(path = %output.display(), chars = text.len(), "document written");
    Ok(ExitCode::SUCCESS)
}

fn pack_document(
    bytes: Vec<u8>,
    audio: &Path,
    meta: SongMeta,
    chords: Option<String>,
    chunk_size: usize,
) -> Result<String> {
    let hint = audio.extension().and_then(|e| e.to_str());
    let info = probe_stream(bytes.clone(), hint)
        .with_context(|| format!("probe audio {:?}", audio))?;
    tracing::info!(
        codec = info.codec.as_deref().unwrap_or("unknown"),
        rate_hz = info.sample_rate,
        channels = info.channels,
        bytes = bytes.len(),
        "packing audio"
    );

    let mut document = SongDocument::new(meta)
        .with_lossless(bytes, info.sample_rate, info.channels)
        .with_chunk_size(chunk_size);
    if let Some(chords) = chords {
        document = document.with_chords(chords);
    }
    document.render().context("render document")
}
