use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "songcodec", version = VERSION)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Codec settings (TOML). Flags override values from the file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show metadata, payload descriptors, warnings, and the chosen strategy
    Inspect {
        /// Song document
        doc: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Check the lossless payload against its digest (exit code 2 on mismatch)
    Verify {
        /// Song document
        doc: PathBuf,
    },

    /// Decode a song document to WAV
    Decode {
        /// Song document
        doc: PathBuf,

        /// Output WAV path
        #[arg(short, long)]
        output: PathBuf,

        /// Resample output to this rate
        #[arg(long)]
        sample_rate: Option<u32>,

        /// Remix output to this many channels
        #[arg(long)]
        channels: Option<usize>,

        /// Transcode fallback timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Transcoder used when the native decoder rejects the payload
        #[arg(long, value_enum)]
        transcoder: Option<TranscoderArg>,
    },

    /// Wrap an encoded audio file (FLAC recommended) into a song document
    Pack {
        /// Audio file to embed
        audio: PathBuf,

        /// Output document path
        #[arg(short, long)]
        output: PathBuf,

        #[arg(long, default_value_t = 120)]
        bpm: u32,

        #[arg(long, default_value = "Unknown")]
        key: String,

        /// Time signature
        #[arg(long, default_value = "4/4")]
        time: String,

        /// Chord summary, e.g. "| C | G | Am | F |"
        #[arg(long)]
        chords: Option<String>,

        /// Base64 characters per payload chunk
        #[arg(long, default_value_t = 65_536)]
        chunk_size: usize,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TranscoderArg {
    /// In-process decode and re-encode
    Builtin,
    /// Pipe through ffmpeg
    Ffmpeg,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_accepts_overrides() {
        let args = Args::try_parse_from([
            "songcodec",
            "--config",
            "codec.toml",
            "decode",
            "song.txt",
            "-o",
            "out.wav",
            "--sample-rate",
            "48000",
            "--channels",
            "2",
            "--timeout-ms",
            "500",
            "--transcoder",
            "ffmpeg",
        ])
        .unwrap();

        assert_eq!(args.config, Some(PathBuf::from("codec.toml")));
        match args.cmd {
            Command::Decode {
                doc,
                output,
                sample_rate,
                channels,
                timeout_ms,
                transcoder,
            } => {
                assert_eq!(doc, PathBuf::from("song.txt"));
                assert_eq!(output, PathBuf::from("out.wav"));
                assert_eq!(sample_rate, Some(48_000));
                assert_eq!(channels, Some(2));
                assert_eq!(timeout_ms, Some(500));
                assert_eq!(transcoder, Some(TranscoderArg::Ffmpeg));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn config_flag_is_global() {
        let args = Args::try_parse_from(["songcodec", "verify", "song.txt", "--config", "c.toml"])
            .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("c.toml")));
    }

    #[test]
    fn pack_defaults() {
        let args = Args::try_parse_from(["songcodec", "pack", "a.flac", "-o", "a.txt"]).unwrap();
        match args.cmd {
            Command::Pack {
                bpm,
                key,
                time,
                chords,
                chunk_size,
                ..
            } => {
                assert_eq!(bpm, 120);
                assert_eq!(key, "Unknown");
                assert_eq!(time, "4/4");
                assert!(chords.is_none());
                assert_eq!(chunk_size, 65_536);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn decode_requires_output() {
        assert!(Args::try_parse_from(["songcodec", "decode", "song.txt"]).is_err());
        assert!(
            Args::try_parse_from(["songcodec", "decode", "s.txt", "-o", "o.wav", "--transcoder", "sox"])
                .is_err()
        );
    }
}
