//! Song document parser.
//!
//! A document is loose `key: { ... }` blocks plus payload markers:
//!
//! ```text
//! Song {
//!   meta: { bpm: 120, key: "C", time: "4/4", version: "2.0" }
//!   analysis: { chords: | C | G | Am | F | }
//!   audio: { format: "flac", sr: 44100, channels: 2, sha256: "<hex>", chunks: 2, chunk_size: 65536 }
//! <<PAYLOAD:FLAC:1>>
//! ...base64...
//!   neural: { format: "neural_codec", model: "encodec_24khz", tokens: 3, compression_ratio: 100.0 }
//! <<NEURAL_TOKENS>>
//! [12, -4, 30]
//! }
//! ```
//!
//! Only the metadata block is mandatory. Problems in any other block are recorded as
//! [`SongWarning`]s and disable that block alone.

use std::str::FromStr;

use crate::error::ParseError;
use crate::reassemble::reassemble_lossless;
use crate::song::{Analysis, AudioDescriptor, NeuralDescriptor, Song, SongMeta, SongWarning};

/// Major document format version this parser understands.
pub const SUPPORTED_FORMAT_MAJOR: &str = "2";
/// Marker introducing the JSON token array.
pub const NEURAL_TOKENS_MARKER: &str = "<<NEURAL_TOKENS>>";

pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;
pub const DEFAULT_CHANNELS: u16 = 2;
pub const DEFAULT_CHUNK_SIZE: usize = 65_536;

/// Parse a song document.
///
/// Fails only when the metadata block is absent or malformed. The lossless payload is
/// reassembled here, so a returned song already owns its raw bytes.
pub fn parse(text: &str) -> Result<Song, ParseError> {
    let meta_body = match find_block(text, "meta") {
        Some(Ok(body)) => body,
        Some(Err(reason)) => return Err(ParseError::MissingMetadata(reason)),
        None => return Err(ParseError::MissingMetadata("no meta block".to_string())),
    };
    let meta = parse_meta(meta_body).map_err(ParseError::MissingMetadata)?;

    let mut song = Song::new(meta);

    if let Some(version) = song.meta.version.as_deref() {
        let major = version.trim().split('.').next().unwrap_or_default();
        if major != SUPPORTED_FORMAT_MAJOR {
            tracing::warn!(version, "unsupported song document version");
            song.warnings.push(SongWarning::VersionMismatch {
                found: version.to_string(),
                supported: SUPPORTED_FORMAT_MAJOR,
            });
        }
    }

    match find_block(text, "analysis") {
        Some(Ok(body)) => song.analysis = parse_analysis(body),
        Some(Err(reason)) => record_malformed(&mut song, "analysis", reason),
        None => {}
    }

    match find_block(text, "audio").map(|b| b.and_then(parse_audio)) {
        Some(Ok(descriptor)) => song.audio = Some(descriptor),
        Some(Err(reason)) => record_malformed(&mut song, "audio", reason),
        None => {}
    }

    match find_block(text, "neural").map(|b| b.and_then(parse_neural)) {
        Some(Ok(descriptor)) => song.neural = Some(descriptor),
        Some(Err(reason)) => record_malformed(&mut song, "neural", reason),
        None => {}
    }

    if let Some(descriptor) = song.audio.as_ref() {
        match reassemble_lossless(text, descriptor) {
            Ok(bytes) => {
                tracing::debug!(bytes = bytes.len(), "lossless payload reassembled");
                song.raw_lossless_bytes = Some(bytes);
            }
            Err(e) => {
                tracing::warn!("lossless payload unavailable: {e}");
                song.warnings.push(SongWarning::LosslessUnavailable(e));
            }
        }
    }

    let tokens = extract_neural_tokens(text);
    match (song.neural.as_ref(), tokens) {
        (_, None) => {}
        (None, Some(_)) => song.warnings.push(SongWarning::OrphanNeuralTokens),
        (Some(_), Some(Err(reason))) => {
            tracing::warn!("neural tokens unreadable: {reason}");
            song.warnings.push(SongWarning::NeuralTokensUnreadable(reason));
        }
        (Some(descriptor), Some(Ok(tokens))) => {
            if descriptor.token_count != 0 && descriptor.token_count != tokens.len() {
                song.warnings.push(SongWarning::TokenCountMismatch {
                    declared: descriptor.token_count,
                    found: tokens.len(),
                });
            }
            song.neural_tokens = Some(tokens);
        }
    }

    Ok(song)
}

fn record_malformed(song: &mut Song, block: &'static str, reason: String) {
    tracing::warn!(block, "malformed block: {reason}");
    song.warnings
        .push(SongWarning::MalformedBlock { block, reason });
}

/// Locate `name: { ... }` and return the text between the braces.
///
/// `name` must stand alone as an identifier, so `meta` never matches `metadata`.
/// Returns `Some(Err(_))` when the block opens but never closes.
fn find_block<'a>(text: &'a str, name: &str) -> Option<Result<&'a str, String>> {
    for (start, _) in text.match_indices(name) {
        let preceded_by_ident = text[..start]
            .chars()
            .next_back()
            .is_some_and(is_ident_char);
        if preceded_by_ident {
            continue;
        }

        let after_name = text[start + name.len()..].trim_start();
        let Some(after_colon) = after_name.strip_prefix(':') else {
            continue;
        };
        let Some(body_and_rest) = after_colon.trim_start().strip_prefix('{') else {
            continue;
        };

        return Some(match body_and_rest.find('}') {
            Some(close) => Ok(&body_and_rest[..close]),
            None => Err(format!("{name} block is not closed")),
        });
    }
    None
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// `key: value` pairs from a block body. Values are bare tokens or `"quoted"` strings;
/// pairs are separated by commas or newlines.
struct Fields<'a> {
    pairs: Vec<(&'a str, &'a str)>,
}

impl<'a> Fields<'a> {
    fn parse(body: &'a str) -> Result<Self, String> {
        let mut pairs = Vec::new();
        let mut rest = body;

        loop {
            rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
            if rest.is_empty() {
                break;
            }

            let key_len = rest
                .find(|c: char| !is_ident_char(c))
                .unwrap_or(rest.len());
            if key_len == 0 {
                return Err(format!("expected a key at `{}`", preview(rest)));
            }
            let key = &rest[..key_len];

            let Some(after_colon) = rest[key_len..].trim_start().strip_prefix(':') else {
                return Err(format!("expected `:` after `{key}`"));
            };
            let after_colon = after_colon.trim_start_matches([' ', '\t']);

            let (value, remaining) = if let Some(quoted) = after_colon.strip_prefix('"') {
                let close = quoted
                    .find('"')
                    .ok_or_else(|| format!("unterminated string for `{key}`"))?;
                (&quoted[..close], &quoted[close + 1..])
            } else {
                let end = after_colon
                    .find([',', '\n'])
                    .unwrap_or(after_colon.len());
                (after_colon[..end].trim(), &after_colon[end..])
            };

            pairs.push((key, value));
            rest = remaining;
        }

        Ok(Self { pairs })
    }

    fn text(&self, key: &str) -> Option<&'a str> {
        self.pairs
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| *v)
    }

    fn required_text(&self, key: &str) -> Result<&'a str, String> {
        self.text(key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| format!("`{key}` is required"))
    }

    fn number<T: FromStr>(&self, key: &str) -> Result<Option<T>, String> {
        match self.text(key) {
            None => Ok(None),
            Some(raw) => raw
                .parse::<T>()
                .map(Some)
                .map_err(|_| format!("`{key}` is not a valid number: `{raw}`")),
        }
    }
}

fn preview(text: &str) -> String {
    text.chars().take(16).collect()
}

fn optional_text(fields: &Fields<'_>, key: &str) -> Option<String> {
    fields
        .text(key)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_meta(body: &str) -> Result<SongMeta, String> {
    let fields = Fields::parse(body)?;
    let bpm = fields
        .number::<u32>("bpm")?
        .ok_or_else(|| "`bpm` is required".to_string())?;
    Ok(SongMeta {
        bpm,
        key: fields.required_text("key")?.to_string(),
        time_signature: fields.required_text("time")?.to_string(),
        version: optional_text(&fields, "version"),
        build: optional_text(&fields, "build"),
    })
}

/// Chords are free text and may contain commas, so the value runs to the end of the block.
fn parse_analysis(body: &str) -> Analysis {
    let Some(chords) = find_value_to_end(body, "chords") else {
        return Analysis::default();
    };
    let chords = chords.trim();
    if chords.is_empty() {
        return Analysis::default();
    }
    Analysis {
        chord_summary: chords.to_string(),
    }
}

fn find_value_to_end<'a>(body: &'a str, key: &str) -> Option<&'a str> {
    for (start, _) in body.match_indices(key) {
        if body[..start].chars().next_back().is_some_and(is_ident_char) {
            continue;
        }
        if let Some(value) = body[start + key.len()..].trim_start().strip_prefix(':') {
            return Some(value);
        }
    }
    None
}

fn parse_audio(body: &str) -> Result<AudioDescriptor, String> {
    let fields = Fields::parse(body)?;

    let format = fields.text("format").unwrap_or("flac");
    if format != "flac" {
        return Err(format!("unsupported audio format `{format}`"));
    }

    let sample_rate = fields.number::<u32>("sr")?.unwrap_or(DEFAULT_SAMPLE_RATE);
    if sample_rate == 0 {
        return Err("`sr` must be positive".to_string());
    }
    let channels = fields.number::<u16>("channels")?.unwrap_or(DEFAULT_CHANNELS);
    if channels == 0 {
        return Err("`channels` must be positive".to_string());
    }
    let chunk_count = fields
        .number::<usize>("chunks")?
        .ok_or_else(|| "`chunks` is required".to_string())?;

    Ok(AudioDescriptor {
        format: format.to_string(),
        sample_rate,
        channels,
        expected_digest: optional_text(&fields, "sha256").map(|d| d.to_ascii_lowercase()),
        chunk_count,
        chunk_size_hint: fields
            .number::<usize>("chunk_size")?
            .unwrap_or(DEFAULT_CHUNK_SIZE),
    })
}

fn parse_neural(body: &str) -> Result<NeuralDescriptor, String> {
    let fields = Fields::parse(body)?;

    if let Some(format) = fields.text("format") {
        if format != "neural_codec" {
            return Err(format!("unsupported neural format `{format}`"));
        }
    }

    let compression_ratio = fields.number::<f32>("compression_ratio")?.unwrap_or(0.0);
    if !compression_ratio.is_finite() {
        return Err("`compression_ratio` must be finite".to_string());
    }

    Ok(NeuralDescriptor {
        model: fields.required_text("model")?.to_string(),
        token_count: fields.number::<usize>("tokens")?.unwrap_or(0),
        compression_ratio,
    })
}

/// `None` when the marker is absent.
fn extract_neural_tokens(text: &str) -> Option<Result<Vec<i32>, String>> {
    let start = text.find(NEURAL_TOKENS_MARKER)?;
    let rest = text[start + NEURAL_TOKENS_MARKER.len()..].trim_start();
    if !rest.starts_with('[') {
        return Some(Err("expected a JSON array after the marker".to_string()));
    }
    let Some(close) = rest.find(']') else {
        return Some(Err("token array is not closed".to_string()));
    };
    Some(serde_json::from_str::<Vec<i32>>(&rest[..=close]).map_err(|e| e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReassemblyError;
    use crate::integrity;
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;

    const HEADER: &str = "Song {\n  meta: { bpm: 120, key: \"C\", time: \"4/4\" }\n  analysis: { chords: | C | G | Am | F | }\n";

    fn lossless_document(fragments: &[&str], sha: &str) -> String {
        let mut text = HEADER.to_string();
        text.push_str(&format!(
            "  audio: {{ format: \"flac\", sr: 44100, channels: 2, sha256: \"{sha}\", chunks: {}, chunk_size: 10 }}\n",
            fragments.len()
        ));
        for (i, fragment) in fragments.iter().enumerate() {
            text.push_str(&format!("<<PAYLOAD:FLAC:{}>>\n{fragment}\n", i + 1));
        }
        text.push_str("}\n");
        text
    }

    #[test]
    fn parses_metadata_and_analysis() {
        let text = "meta: { bpm: 96, key: \"F#m\", time: \"6/8\", version: \"2.1\", build: \"abc\" }\nanalysis: { chords: | F#m | D, E | }";
        let song = parse(text).unwrap();
        assert_eq!(song.meta.bpm, 96);
        assert_eq!(song.meta.key, "F#m");
        assert_eq!(song.meta.time_signature, "6/8");
        assert_eq!(song.meta.version.as_deref(), Some("2.1"));
        assert_eq!(song.meta.build.as_deref(), Some("abc"));
        assert_eq!(song.analysis.chord_summary, "| F#m | D, E |");
        assert!(song.warnings.is_empty());
    }

    #[test]
    fn missing_or_malformed_meta_is_fatal() {
        assert!(matches!(
            parse("analysis: { chords: | C | }"),
            Err(ParseError::MissingMetadata(_))
        ));
        assert!(matches!(
            parse("meta: { bpm: fast, key: \"C\", time: \"4/4\" }"),
            Err(ParseError::MissingMetadata(_))
        ));
        assert!(matches!(
            parse("meta: { bpm: 120, time: \"4/4\" }"),
            Err(ParseError::MissingMetadata(_))
        ));
        assert!(matches!(
            parse("meta: { bpm: 120, key: \"C\", time: \"4/4\""),
            Err(ParseError::MissingMetadata(_))
        ));
    }

    #[test]
    fn meta_key_must_stand_alone() {
        let text = "metadata: { bpm: 1, key: \"X\", time: \"1/1\" }\nmeta: { bpm: 2, key: \"Y\", time: \"2/2\" }";
        let song = parse(text).unwrap();
        assert_eq!(song.meta.bpm, 2);
    }

    #[test]
    fn absent_analysis_uses_placeholder() {
        let song = parse("meta: { bpm: 120, key: \"C\", time: \"4/4\" }").unwrap();
        assert_eq!(song.analysis, Analysis::default());
        assert!(song.audio.is_none());
        assert!(song.neural.is_none());
    }

    #[test]
    fn version_mismatch_is_only_a_warning() {
        let song = parse("meta: { bpm: 120, key: \"C\", time: \"4/4\", version: \"3.0\" }").unwrap();
        assert_eq!(
            song.warnings,
            vec![SongWarning::VersionMismatch {
                found: "3.0".to_string(),
                supported: SUPPORTED_FORMAT_MAJOR
            }]
        );
    }

    #[test]
    fn end_to_end_eight_bytes_verify() {
        let bytes = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let b64 = STANDARD.encode(bytes);
        let (a, b) = b64.split_at(6);
        let sha = integrity::sha256_hex(&bytes);

        let song = parse(&lossless_document(&[a, b], &sha)).unwrap();
        assert_eq!(song.raw_lossless_bytes.as_deref(), Some(&bytes[..]));
        let descriptor = song.audio.as_ref().unwrap();
        assert_eq!(descriptor.chunk_count, 2);
        assert_eq!(descriptor.chunk_size_hint, 10);
        assert_eq!(
            integrity::verify(song.raw_lossless_bytes.as_deref().unwrap(), song.expected_digest()),
            song_codec_types::IntegrityStatus::Verified
        );
    }

    #[test]
    fn corrupted_fragment_still_parses_but_mismatches() {
        let bytes = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let b64 = STANDARD.encode(bytes);
        let (a, b) = b64.split_at(6);
        let sha = integrity::sha256_hex(&bytes);
        let corrupted_a = format!("B{}", &a[1..]);

        let song = parse(&lossless_document(&[&corrupted_a, b], &sha)).unwrap();
        let raw = song.raw_lossless_bytes.as_deref().unwrap();
        assert_eq!(raw.len(), 8);
        assert_eq!(
            integrity::verify(raw, song.expected_digest()),
            song_codec_types::IntegrityStatus::Mismatch
        );
    }

    #[test]
    fn empty_sha_is_treated_as_absent() {
        let b64 = STANDARD.encode([1u8, 2, 3]);
        let song = parse(&lossless_document(&[&b64], "")).unwrap();
        assert!(song.expected_digest().is_none());
        assert!(song.raw_lossless_bytes.is_some());
    }

    #[test]
    fn missing_chunk_degrades_lossless_only() {
        let mut text = HEADER.to_string();
        text.push_str("  audio: { format: \"flac\", sr: 44100, channels: 2, chunks: 3, chunk_size: 4 }\n");
        text.push_str("<<PAYLOAD:FLAC:1>>\nAQID\n<<PAYLOAD:FLAC:3>>\nBwgJ\n}\n");

        let song = parse(&text).unwrap();
        assert!(song.raw_lossless_bytes.is_none());
        assert!(song.audio.is_some());
        assert_eq!(
            song.warnings,
            vec![SongWarning::LosslessUnavailable(ReassemblyError::MissingChunk(2))]
        );
    }

    #[test]
    fn invalid_character_degrades_lossless_only() {
        let text = lossless_document(&["AQID\nBA?G", "BwgJ"], "");
        let song = parse(&text).unwrap();
        assert!(song.raw_lossless_bytes.is_none());
        assert!(song.audio.is_some());
        assert!(matches!(
            song.warnings.as_slice(),
            [SongWarning::LosslessUnavailable(ReassemblyError::InvalidBase64(_))]
        ));
    }

    #[test]
    fn malformed_audio_block_is_dropped() {
        let text = format!("{HEADER}  audio: {{ format: \"ogg\", chunks: 1 }}\n<<PAYLOAD:FLAC:1>>AQID\n}}");
        let song = parse(&text).unwrap();
        assert!(song.audio.is_none());
        assert!(song.raw_lossless_bytes.is_none());
        assert!(matches!(
            song.warnings.as_slice(),
            [SongWarning::MalformedBlock { block: "audio", .. }]
        ));

        let text = format!("{HEADER}  audio: {{ format: \"flac\", sr: 44100 }}\n}}");
        let song = parse(&text).unwrap();
        assert!(song.audio.is_none());
    }

    #[test]
    fn audio_defaults_apply() {
        let text = format!("{HEADER}  audio: {{ chunks: 1 }}\n<<PAYLOAD:FLAC:1>>AQID\n}}");
        let song = parse(&text).unwrap();
        let audio = song.audio.unwrap();
        assert_eq!(audio.sample_rate, DEFAULT_SAMPLE_RATE);
        assert_eq!(audio.channels, DEFAULT_CHANNELS);
        assert_eq!(audio.chunk_size_hint, DEFAULT_CHUNK_SIZE);
        assert_eq!(song.raw_lossless_bytes, Some(vec![1, 2, 3]));
    }

    #[test]
    fn neural_block_and_tokens() {
        let text = format!(
            "{HEADER}  neural: {{\n    format: \"neural_codec\", model: \"facebook/encodec_24khz\",\n    tokens: 4, compression_ratio: 100.00\n  }}\n\n<<NEURAL_TOKENS>>\n[12, -4, 30, 0]\n}}"
        );
        let song = parse(&text).unwrap();
        let neural = song.neural.as_ref().unwrap();
        assert_eq!(neural.model, "facebook/encodec_24khz");
        assert_eq!(neural.token_count, 4);
        assert_eq!(neural.compression_ratio, 100.0);
        assert_eq!(song.neural_tokens, Some(vec![12, -4, 30, 0]));
        assert!(song.raw_lossless_bytes.is_none());
        assert!(song.warnings.is_empty());
    }

    #[test]
    fn token_problems_are_warnings() {
        let text = format!(
            "{HEADER}  neural: {{ model: \"m\", tokens: 5 }}\n<<NEURAL_TOKENS>>\n[1, 2]\n}}"
        );
        let song = parse(&text).unwrap();
        assert_eq!(song.neural_tokens, Some(vec![1, 2]));
        assert_eq!(
            song.warnings,
            vec![SongWarning::TokenCountMismatch {
                declared: 5,
                found: 2
            }]
        );

        let text = format!("{HEADER}  neural: {{ model: \"m\" }}\n<<NEURAL_TOKENS>>\n[1, x]\n}}");
        let song = parse(&text).unwrap();
        assert!(song.neural_tokens.is_none());
        assert!(matches!(
            song.warnings.as_slice(),
            [SongWarning::NeuralTokensUnreadable(_)]
        ));

        let text = format!("{HEADER}<<NEURAL_TOKENS>>\n[1]\n}}");
        let song = parse(&text).unwrap();
        assert!(song.neural_tokens.is_none());
        assert_eq!(song.warnings, vec![SongWarning::OrphanNeuralTokens]);
    }
}
