//! Lossless payload reassembly.
//!
//! The payload is split into base64 fragments, each introduced by a
//! `<<PAYLOAD:FLAC:<index>>>` marker. Markers may appear in any textual order and
//! fragments may be wrapped at any width, so reassembly:
//! - collects every marker and its fragment
//! - strips whitespace from each fragment
//! - concatenates fragments by index
//! - decodes the joined text once (quartets do not align with chunk boundaries)

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};

use crate::error::ReassemblyError;
use crate::song::AudioDescriptor;

/// Opening text of a lossless payload marker; the index and `>>` follow.
pub const PAYLOAD_MARKER_PREFIX: &str = "<<PAYLOAD:FLAC:";
const MARKER_CLOSE: &str = ">>";
const MARKER_OPEN: &str = "<<";

/// Standard alphabet, padding optional.
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// One index-labelled fragment of the lossless payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    /// 1-based sequence index taken from the marker.
    pub sequence_index: usize,
    /// Fragment text with all whitespace removed.
    pub fragment: String,
}

/// Collect every payload marker in textual order.
///
/// A fragment runs from the end of its marker to the next `<<` marker or end of text.
/// It ends early at a line that closes a block (`}`) or opens one (`neural: {`).
/// Any other character outside the base64 alphabet is an error.
pub fn scan_chunks(text: &str) -> Result<Vec<Chunk>, ReassemblyError> {
    let mut chunks = Vec::new();

    for (start, _) in text.match_indices(PAYLOAD_MARKER_PREFIX) {
        let index_start = start + PAYLOAD_MARKER_PREFIX.len();
        let rest = &text[index_start..];
        let close = rest
            .find(MARKER_CLOSE)
            .ok_or_else(|| ReassemblyError::InvalidMarker(snippet(&text[start..])))?;
        let raw_index = &rest[..close];
        let sequence_index = raw_index
            .trim()
            .parse::<usize>()
            .map_err(|_| ReassemblyError::InvalidMarker(snippet(&text[start..])))?;

        let body_start = index_start + close + MARKER_CLOSE.len();
        let body_end = text[body_start..]
            .find(MARKER_OPEN)
            .map(|offset| body_start + offset)
            .unwrap_or(text.len());

        chunks.push(Chunk {
            sequence_index,
            fragment: clean_fragment(sequence_index, &text[body_start..body_end])?,
        });
    }

    Ok(chunks)
}

/// Rebuild the raw lossless bytes declared by `descriptor` from `text`.
pub fn reassemble_lossless(
    text: &str,
    descriptor: &AudioDescriptor,
) -> Result<Vec<u8>, ReassemblyError> {
    let declared = descriptor.chunk_count;
    if declared == 0 {
        return Err(ReassemblyError::EmptyPayload);
    }

    let mut by_index: BTreeMap<usize, String> = BTreeMap::new();
    for chunk in scan_chunks(text)? {
        match by_index.get(&chunk.sequence_index) {
            Some(existing) if *existing != chunk.fragment => {
                return Err(ReassemblyError::ConflictingChunk(chunk.sequence_index));
            }
            Some(_) => {
                tracing::debug!(index = chunk.sequence_index, "duplicate payload chunk ignored");
            }
            None => {
                by_index.insert(chunk.sequence_index, chunk.fragment);
            }
        }
    }

    let out_of_range = by_index.keys().any(|&i| i == 0 || i > declared);
    if out_of_range || by_index.len() > declared {
        return Err(ReassemblyError::ChunkCountMismatch {
            declared,
            found: by_index.len(),
        });
    }
    if let Some(missing) = (1..=declared).find(|i| !by_index.contains_key(i)) {
        return Err(ReassemblyError::MissingChunk(missing));
    }

    let hint = descriptor.chunk_size_hint;
    if hint > 0 {
        if let Some((index, frag)) = by_index.iter().find(|(_, f)| f.len() > hint) {
            tracing::debug!(index, len = frag.len(), hint, "chunk larger than declared size");
        }
    }

    let joined: String = by_index.into_values().collect();
    PAYLOAD_ENGINE
        .decode(joined.as_bytes())
        .map_err(|e| ReassemblyError::InvalidBase64(e.to_string()))
}

fn is_base64_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=')
}

fn clean_fragment(index: usize, span: &str) -> Result<String, ReassemblyError> {
    let mut out = String::with_capacity(span.len());
    for line in span.lines() {
        if is_structural_line(line) {
            break;
        }
        for c in line.chars().filter(|c| !c.is_whitespace()) {
            if !is_base64_char(c) {
                return Err(ReassemblyError::InvalidBase64(format!(
                    "chunk {index}: unexpected character {c:?}"
                )));
            }
            out.push(c);
        }
    }
    Ok(out)
}

/// A closing brace or the opening of another block (`ident: {`).
fn is_structural_line(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.starts_with('}') {
        return true;
    }
    let ident_len = trimmed
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(trimmed.len());
    ident_len > 0
        && trimmed[ident_len..]
            .trim_start()
            .strip_prefix(':')
            .is_some_and(|rest| rest.trim_start().starts_with('{'))
}

fn snippet(text: &str) -> String {
    text.chars().take(32).collect()
}
