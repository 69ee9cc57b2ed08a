use song_codec_types::PlaybackStrategy;

use crate::song::Song;

/// Highest-fidelity strategy the song's payloads allow.
///
/// Looks only at what is present, never at whether it will decode: a lossless payload
/// wins, then neural tokens, then the metadata tone.
pub fn strategy_for(song: &Song) -> PlaybackStrategy {
    if song.raw_lossless_bytes.is_some() {
        PlaybackStrategy::Lossless
    } else if song.neural_tokens.is_some() {
        PlaybackStrategy::Neural
    } else {
        PlaybackStrategy::Synthetic
    }
}
