//! Supported audio formats and their ffmpeg parameter sets.
//!
//! The registry is a closed set: each format carries the flags for reading
//! it from a pipe, the flags for encoding to it, and fixed frame-size
//! expectations where the format has them. Values are constants; nothing
//! here is derived from user input beyond the identifier match.

use std::fmt;
use std::str::FromStr;

use super::error::TranscodeError;

/// Telephony leg frame size: 20ms of PCM16LE @ 8kHz mono.
pub const TELEPHONY_FRAME_BYTES: usize = 320;

/// Telephony leg sample rate in Hz.
pub const TELEPHONY_SAMPLE_RATE: u32 = 8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioFormat {
    PcmS16le,
    G711Ulaw,
    G711Alaw,
    Opus,
    Mp3,
}

impl AudioFormat {
    /// All supported formats, in registry order.
    pub const ALL: [AudioFormat; 5] = [
        AudioFormat::PcmS16le,
        AudioFormat::G711Ulaw,
        AudioFormat::G711Alaw,
        AudioFormat::Opus,
        AudioFormat::Mp3,
    ];

    /// Canonical string identifier.
    pub fn id(self) -> &'static str {
        match self {
            AudioFormat::PcmS16le => "pcm_s16le",
            AudioFormat::G711Ulaw => "g711_ulaw",
            AudioFormat::G711Alaw => "g711_alaw",
            AudioFormat::Opus => "opus",
            AudioFormat::Mp3 => "mp3",
        }
    }

    /// Static parameter profile for this format.
    pub fn profile(self) -> &'static FormatProfile {
        match self {
            AudioFormat::PcmS16le => &PCM_S16LE,
            AudioFormat::G711Ulaw => &G711_ULAW,
            AudioFormat::G711Alaw => &G711_ALAW,
            AudioFormat::Opus => &OPUS,
            AudioFormat::Mp3 => &MP3,
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for AudioFormat {
    type Err = TranscodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pcm_s16le" => Ok(AudioFormat::PcmS16le),
            "g711_ulaw" => Ok(AudioFormat::G711Ulaw),
            "g711_alaw" => Ok(AudioFormat::G711Alaw),
            "opus" => Ok(AudioFormat::Opus),
            "mp3" => Ok(AudioFormat::Mp3),
            other => Err(TranscodeError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Static parameter set for one format.
#[derive(Debug)]
pub struct FormatProfile {
    pub format: AudioFormat,
    /// ffmpeg flags for demuxing/decoding this format from a pipe.
    pub ffmpeg_input: &'static [&'static str],
    /// ffmpeg flags for encoding to this format.
    pub ffmpeg_output: &'static [&'static str],
    /// Expected input chunk size in bytes (None = variable-size format).
    pub input_frame_bytes: Option<usize>,
    /// Expected output chunk size in bytes (None = variable-size format).
    pub output_frame_bytes: Option<usize>,
}

static PCM_S16LE: FormatProfile = FormatProfile {
    format: AudioFormat::PcmS16le,
    ffmpeg_input: &["-f", "s16le", "-ar", "8000", "-ac", "1"],
    ffmpeg_output: &["-c:a", "pcm_s16le", "-f", "s16le", "-ar", "8000", "-ac", "1"],
    input_frame_bytes: Some(320),
    output_frame_bytes: Some(160),
};

static G711_ULAW: FormatProfile = FormatProfile {
    format: AudioFormat::G711Ulaw,
    ffmpeg_input: &["-f", "mulaw", "-ar", "8000", "-ac", "1"],
    ffmpeg_output: &["-c:a", "pcm_mulaw", "-f", "mulaw", "-ar", "8000", "-ac", "1"],
    input_frame_bytes: Some(80),
    output_frame_bytes: Some(80),
};

static G711_ALAW: FormatProfile = FormatProfile {
    format: AudioFormat::G711Alaw,
    ffmpeg_input: &["-f", "alaw", "-ar", "8000", "-ac", "1"],
    ffmpeg_output: &["-c:a", "pcm_alaw", "-f", "alaw", "-ar", "8000", "-ac", "1"],
    input_frame_bytes: Some(80),
    output_frame_bytes: Some(80),
};

static OPUS: FormatProfile = FormatProfile {
    format: AudioFormat::Opus,
    ffmpeg_input: &["-f", "ogg", "-c:a", "libopus"],
    ffmpeg_output: &["-c:a", "libopus", "-f", "ogg", "-ar", "8000", "-ac", "1", "-b:a", "16k"],
    input_frame_bytes: None,
    output_frame_bytes: None,
};

static MP3: FormatProfile = FormatProfile {
    format: AudioFormat::Mp3,
    ffmpeg_input: &["-f", "mp3"],
    ffmpeg_output: &["-c:a", "mp3", "-f", "mp3", "-ar", "8000", "-ac", "1", "-b:a", "32k"],
    input_frame_bytes: None,
    output_frame_bytes: None,
};

/// Look up a profile by its string identifier.
pub fn lookup(id: &str) -> Result<&'static FormatProfile, TranscodeError> {
    id.parse::<AudioFormat>().map(AudioFormat::profile).map_err(|e| {
        log::warn!(
            "unsupported format {:?}; supported: {}",
            id,
            supported_ids().join(", ")
        );
        e
    })
}

/// Ordered list of supported format identifiers, for diagnostics.
pub fn supported_ids() -> Vec<&'static str> {
    AudioFormat::ALL.iter().map(|f| f.id()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_resolves_every_supported_id() {
        for format in AudioFormat::ALL {
            let profile = lookup(format.id()).expect("supported format must resolve");
            assert_eq!(profile.format, format);
        }
    }

    #[test]
    fn lookup_rejects_unknown_ids() {
        for id in ["wav", "g722", "", "PCM_S16LE", "opus "] {
            match lookup(id) {
                Err(TranscodeError::UnsupportedFormat(got)) => assert_eq!(got, id),
                other => panic!("expected UnsupportedFormat for {:?}, got {:?}", id, other.map(|p| p.format)),
            }
        }
    }

    #[test]
    fn supported_ids_are_ordered() {
        assert_eq!(
            supported_ids(),
            vec!["pcm_s16le", "g711_ulaw", "g711_alaw", "opus", "mp3"]
        );
    }

    #[test]
    fn fixed_frame_sizes_match_the_wire_contract() {
        assert_eq!(AudioFormat::PcmS16le.profile().input_frame_bytes, Some(320));
        assert_eq!(AudioFormat::PcmS16le.profile().output_frame_bytes, Some(160));
        assert_eq!(AudioFormat::G711Ulaw.profile().input_frame_bytes, Some(80));
        assert_eq!(AudioFormat::G711Alaw.profile().output_frame_bytes, Some(80));
        assert_eq!(AudioFormat::Opus.profile().input_frame_bytes, None);
        assert_eq!(AudioFormat::Mp3.profile().output_frame_bytes, None);
    }
}
