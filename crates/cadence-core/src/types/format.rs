//! Audio container and PCM layout types.

use serde::{Deserialize, Serialize};

/// Audio container format, as recognised from a file name or header.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioFileFormat {
    /// RIFF/WAVE container holding raw PCM.
    Wav,
    /// MPEG-1/2 layer III.
    Mp3,
    /// Ogg container with a Vorbis stream.
    Ogg,
    /// Not recognised.
    #[default]
    Unknown,
}

impl AudioFileFormat {
    /// Classify a file extension (without the dot).
    ///
    /// Matching is case-sensitive and only exact three-letter extensions are accepted.
    pub fn from_extension(ext: &str) -> Self {
        match ext {
            "wav" => Self::Wav,
            "mp3" => Self::Mp3,
            "ogg" => Self::Ogg,
            _ => Self::Unknown,
        }
    }

    /// Get the canonical file extension for this format.
    pub const fn extension(&self) -> Option<&'static str> {
        match self {
            Self::Wav => Some("wav"),
            Self::Mp3 => Some("mp3"),
            Self::Ogg => Some("ogg"),
            Self::Unknown => None,
        }
    }

    /// Whether decoding this format needs an external decoder.
    pub const fn is_compressed(&self) -> bool {
        matches!(self, Self::Mp3 | Self::Ogg)
    }

    pub const fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Layout of interleaved PCM data.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct PcmFormat {
    /// Frames per second.
    pub sample_rate: u32,
    /// Interleaved channels per frame.
    pub channels: u16,
    /// Bytes per mono sample.
    pub sample_width: u16,
}

impl PcmFormat {
    pub const fn new(sample_rate: u32, channels: u16, sample_width: u16) -> Self {
        Self {
            sample_rate,
            channels,
            sample_width,
        }
    }

    /// Size in bytes of one multi-channel frame.
    pub const fn block_size(&self) -> usize {
        self.sample_width as usize * self.channels as usize
    }

    pub const fn bits_per_sample(&self) -> u32 {
        self.sample_width as u32 * 8
    }

    /// Key identifying buffers a voice can play back to back without reconfiguration.
    ///
    /// Two formats share a key exactly when all three fields match.
    pub const fn format_hash(&self) -> u64 {
        ((self.sample_rate as u64) << 32)
            | ((self.channels as u64) << 16)
            | self.sample_width as u64
    }

    /// Round `bytes` down to a whole number of frames.
    pub const fn align_down(&self, bytes: u64) -> u64 {
        let block = self.block_size() as u64;
        if block == 0 {
            0
        } else {
            bytes - bytes % block
        }
    }

    /// Number of whole frames in `bytes`.
    pub const fn frames_in(&self, bytes: u64) -> u64 {
        let block = self.block_size() as u64;
        if block == 0 {
            0
        } else {
            bytes / block
        }
    }

    /// Whether this describes a playable layout.
    pub const fn is_valid(&self) -> bool {
        self.sample_rate > 0 && self.channels > 0 && self.sample_width > 0
    }
}
