//! Error types for Cadence.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{AudioFileFormat, VoiceId};

/// Result type alias using Cadence's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Cadence.
#[derive(Error, Debug)]
pub enum Error {
    // Format detection
    #[error("Unrecognized audio format: {}", .0.display())]
    FormatUnrecognized(PathBuf),

    #[error("No decoder available for {0:?} streams")]
    DecoderUnavailable(AudioFileFormat),

    // Stream lifecycle
    #[error("Failed to open {}: {reason}", path.display())]
    OpenFailed { path: PathBuf, reason: String },

    #[error("Stream is already open")]
    AlreadyOpen,

    #[error("Sound asset is already loaded")]
    AlreadyLoaded,

    #[error("Sound asset has no audio data loaded")]
    NotLoaded,

    #[error("Audio decode error: {0}")]
    DecodeError(String),

    #[error("Out of memory while allocating a {0} byte PCM buffer")]
    OutOfMemory(usize),

    // Binding lifecycle
    #[error("Sound asset is still referenced by {ref_count} voice(s)")]
    StillReferenced { ref_count: usize },

    #[error("Voice {0} is not bound to this sound asset")]
    NotBound(VoiceId),

    #[error("Voice {0} is already bound to this sound asset")]
    AlreadyBound(VoiceId),

    // Backend errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    // Configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build an [`Error::OpenFailed`] for `path`.
    pub fn open_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::OpenFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if the failed operation left its target untouched and may be retried.
    ///
    /// A failed `load` leaves the asset empty, so open and IO failures qualify.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::OpenFailed { .. } | Self::Io(_) | Self::OutOfMemory(_) | Self::DecodeError(_)
        )
    }

    /// Returns true if this error reports a voice without an active binding.
    pub const fn is_not_bound(&self) -> bool {
        matches!(self, Self::NotBound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        assert!(Error::open_failed("a.wav", "missing").is_retryable());
        assert!(Error::Io(std::io::Error::other("disk")).is_retryable());
        assert!(!Error::StillReferenced { ref_count: 2 }.is_retryable());
        assert!(!Error::AlreadyLoaded.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = Error::open_failed("music/theme.ogg", "not a vorbis stream");
        assert_eq!(
            err.to_string(),
            "Failed to open music/theme.ogg: not a vorbis stream"
        );

        let err = Error::StillReferenced { ref_count: 1 };
        assert_eq!(
            err.to_string(),
            "Sound asset is still referenced by 1 voice(s)"
        );
    }

    #[test]
    fn test_not_bound() {
        let err = Error::NotBound(VoiceId::from_raw(7));
        assert!(err.is_not_bound());
        assert_eq!(err.to_string(), "Voice #7 is not bound to this sound asset");
    }
}
