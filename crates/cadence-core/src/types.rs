//! Core domain types for Cadence.

pub mod format;
pub mod ids;

pub use format::{AudioFileFormat, PcmFormat};
pub use ids::{AssetId, VoiceId};
