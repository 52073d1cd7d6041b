//! # cadence-audio
//!
//! Streaming audio playback for Cadence.
//!
//! Features:
//! - Format sniffing by extension and file header (WAV, MP3, Ogg Vorbis)
//! - Block-aligned PCM streamers over a pluggable file system and decoder set
//! - Double-buffered per-voice streaming with seek, rewind and refill
//! - A background refill worker shared by every managed stream
//! - Optional cpal output behind the `cpal` feature

pub mod asset;
pub mod buffer;
pub mod decode;
pub mod engine;
pub mod io;
pub mod refill;
pub mod sniff;
pub mod streamer;
pub mod voice;

#[cfg(test)]
mod test_support;

pub use asset::{AssetKind, SoundAsset};
pub use buffer::PcmBuffer;
pub use decode::{DecoderProvider, DecoderRegistry, PcmDecoder};
pub use engine::StreamingEngine;
pub use io::{FileHandle, FileSystem, IoContext, LocalFileSystem, MemoryFileSystem};
pub use refill::{ManagedStream, StreamRegistry};
pub use streamer::AudioStreamer;
pub use voice::{PlaybackBackend, PlaybackVoice, SoftwareBackend, SoftwareVoice, VoiceState};
