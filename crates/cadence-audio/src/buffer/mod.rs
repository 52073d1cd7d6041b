//! PCM buffers exchanged between streamers and voices.

pub mod pcm;

pub use pcm::PcmBuffer;
