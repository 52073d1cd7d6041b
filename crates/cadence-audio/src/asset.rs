//! Sound assets: a file decoded up front or streamed, bound to playback voices.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cadence_core::{AssetId, Error, PcmFormat, Result, StreamingConfig, VoiceId};
use tracing::{debug, info, warn};

use crate::buffer::PcmBuffer;
use crate::engine::StreamingEngine;
use crate::io::IoContext;
use crate::streamer::AudioStreamer;
use crate::voice::PlaybackVoice;

/// How an asset holds its PCM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    /// The whole file is decoded into one buffer at load time.
    StaticBuffer,
    /// Decoded incrementally per voice by a [`StreamingEngine`].
    Stream,
}

struct StaticBinding {
    voice: Arc<dyn PlaybackVoice>,
    /// Offset of the submitted buffer within the sound; non-zero after a seek.
    base: u64,
}

struct StaticSound {
    buffer: Arc<PcmBuffer>,
    bindings: Vec<StaticBinding>,
}

enum AssetData {
    Empty,
    Static(StaticSound),
    Stream(StreamingEngine),
}

/// An audio file that voices can be bound to.
///
/// Voices must be unbound before the asset is unloaded; dropping an asset
/// that still has bindings stops those voices.
pub struct SoundAsset {
    id: AssetId,
    kind: AssetKind,
    io: IoContext,
    config: StreamingConfig,
    path: Option<PathBuf>,
    data: AssetData,
}

impl SoundAsset {
    /// An empty asset that decodes its file completely on load.
    pub fn new_static(io: IoContext) -> Self {
        Self::new(AssetKind::StaticBuffer, io, StreamingConfig::default())
    }

    /// An empty asset that streams its file in `config.buffer_size` chunks.
    pub fn new_stream(io: IoContext, config: StreamingConfig) -> Self {
        Self::new(AssetKind::Stream, io, config)
    }

    fn new(kind: AssetKind, io: IoContext, config: StreamingConfig) -> Self {
        Self {
            id: AssetId::next(),
            kind,
            io,
            config,
            path: None,
            data: AssetData::Empty,
        }
    }

    /// Open `path` and prepare its PCM. On failure the asset stays empty.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        if self.is_loaded() {
            return Err(Error::AlreadyLoaded);
        }

        let data = match self.kind {
            AssetKind::StaticBuffer => {
                let mut streamer = AudioStreamer::open_path(path, &self.io)?;
                let buffer = PcmBuffer::decode_all(&mut streamer, self.id)?;
                streamer.close();
                info!(
                    "Loaded {} as {}: {} bytes of PCM",
                    path.display(),
                    self.id,
                    buffer.len()
                );
                AssetData::Static(StaticSound {
                    buffer: Arc::new(buffer),
                    bindings: Vec::new(),
                })
            }
            AssetKind::Stream => {
                let engine = StreamingEngine::open(path, &self.io, &self.config, self.id)?;
                AssetData::Stream(engine)
            }
        };

        self.data = data;
        self.path = Some(path.to_path_buf());
        Ok(())
    }

    /// Release the decoded data. Refused while any voice is bound.
    pub fn unload(&mut self) -> Result<()> {
        let ref_count = self.ref_count();
        if ref_count > 0 {
            warn!("Refusing to unload {}: {} voice(s) still bound", self.id, ref_count);
            return Err(Error::StillReferenced { ref_count });
        }
        if matches!(self.data, AssetData::Empty) {
            return Ok(());
        }

        self.data = AssetData::Empty;
        if let Some(path) = self.path.take() {
            debug!("Unloaded {} ({})", self.id, path.display());
        }
        Ok(())
    }

    /// Queue this asset's audio on `voice`. The voice is not started.
    pub fn bind_source(&mut self, voice: Arc<dyn PlaybackVoice>) -> Result<()> {
        match &mut self.data {
            AssetData::Empty => Err(Error::NotLoaded),
            AssetData::Static(sound) => {
                let id = voice.id();
                if sound.bindings.iter().any(|b| b.voice.id() == id) {
                    return Err(Error::AlreadyBound(id));
                }
                voice.submit_buffer(Arc::clone(&sound.buffer))?;
                sound.bindings.push(StaticBinding { voice, base: 0 });
                debug!("Bound voice {} to {}", id, self.id);
                Ok(())
            }
            AssetData::Stream(engine) => engine.bind(voice),
        }
    }

    /// Stop `voice` and detach it from this asset.
    pub fn unbind_source(&mut self, voice: VoiceId) -> Result<()> {
        match &mut self.data {
            AssetData::Empty => Err(Error::NotBound(voice)),
            AssetData::Static(sound) => {
                let index = sound
                    .bindings
                    .iter()
                    .position(|b| b.voice.id() == voice)
                    .ok_or(Error::NotBound(voice))?;
                let binding = sound.bindings.remove(index);
                binding.voice.stop();
                binding.voice.flush_queued();
                debug!("Unbound voice {} from {}", voice, self.id);
                Ok(())
            }
            AssetData::Stream(engine) => engine.unbind(voice),
        }
    }

    /// Refill `voice` if it finished a buffer. Always false for static assets.
    pub fn refill_check(&mut self, voice: VoiceId) -> bool {
        match &mut self.data {
            AssetData::Stream(engine) => engine.refill_check(voice),
            _ => false,
        }
    }

    /// Refill every bound voice. Returns buffers queued.
    pub fn refill_all(&mut self) -> usize {
        match &mut self.data {
            AssetData::Stream(engine) => engine.refill_all(),
            _ => 0,
        }
    }

    /// Stop `voice` and queue the sound from the start.
    pub fn rewind(&mut self, voice: VoiceId) -> Result<()> {
        self.seek_stream(voice, 0)
    }

    /// Stop `voice` and queue the sound from frame `sample_pos`.
    ///
    /// Positions at or past the end restart from 0. Playback is not resumed.
    pub fn seek_stream(&mut self, voice: VoiceId, sample_pos: u64) -> Result<()> {
        match &mut self.data {
            AssetData::Empty => Err(Error::NotBound(voice)),
            AssetData::Static(sound) => {
                let binding = sound
                    .bindings
                    .iter_mut()
                    .find(|b| b.voice.id() == voice)
                    .ok_or(Error::NotBound(voice))?;

                let format = sound.buffer.format();
                let mut byte_pos = sample_pos.saturating_mul(format.block_size() as u64);
                if byte_pos >= sound.buffer.len() as u64 {
                    byte_pos = 0;
                }

                binding.voice.stop();
                binding.voice.flush_queued();
                let buffer = if byte_pos == 0 {
                    Arc::clone(&sound.buffer)
                } else {
                    Arc::new(sound.buffer.tail_from(byte_pos))
                };
                binding.base = buffer.stream_offset();
                binding.voice.submit_buffer(buffer)
            }
            AssetData::Stream(engine) => {
                if sample_pos == 0 {
                    engine.reset_stream(voice)
                } else {
                    engine.seek_stream(voice, sample_pos)
                }
            }
        }
    }

    /// Frames played by `voice` from the start of the sound.
    pub fn sample_position(&self, voice: VoiceId) -> Result<u64> {
        match &self.data {
            AssetData::Empty => Err(Error::NotBound(voice)),
            AssetData::Static(sound) => {
                let binding = sound
                    .bindings
                    .iter()
                    .find(|b| b.voice.id() == voice)
                    .ok_or(Error::NotBound(voice))?;
                let played = binding.base + binding.voice.playback_byte_offset();
                Ok(sound.buffer.format().frames_in(played))
            }
            AssetData::Stream(engine) => engine.sample_position(voice),
        }
    }

    /// Whether nothing is left to queue on `voice`.
    ///
    /// A static sound is queued whole, so this is always true for it.
    pub fn is_end_of_stream(&self, voice: VoiceId) -> bool {
        match &self.data {
            AssetData::Stream(engine) => engine.is_end_of_stream(voice),
            _ => true,
        }
    }

    pub fn is_bound(&self, voice: VoiceId) -> bool {
        match &self.data {
            AssetData::Empty => false,
            AssetData::Static(sound) => sound.bindings.iter().any(|b| b.voice.id() == voice),
            AssetData::Stream(engine) => engine.is_bound(voice),
        }
    }

    /// Number of voices bound to this asset.
    pub fn ref_count(&self) -> usize {
        match &self.data {
            AssetData::Empty => 0,
            AssetData::Static(sound) => sound.bindings.len(),
            AssetData::Stream(engine) => engine.binding_count(),
        }
    }

    pub const fn id(&self) -> AssetId {
        self.id
    }

    pub const fn kind(&self) -> AssetKind {
        self.kind
    }

    pub const fn config(&self) -> &StreamingConfig {
        &self.config
    }

    /// The loaded file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub const fn is_loaded(&self) -> bool {
        !matches!(self.data, AssetData::Empty)
    }

    /// The streaming engine of a loaded stream asset.
    pub const fn engine(&self) -> Option<&StreamingEngine> {
        match &self.data {
            AssetData::Stream(engine) => Some(engine),
            _ => None,
        }
    }

    /// PCM layout of the loaded sound; all zero when empty.
    pub fn format(&self) -> PcmFormat {
        match &self.data {
            AssetData::Empty => PcmFormat::default(),
            AssetData::Static(sound) => sound.buffer.format(),
            AssetData::Stream(engine) => engine.format(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.format().sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.format().channels
    }

    /// Bytes per sample of one channel.
    pub fn sample_width(&self) -> u16 {
        self.format().sample_width
    }

    pub fn sample_bits(&self) -> u32 {
        self.format().bits_per_sample()
    }

    pub fn block_size(&self) -> usize {
        self.format().block_size()
    }

    /// Decoded PCM length in bytes.
    pub fn size_bytes(&self) -> u64 {
        match &self.data {
            AssetData::Empty => 0,
            AssetData::Static(sound) => sound.buffer.len() as u64,
            AssetData::Stream(engine) => engine.size(),
        }
    }

    /// Decoded length in frames.
    pub fn size_samples(&self) -> u64 {
        self.format().frames_in(self.size_bytes())
    }
}

impl Drop for SoundAsset {
    fn drop(&mut self) {
        let ref_count = self.ref_count();
        if ref_count == 0 {
            return;
        }
        warn!("Dropping {} with {} voice(s) still bound", self.id, ref_count);
        if let AssetData::Static(sound) = &mut self.data {
            for binding in sound.bindings.drain(..) {
                binding.voice.stop();
                binding.voice.flush_queued();
            }
        }
    }
}

impl std::fmt::Debug for SoundAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoundAsset")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("path", &self.path)
            .field("ref_count", &self.ref_count())
            .finish_non_exhaustive()
    }
}
