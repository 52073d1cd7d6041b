//! Double-buffered streaming of one audio file into any number of voices.
//!
//! Each bound voice gets a binding: its own streamer handle, a
//! front/back pair of queued buffers, and two decode cursors. `base_pos` is
//! the stream offset of the oldest buffer still attached to the voice and
//! `next_pos` is where the next refill reads. Playback position is always
//! `base_pos` plus whatever the voice reports it has played, so callers see a
//! continuous position across buffer swaps.
//!
//! The first buffer of the stream is decoded once and kept for the life of the
//! engine; every load from offset 0 queues it instead of decoding again.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cadence_core::{AssetId, Error, PcmFormat, Result, StreamingConfig, VoiceId};
use tracing::{debug, error, info, trace};

use crate::buffer::PcmBuffer;
use crate::io::IoContext;
use crate::streamer::AudioStreamer;
use crate::voice::{PlaybackVoice, VoiceState};

/// Streams one file to its bound voices.
pub struct StreamingEngine {
    owner: AssetId,
    path: PathBuf,
    io: IoContext,
    buffer_size: usize,
    /// Kept open for the engine's lifetime; supplies size, format and the first buffer.
    streamer: AudioStreamer,
    first_buffer: Arc<PcmBuffer>,
    bindings: Vec<VoiceBinding>,
}

/// Inputs shared by every binding when filling buffers.
struct Fill<'a> {
    first: &'a Arc<PcmBuffer>,
    owner: AssetId,
    capacity: usize,
}

struct VoiceBinding {
    voice: Arc<dyn PlaybackVoice>,
    streamer: AudioStreamer,
    base_pos: u64,
    next_pos: u64,
    front: Option<Arc<PcmBuffer>>,
    back: Option<Arc<PcmBuffer>>,
    busy: bool,
}

impl StreamingEngine {
    /// Open `path` and decode its first buffer.
    pub fn open(
        path: &Path,
        io: &IoContext,
        config: &StreamingConfig,
        owner: AssetId,
    ) -> Result<Self> {
        config.validate()?;
        let mut streamer = AudioStreamer::open_path(path, io)?;
        let first_buffer = Arc::new(PcmBuffer::decode_from(
            &mut streamer,
            config.buffer_size,
            owner,
            0,
        )?);

        info!(
            "Streaming {} for {}: {} bytes of PCM in {} byte buffers",
            path.display(),
            owner,
            streamer.size(),
            config.buffer_size
        );

        Ok(Self {
            owner,
            path: path.to_path_buf(),
            io: io.clone(),
            buffer_size: config.buffer_size,
            streamer,
            first_buffer,
            bindings: Vec::new(),
        })
    }

    /// Attach `voice` and queue the start of the stream on it.
    pub fn bind(&mut self, voice: Arc<dyn PlaybackVoice>) -> Result<()> {
        let id = voice.id();
        if self.is_bound(id) {
            return Err(Error::AlreadyBound(id));
        }

        let streamer = AudioStreamer::open_path(&self.path, &self.io)?;
        let mut binding = VoiceBinding {
            voice,
            streamer,
            base_pos: 0,
            next_pos: 0,
            front: None,
            back: None,
            busy: false,
        };

        let fill = Fill {
            first: &self.first_buffer,
            owner: self.owner,
            capacity: self.buffer_size,
        };
        if let Err(e) = binding.load(0, &fill) {
            binding.clear();
            return Err(e);
        }

        debug!(
            "Bound voice {} to {} ({} buffer(s) queued)",
            id,
            self.owner,
            binding.voice.queued_count()
        );
        self.bindings.push(binding);
        Ok(())
    }

    /// Stop `voice`, detach its buffers and drop its binding.
    pub fn unbind(&mut self, voice: VoiceId) -> Result<()> {
        let index = self
            .bindings
            .iter()
            .position(|b| b.voice.id() == voice)
            .ok_or(Error::NotBound(voice))?;
        let mut binding = self.bindings.remove(index);
        binding.clear();
        debug!("Unbound voice {} from {}", voice, self.owner);
        Ok(())
    }

    /// Refill `voice` if it has finished a buffer. Returns whether a buffer was queued.
    ///
    /// Cheap when there is nothing to do; meant to be called on every tick or event.
    pub fn refill_check(&mut self, voice: VoiceId) -> bool {
        match self.split(voice) {
            Ok((binding, fill)) => binding.refill(&fill),
            Err(_) => false,
        }
    }

    /// Refill every binding until none has a finished buffer. Returns buffers queued.
    pub fn refill_all(&mut self) -> usize {
        let fill = Fill {
            first: &self.first_buffer,
            owner: self.owner,
            capacity: self.buffer_size,
        };
        let mut queued = 0;
        for binding in &mut self.bindings {
            while binding.refill(&fill) {
                queued += 1;
            }
        }
        queued
    }

    /// Stop `voice` and queue the stream from the start.
    pub fn reset_stream(&mut self, voice: VoiceId) -> Result<()> {
        let (binding, fill) = self.split(voice)?;
        binding.reload(0, &fill)
    }

    /// Stop `voice` and queue the stream from frame `sample_pos`.
    ///
    /// A position at or past the end restarts from 0. Playback is not resumed.
    pub fn seek_stream(&mut self, voice: VoiceId, sample_pos: u64) -> Result<()> {
        let size = self.size();
        let block = self.format().block_size() as u64;
        let mut byte_pos = sample_pos.saturating_mul(block);
        if byte_pos >= size {
            byte_pos = 0;
        }
        debug!("Seeking voice {} to frame {} (byte {})", voice, sample_pos, byte_pos);

        let (binding, fill) = self.split(voice)?;
        binding.reload(byte_pos, &fill)
    }

    /// Frames played by `voice` since the start of the stream.
    pub fn sample_position(&self, voice: VoiceId) -> Result<u64> {
        let binding = self.binding(voice).ok_or(Error::NotBound(voice))?;
        let played = binding.base_pos + binding.voice.playback_byte_offset();
        Ok(self.format().frames_in(played))
    }

    /// Whether `voice` has nothing left to decode. True for unbound voices.
    pub fn is_end_of_stream(&self, voice: VoiceId) -> bool {
        self.binding(voice).map_or(true, |b| b.next_pos >= self.size())
    }

    pub fn is_bound(&self, voice: VoiceId) -> bool {
        self.binding(voice).is_some()
    }

    pub fn voices(&self) -> impl Iterator<Item = VoiceId> + '_ {
        self.bindings.iter().map(|b| b.voice.id())
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    pub const fn owner(&self) -> AssetId {
        self.owner
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub const fn format(&self) -> PcmFormat {
        self.streamer.format()
    }

    /// Decoded PCM length in bytes.
    pub const fn size(&self) -> u64 {
        self.streamer.size()
    }

    pub const fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub const fn first_buffer(&self) -> &Arc<PcmBuffer> {
        &self.first_buffer
    }

    fn binding(&self, voice: VoiceId) -> Option<&VoiceBinding> {
        self.bindings.iter().find(|b| b.voice.id() == voice)
    }

    /// Borrow one binding mutably alongside the shared fill inputs.
    fn split(&mut self, voice: VoiceId) -> Result<(&mut VoiceBinding, Fill<'_>)> {
        let fill = Fill {
            first: &self.first_buffer,
            owner: self.owner,
            capacity: self.buffer_size,
        };
        let binding = self
            .bindings
            .iter_mut()
            .find(|b| b.voice.id() == voice)
            .ok_or(Error::NotBound(voice))?;
        Ok((binding, fill))
    }
}

impl Drop for StreamingEngine {
    fn drop(&mut self) {
        for binding in &mut self.bindings {
            binding.clear();
        }
        if !self.bindings.is_empty() {
            debug!("Force-stopped {} voice(s) of {}", self.bindings.len(), self.owner);
        }
    }
}

impl VoiceBinding {
    /// Queue one buffer at `pos`, or two if more than one buffer's worth remains.
    fn load(&mut self, pos: u64, fill: &Fill<'_>) -> Result<()> {
        let size = self.streamer.size();
        let count = if size.saturating_sub(pos) > fill.capacity as u64 { 2 } else { 1 };

        self.base_pos = pos;
        self.next_pos = pos;
        for _ in 0..count {
            if self.next_pos >= size {
                break;
            }
            let buffer = self.decode_at(self.next_pos, fill)?;
            if buffer.is_empty() {
                self.next_pos = size;
                break;
            }
            self.next_pos += buffer.len() as u64;
            self.voice.submit_buffer(Arc::clone(&buffer))?;
            self.store(buffer);
        }
        Ok(())
    }

    /// Stop, detach everything and load again from `pos`.
    fn reload(&mut self, pos: u64, fill: &Fill<'_>) -> Result<()> {
        if self.busy {
            debug!("Voice {} is mid-refill, skipping reload", self.voice.id());
            return Ok(());
        }
        self.busy = true;
        self.clear();
        let result = self.load(pos, fill);
        self.busy = false;
        result
    }

    fn decode_at(&mut self, pos: u64, fill: &Fill<'_>) -> Result<Arc<PcmBuffer>> {
        if pos == 0 {
            return Ok(Arc::clone(fill.first));
        }
        let buffer = PcmBuffer::decode_from(&mut self.streamer, fill.capacity, fill.owner, pos)?;
        Ok(Arc::new(buffer))
    }

    fn store(&mut self, buffer: Arc<PcmBuffer>) {
        if self.front.is_none() {
            self.front = Some(buffer);
        } else {
            self.back = Some(buffer);
        }
    }

    fn refill(&mut self, fill: &Fill<'_>) -> bool {
        if self.busy || self.next_pos >= self.streamer.size() {
            return false;
        }
        let Some(consumed) = self.voice.take_processed() else {
            return false;
        };

        self.busy = true;
        let refilled = self.refill_from(consumed, fill);
        self.busy = false;
        refilled
    }

    fn refill_from(&mut self, consumed: Arc<PcmBuffer>, fill: &Fill<'_>) -> bool {
        let size = self.streamer.size();
        let id = self.voice.id();

        // The played buffer leaves the front slot; the back one is playing now.
        self.base_pos += consumed.len() as u64;
        drop(self.front.take());
        self.front = self.back.take();

        let reusable = if Arc::ptr_eq(&consumed, fill.first) {
            None
        } else {
            Arc::try_unwrap(consumed).ok()
        };
        let decoded = match reusable {
            Some(mut buffer) => buffer
                .fill_from(&mut self.streamer, self.next_pos)
                .map(|_| buffer),
            None => PcmBuffer::decode_from(
                &mut self.streamer,
                fill.capacity,
                fill.owner,
                self.next_pos,
            ),
        };

        let buffer = match decoded {
            Ok(buffer) => buffer,
            Err(e) => {
                error!("Refill of voice {} at byte {} failed: {e}", id, self.next_pos);
                return false;
            }
        };
        if buffer.is_empty() {
            self.next_pos = size;
            return false;
        }

        self.next_pos += buffer.len() as u64;
        let buffer = Arc::new(buffer);
        if let Err(e) = self.voice.submit_buffer(Arc::clone(&buffer)) {
            error!("Voice {} rejected refill: {e}", id);
            return false;
        }
        self.store(buffer);

        if self.voice.state() == VoiceState::Starved {
            debug!("Voice {} ran dry, restarting", id);
            self.voice.play();
        }
        trace!("Refilled voice {}: base {} next {}", id, self.base_pos, self.next_pos);
        true
    }

    /// Stop the voice and detach every buffer it holds.
    fn clear(&mut self) {
        self.voice.stop();
        let flushed = self.voice.flush_queued();
        trace!("Flushed {} buffer(s) from voice {}", flushed.len(), self.voice.id());
        self.front = None;
        self.back = None;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;
    use crate::decode::DecoderProvider;
    use crate::test_support::{init_tracing, memory_io, wav_io, ScriptedProvider, STEREO16};
    use crate::voice::SoftwareVoice;

    const CAP: usize = 65_536;

    fn engine(pcm_len: usize, buffer_size: usize) -> (StreamingEngine, Vec<u8>) {
        init_tracing();
        let (io, pcm) = wav_io("s.wav", STEREO16, pcm_len);
        let config = StreamingConfig::default().with_buffer_size(buffer_size);
        let engine =
            StreamingEngine::open(Path::new("s.wav"), &io, &config, AssetId::next()).unwrap();
        (engine, pcm)
    }

    fn voice() -> (Arc<SoftwareVoice>, Arc<dyn PlaybackVoice>) {
        let voice = Arc::new(SoftwareVoice::new(STEREO16));
        let dyn_voice: Arc<dyn PlaybackVoice> = voice.clone();
        (voice, dyn_voice)
    }

    /// Render the whole stream in `chunk` byte pieces, refilling as a worker would.
    fn drain(engine: &mut StreamingEngine, voice: &SoftwareVoice, chunk: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut scratch = vec![0u8; chunk];
        voice.play();
        loop {
            let n = voice.render(&mut scratch);
            out.extend_from_slice(&scratch[..n]);
            engine.refill_check(voice.id());
            if n == 0
                && voice.state() == VoiceState::Starved
                && engine.is_end_of_stream(voice.id())
            {
                break;
            }
        }
        out
    }

    #[test]
    fn test_short_stream_queues_one_buffer() {
        let (mut engine, _) = engine(40_000, CAP);
        let (sw, v) = voice();
        engine.bind(v).unwrap();

        assert_eq!(sw.queued_count(), 1);
        assert!(engine.is_end_of_stream(sw.id()));
        assert_eq!(engine.binding(sw.id()).unwrap().next_pos, engine.size());
    }

    #[test]
    fn test_long_stream_queues_two_buffers() {
        let (mut engine, _) = engine(200_000, CAP);
        let (sw, v) = voice();
        engine.bind(v).unwrap();

        assert_eq!(sw.queued_count(), 2);
        assert_eq!(engine.binding(sw.id()).unwrap().next_pos, 2 * CAP as u64);
        assert!(!engine.is_end_of_stream(sw.id()));
        let front = engine.binding(sw.id()).unwrap().front.as_ref().unwrap();
        assert!(Arc::ptr_eq(front, engine.first_buffer()));
    }

    #[test]
    fn test_busy_binding_skips_refill_and_reload() {
        let (mut engine, _) = engine(300_000, CAP);
        let (sw, v) = voice();
        engine.bind(v).unwrap();
        sw.play();
        sw.advance(70_000);

        let id = sw.id();
        let next_before = engine.binding(id).unwrap().next_pos;
        let queued_before = sw.queued_count();
        engine.bindings[0].busy = true;

        assert!(!engine.refill_check(id));
        engine.seek_stream(id, 10_000).unwrap();
        engine.reset_stream(id).unwrap();
        assert_eq!(engine.binding(id).unwrap().next_pos, next_before);
        assert_eq!(engine.binding(id).unwrap().next_pos, 2 * CAP as u64);
        assert_eq!(sw.queued_count(), queued_before);
        assert_eq!(sw.state(), VoiceState::Playing);

        engine.bindings[0].busy = false;
        assert!(engine.refill_check(id));
        assert_eq!(engine.binding(id).unwrap().next_pos, 3 * CAP as u64);
    }

    #[test]
    fn test_bind_twice_rejected() {
        let (mut engine, _) = engine(1_000, CAP);
        let (sw, v) = voice();
        engine.bind(Arc::clone(&v)).unwrap();
        assert!(matches!(engine.bind(v), Err(Error::AlreadyBound(id)) if id == sw.id()));
    }

    #[test]
    fn test_refill_without_finished_buffer_is_noop() {
        let (mut engine, _) = engine(300_000, CAP);
        let (sw, v) = voice();
        engine.bind(v).unwrap();

        assert!(!engine.refill_check(sw.id()));
        sw.play();
        sw.advance(1_000);
        assert!(!engine.refill_check(sw.id()));
        assert!(!engine.refill_check(VoiceId::next()));
    }

    #[test]
    fn test_refill_swaps_and_advances() {
        let (mut engine, pcm) = engine(300_000, CAP);
        let (sw, v) = voice();
        engine.bind(v).unwrap();
        sw.play();

        assert_eq!(sw.advance(CAP + 400), CAP + 400);
        assert!(engine.refill_check(sw.id()));
        let binding = engine.binding(sw.id()).unwrap();
        assert_eq!(binding.base_pos, CAP as u64);
        assert_eq!(binding.next_pos, 3 * CAP as u64);
        assert_eq!(binding.back.as_ref().unwrap().stream_offset(), 2 * CAP as u64);
        assert_eq!(sw.queued_count(), 2);

        // position is continuous across the swap
        assert_eq!(engine.sample_position(sw.id()).unwrap(), (CAP as u64 + 400) / 4);

        let mut out = vec![0u8; 100];
        sw.render(&mut out);
        assert_eq!(out, pcm[CAP + 400..CAP + 500]);
    }

    #[test]
    fn test_whole_stream_plays_in_order() {
        let (mut engine, pcm) = engine(50_000, 4_096);
        let (sw, v) = voice();
        engine.bind(v).unwrap();

        let played = drain(&mut engine, &sw, 1_500);
        assert_eq!(played.len(), pcm.len());
        assert_eq!(played, pcm);
        assert!(engine.is_end_of_stream(sw.id()));
        assert_eq!(engine.sample_position(sw.id()).unwrap(), 50_000 / 4);
    }

    #[test]
    fn test_starved_voice_is_restarted() {
        let (mut engine, _) = engine(40_000, 4_096);
        let (sw, v) = voice();
        engine.bind(v).unwrap();
        sw.play();

        sw.advance(100_000);
        assert_eq!(sw.state(), VoiceState::Starved);
        assert!(engine.refill_check(sw.id()));
        assert_eq!(sw.state(), VoiceState::Playing);
        assert_eq!(engine.refill_all(), 1);
    }

    #[test]
    fn test_seek_to_zero_after_advancing() {
        let (mut engine, pcm) = engine(300_000, CAP);
        let (sw, v) = voice();
        engine.bind(v).unwrap();
        sw.play();
        sw.advance(CAP * 2);
        engine.refill_all();

        engine.seek_stream(sw.id(), 0).unwrap();
        assert_eq!(engine.sample_position(sw.id()).unwrap(), 0);
        assert!(!engine.is_end_of_stream(sw.id()));
        assert_eq!(sw.state(), VoiceState::Stopped);
        assert_eq!(sw.queued_count(), 2);

        sw.play();
        let mut out = vec![0u8; 64];
        sw.render(&mut out);
        assert_eq!(out, pcm[..64]);
    }

    #[test]
    fn test_seek_mid_stream_and_past_end() {
        let (mut engine, pcm) = engine(300_000, CAP);
        let (sw, v) = voice();
        engine.bind(v).unwrap();

        engine.seek_stream(sw.id(), 50_000).unwrap();
        assert_eq!(engine.sample_position(sw.id()).unwrap(), 50_000);
        sw.play();
        let mut out = vec![0u8; 16];
        sw.render(&mut out);
        assert_eq!(out, pcm[200_000..200_016]);

        // 75 000 frames is exactly the end
        engine.seek_stream(sw.id(), 75_000).unwrap();
        assert_eq!(engine.sample_position(sw.id()).unwrap(), 0);
    }

    #[test]
    fn test_seek_into_last_buffer_queues_one() {
        let (mut engine, _) = engine(300_000, CAP);
        let (sw, v) = voice();
        engine.bind(v).unwrap();

        engine.seek_stream(sw.id(), 70_000).unwrap();
        assert_eq!(sw.queued_count(), 1);
        assert!(engine.is_end_of_stream(sw.id()));
    }

    #[test]
    fn test_reset_after_end_of_stream() {
        let (mut engine, pcm) = engine(20_000, 4_096);
        let (sw, v) = voice();
        engine.bind(v).unwrap();
        drain(&mut engine, &sw, 4_000);
        assert!(engine.is_end_of_stream(sw.id()));

        engine.reset_stream(sw.id()).unwrap();
        assert!(!engine.is_end_of_stream(sw.id()));
        let replay = drain(&mut engine, &sw, 4_000);
        assert_eq!(replay, pcm);
    }

    #[test]
    fn test_unbind_stops_and_flushes() {
        let (mut engine, _) = engine(300_000, CAP);
        let (sw, v) = voice();
        engine.bind(v).unwrap();
        sw.play();

        engine.unbind(sw.id()).unwrap();
        assert_eq!(sw.state(), VoiceState::Stopped);
        assert_eq!(sw.queued_count(), 0);
        assert_eq!(engine.binding_count(), 0);
        assert!(engine.is_end_of_stream(sw.id()));
        assert!(engine.unbind(sw.id()).unwrap_err().is_not_bound());
        assert!(engine.sample_position(sw.id()).unwrap_err().is_not_bound());
        assert_eq!(Arc::strong_count(engine.first_buffer()), 1);
    }

    #[test]
    fn test_voices_stream_independently() {
        let (mut engine, pcm) = engine(30_000, 4_096);
        let (a, va) = voice();
        let (b, vb) = voice();
        engine.bind(va).unwrap();
        engine.bind(vb).unwrap();

        a.play();
        a.advance(6_000);
        assert!(engine.refill_check(a.id()));

        assert_eq!(engine.sample_position(b.id()).unwrap(), 0);
        let played = drain(&mut engine, &b, 3_000);
        assert_eq!(played, pcm);
        assert_eq!(engine.sample_position(a.id()).unwrap(), 1_500);
    }

    #[test]
    fn test_empty_stream() {
        let (mut engine, _) = engine(0, CAP);
        let (sw, v) = voice();
        engine.bind(v).unwrap();
        assert_eq!(sw.queued_count(), 0);
        assert!(engine.is_end_of_stream(sw.id()));

        engine.seek_stream(sw.id(), 10).unwrap();
        assert_eq!(engine.sample_position(sw.id()).unwrap(), 0);
    }

    #[test]
    fn test_decode_failure_stalls_voice() {
        init_tracing();
        let pcm = crate::test_support::pattern(40_000);
        let provider: Arc<dyn DecoderProvider> =
            Arc::new(ScriptedProvider::new(STEREO16, pcm, usize::MAX).failing_at(12_288));
        let (fs, io) = memory_io(Some(provider));
        fs.insert("s.ogg", b"OggS".to_vec());

        let config = StreamingConfig::default().with_buffer_size(4_096);
        let mut engine =
            StreamingEngine::open(Path::new("s.ogg"), &io, &config, AssetId::next()).unwrap();
        let (sw, v) = voice();
        engine.bind(v).unwrap();
        sw.play();

        sw.advance(4_096);
        assert!(engine.refill_check(sw.id()), "8192..12288 decodes");
        sw.advance(4_096);
        assert!(!engine.refill_check(sw.id()), "12288.. fails");
        assert!(!engine.is_end_of_stream(sw.id()));
        assert_eq!(engine.binding(sw.id()).unwrap().next_pos, 12_288);
    }
}
