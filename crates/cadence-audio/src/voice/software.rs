//! In-process voice: a buffer queue drained by whoever pulls PCM from it.
//!
//! The cpal backend pulls from its audio callback; tests and offline
//! renderers call [`SoftwareVoice::render`] or [`SoftwareVoice::advance`] directly.

use std::collections::VecDeque;
use std::sync::Arc;

use cadence_core::{Error, PcmFormat, Result, VoiceId};
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{PlaybackBackend, PlaybackVoice, RefillNotifier, VoiceEventKind, VoiceState};
use crate::buffer::PcmBuffer;

#[derive(Default)]
struct VoiceQueue {
    pending: VecDeque<Arc<PcmBuffer>>,
    processed: VecDeque<Arc<PcmBuffer>>,
    /// Bytes of the head pending buffer already played.
    head_offset: usize,
    /// Total length of the buffers in `processed`.
    processed_bytes: u64,
    state: VoiceState,
}

/// A voice whose queue is consumed in software.
pub struct SoftwareVoice {
    id: VoiceId,
    format: PcmFormat,
    queue: Mutex<VoiceQueue>,
    notifier: Option<RefillNotifier>,
}

impl SoftwareVoice {
    pub fn new(format: PcmFormat) -> Self {
        Self {
            id: VoiceId::next(),
            format,
            queue: Mutex::new(VoiceQueue::default()),
            notifier: None,
        }
    }

    /// A voice reporting consumed buffers and underruns to `notifier`.
    pub fn with_notifier(format: PcmFormat, notifier: RefillNotifier) -> Self {
        Self {
            notifier: Some(notifier),
            ..Self::new(format)
        }
    }

    pub const fn format(&self) -> PcmFormat {
        self.format
    }

    /// Copy up to `out.len()` queued bytes into `out`. Returns the bytes written;
    /// the rest of `out` is left as it was.
    pub fn render(&self, out: &mut [u8]) -> usize {
        let len = out.len();
        self.consume(len, Some(out))
    }

    /// Play `bytes` bytes without copying them anywhere.
    pub fn advance(&self, bytes: usize) -> usize {
        self.consume(bytes, None)
    }

    fn consume(&self, len: usize, mut out: Option<&mut [u8]>) -> usize {
        let mut events = Vec::new();
        let mut done = 0;

        {
            let mut guard = self.queue.lock();
            let q = &mut *guard;
            if q.state != VoiceState::Playing {
                return 0;
            }

            while done < len {
                let Some(head) = q.pending.front() else {
                    q.state = VoiceState::Starved;
                    events.push(VoiceEventKind::Idle);
                    break;
                };

                let n = (head.len() - q.head_offset).min(len - done);
                if let Some(out) = out.as_deref_mut() {
                    let start = q.head_offset;
                    out[done..done + n].copy_from_slice(&head.bytes()[start..start + n]);
                }
                done += n;
                q.head_offset += n;

                if q.head_offset >= head.len() {
                    if let Some(finished) = q.pending.pop_front() {
                        q.processed_bytes += finished.len() as u64;
                        q.processed.push_back(finished);
                    }
                    q.head_offset = 0;
                    events.push(VoiceEventKind::BufferConsumed);
                }
            }
        }

        if let Some(notifier) = &self.notifier {
            for kind in events {
                notifier.notify(self.id, kind);
            }
        }
        done
    }
}

impl PlaybackVoice for SoftwareVoice {
    fn id(&self) -> VoiceId {
        self.id
    }

    fn submit_buffer(&self, buffer: Arc<PcmBuffer>) -> Result<()> {
        if buffer.format_hash() != self.format.format_hash() {
            return Err(Error::AudioOutput(format!(
                "Voice {} plays {:?}, buffer is {:?}",
                self.id,
                self.format,
                buffer.format()
            )));
        }
        trace!("Voice {} queued {} bytes", self.id, buffer.len());
        self.queue.lock().pending.push_back(buffer);
        Ok(())
    }

    fn play(&self) {
        self.queue.lock().state = VoiceState::Playing;
    }

    fn pause(&self) {
        let mut q = self.queue.lock();
        if matches!(q.state, VoiceState::Playing | VoiceState::Starved) {
            q.state = VoiceState::Paused;
        }
    }

    fn stop(&self) {
        let mut q = self.queue.lock();
        q.state = VoiceState::Stopped;
        q.head_offset = 0;
    }

    fn state(&self) -> VoiceState {
        self.queue.lock().state
    }

    fn flush_queued(&self) -> Vec<Arc<PcmBuffer>> {
        let mut q = self.queue.lock();
        q.head_offset = 0;
        q.processed_bytes = 0;
        let q = &mut *q;
        q.processed.drain(..).chain(q.pending.drain(..)).collect()
    }

    fn queued_count(&self) -> usize {
        let q = self.queue.lock();
        q.pending.len() + q.processed.len()
    }

    fn take_processed(&self) -> Option<Arc<PcmBuffer>> {
        let mut q = self.queue.lock();
        let buffer = q.processed.pop_front()?;
        q.processed_bytes -= buffer.len() as u64;
        Some(buffer)
    }

    fn playback_byte_offset(&self) -> u64 {
        let q = self.queue.lock();
        q.processed_bytes + q.head_offset as u64
    }
}

/// Hands out [`SoftwareVoice`]s sharing one notifier.
#[derive(Debug, Clone, Default)]
pub struct SoftwareBackend {
    notifier: Option<RefillNotifier>,
}

impl SoftwareBackend {
    pub const fn new() -> Self {
        Self { notifier: None }
    }

    pub const fn with_notifier(notifier: RefillNotifier) -> Self {
        Self {
            notifier: Some(notifier),
        }
    }

    /// Like [`PlaybackBackend::create_voice`], keeping the concrete type.
    pub fn create_software_voice(&self, format: PcmFormat) -> Result<Arc<SoftwareVoice>> {
        if !format.is_valid() {
            return Err(Error::AudioOutput(format!("Cannot play {format:?}")));
        }
        let voice = match &self.notifier {
            Some(notifier) => SoftwareVoice::with_notifier(format, notifier.clone()),
            None => SoftwareVoice::new(format),
        };
        debug!("Created software voice {}", voice.id);
        Ok(Arc::new(voice))
    }
}

impl PlaybackBackend for SoftwareBackend {
    fn create_voice(&self, format: PcmFormat) -> Result<Arc<dyn PlaybackVoice>> {
        let voice: Arc<dyn PlaybackVoice> = self.create_software_voice(format)?;
        Ok(voice)
    }
}
