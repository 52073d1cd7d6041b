//! Playback voices: the queue-of-buffers surface the streaming engine drives.

#[cfg(feature = "cpal")]
pub mod cpal;
pub mod software;

use std::sync::Arc;

use cadence_core::{PcmFormat, Result, VoiceId};
use crossbeam_channel::{Sender, TrySendError};
use tracing::trace;

use crate::buffer::PcmBuffer;

#[cfg(feature = "cpal")]
pub use self::cpal::{CpalBackend, CpalVoice};
pub use software::{SoftwareBackend, SoftwareVoice};

/// Playback state of a voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoiceState {
    /// Created, never played.
    #[default]
    Initial,
    Playing,
    Paused,
    Stopped,
    /// Was playing and ran out of queued audio.
    Starved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceEventKind {
    /// A queued buffer finished playing and can be taken back.
    BufferConsumed,
    /// The voice ran dry while playing.
    Idle,
}

/// Completion notification from a voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceEvent {
    pub voice: VoiceId,
    pub kind: VoiceEventKind,
}

/// Forwards voice events to the refill worker. Never blocks the caller.
#[derive(Debug, Clone)]
pub struct RefillNotifier {
    tx: Sender<VoiceEvent>,
}

impl RefillNotifier {
    pub const fn new(tx: Sender<VoiceEvent>) -> Self {
        Self { tx }
    }

    pub fn notify(&self, voice: VoiceId, kind: VoiceEventKind) {
        match self.tx.try_send(VoiceEvent { voice, kind }) {
            Ok(()) => {}
            // The periodic pass picks it up.
            Err(TrySendError::Full(event)) => trace!("Event queue full, dropped {:?}", event),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// A backend voice consuming queued PCM buffers in order.
pub trait PlaybackVoice: Send + Sync {
    fn id(&self) -> VoiceId;

    /// Append a buffer to the play queue.
    fn submit_buffer(&self, buffer: Arc<PcmBuffer>) -> Result<()>;

    fn play(&self);

    fn pause(&self);

    /// Halt playback. Queued buffers stay attached until flushed.
    fn stop(&self);

    fn state(&self) -> VoiceState;

    /// Detach every queued buffer, played or not.
    fn flush_queued(&self) -> Vec<Arc<PcmBuffer>>;

    /// Buffers attached to the voice, processed ones included.
    fn queued_count(&self) -> usize;

    /// Detach the oldest fully played buffer, if any.
    fn take_processed(&self) -> Option<Arc<PcmBuffer>>;

    /// Bytes played since the oldest buffer still attached to the voice.
    fn playback_byte_offset(&self) -> u64;
}

/// Creates voices.
pub trait PlaybackBackend {
    fn create_voice(&self, format: PcmFormat) -> Result<Arc<dyn PlaybackVoice>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn test_notifier_never_blocks() {
        let (tx, rx) = bounded(1);
        let notifier = RefillNotifier::new(tx);
        let voice = VoiceId::next();

        notifier.notify(voice, VoiceEventKind::BufferConsumed);
        notifier.notify(voice, VoiceEventKind::Idle);
        assert_eq!(rx.len(), 1);
        assert_eq!(
            rx.try_recv().ok(),
            Some(VoiceEvent {
                voice,
                kind: VoiceEventKind::BufferConsumed
            })
        );

        drop(rx);
        notifier.notify(voice, VoiceEventKind::Idle);
    }
}
