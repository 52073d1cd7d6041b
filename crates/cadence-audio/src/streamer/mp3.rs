//! MPEG layer III streamer on top of a [`PcmDecoder`].

use std::path::Path;
use std::sync::Arc;

use cadence_core::{AudioFileFormat, Error, Result};
use tracing::{debug, trace, warn};

use super::{decoded_state, open_decoder, StreamState};
use crate::decode::{DecoderProvider, PcmDecoder};
use crate::io::FileSystem;

/// Streams PCM decoded from an MP3 file.
///
/// Sample width follows the decoder's output encoding.
pub struct Mp3Streamer {
    fs: Arc<dyn FileSystem>,
    provider: Option<Arc<dyn DecoderProvider>>,
    decoder: Option<Box<dyn PcmDecoder>>,
    state: StreamState,
}

impl Mp3Streamer {
    pub fn new(fs: Arc<dyn FileSystem>, provider: Option<Arc<dyn DecoderProvider>>) -> Self {
        Self {
            fs,
            provider,
            decoder: None,
            state: StreamState::default(),
        }
    }

    pub fn open(&mut self, path: &Path) -> Result<()> {
        if self.decoder.is_some() {
            return Err(Error::AlreadyOpen);
        }
        if self.provider.is_none() {
            warn!("No MP3 decoder available for {}", path.display());
        }

        let decoder = open_decoder(
            self.fs.as_ref(),
            self.provider.as_ref(),
            path,
            AudioFileFormat::Mp3,
        )?;
        let width = decoder.format().encoding.sample_size();
        let state = decoded_state(decoder.as_ref(), width, path)?;

        debug!(
            "Opened MP3 {}: {} Hz, {} ch, {} bytes of PCM",
            path.display(),
            state.format.sample_rate,
            state.format.channels,
            state.size
        );

        self.decoder = Some(decoder);
        self.state = state;
        Ok(())
    }

    /// One decoder call per read; near the end it may produce fewer bytes than asked.
    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Ok(0);
        };
        let len = self.state.read_len(dst.len());
        if len == 0 {
            return Ok(0);
        }
        let n = decoder.read(&mut dst[..len])?.min(len);
        self.state.position += n as u64;
        Ok(n)
    }

    pub fn seek(&mut self, byte_pos: u64) -> Result<u64> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Ok(0);
        };
        let target = self.state.seek_target(byte_pos);
        decoder.seek_to_frame(self.state.format.frames_in(target))?;
        self.state.position = target;
        Ok(target)
    }

    pub fn close(&mut self) {
        if self.decoder.take().is_some() {
            trace!("Closed MP3 stream");
        }
        self.state = StreamState::default();
    }

    pub const fn state(&self) -> &StreamState {
        &self.state
    }

    pub const fn is_open(&self) -> bool {
        self.decoder.is_some()
    }
}
