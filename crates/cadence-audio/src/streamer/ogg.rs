//! Ogg Vorbis streamer on top of a [`PcmDecoder`]. Output is always 16-bit.

use std::path::Path;
use std::sync::Arc;

use cadence_core::{AudioFileFormat, Error, Result};
use tracing::{debug, trace, warn};

use super::{decoded_state, open_decoder, StreamState};
use crate::decode::{DecoderProvider, PcmDecoder};
use crate::io::FileSystem;

const SAMPLE_WIDTH: u16 = 2;

/// Streams PCM decoded from an Ogg Vorbis file.
pub struct OggStreamer {
    fs: Arc<dyn FileSystem>,
    provider: Option<Arc<dyn DecoderProvider>>,
    decoder: Option<Box<dyn PcmDecoder>>,
    state: StreamState,
}

impl OggStreamer {
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
            warn!("No Ogg Vorbis decoder available for {}", path.display());
        }

        let decoder = open_decoder(
            self.fs.as_ref(),
            self.provider.as_ref(),
            path,
            AudioFileFormat::Ogg,
        )?;
        let state = decoded_state(decoder.as_ref(), SAMPLE_WIDTH, path)?;

        debug!(
            "Opened Ogg {}: {} Hz, {} ch, {} bytes of PCM",
            path.display(),
            state.format.sample_rate,
            state.format.channels,
            state.size
        );

        self.decoder = Some(decoder);
        self.state = state;
        Ok(())
    }

    /// Vorbis hands out at most one packet per call, so keep pulling until
    /// the aligned request is filled or the decoder reports end of stream.
    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Ok(0);
        };
        let len = self.state.read_len(dst.len());
        let mut filled = 0;
        while filled < len {
            let n = decoder.read(&mut dst[filled..len])?;
            if n == 0 {
                break;
            }
            filled += n.min(len - filled);
        }
        self.state.position += filled as u64;
        Ok(filled)
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
            trace!("Closed Ogg stream");
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
