//! Sequential, block-aligned PCM access to WAV, MP3 and Ogg Vorbis files.
//!
//! An [`AudioStreamer`] is chosen once per file by the sniffer and then driven
//! through `open` / `read` / `seek` / `close`. Every read and seek lands on a
//! whole frame; seeking at or past the end of the stream rewinds to zero.

mod mp3;
mod ogg;
mod wav;

use std::path::Path;
use std::sync::Arc;

use cadence_core::{AudioFileFormat, Error, PcmFormat, Result};
use tracing::debug;

pub use mp3::Mp3Streamer;
pub use ogg::OggStreamer;
pub use wav::WavStreamer;

use crate::decode::{DecoderProvider, PcmDecoder};
use crate::io::{FileSystem, IoContext};
use crate::sniff;

/// Size and cursor of an open stream, in decoded PCM bytes.
///
/// A closed streamer holds the all-zero value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamState {
    pub size: u64,
    pub position: u64,
    pub format: PcmFormat,
}

impl StreamState {
    pub const fn new(format: PcmFormat, size: u64) -> Self {
        Self {
            size,
            position: 0,
            format,
        }
    }

    pub const fn remaining(&self) -> u64 {
        self.size.saturating_sub(self.position)
    }

    pub const fn is_eos(&self) -> bool {
        self.position >= self.size
    }

    /// Bytes the next read may produce into a destination of `max` bytes.
    #[allow(clippy::cast_possible_truncation)]
    pub fn read_len(&self, max: usize) -> usize {
        let cap = (max as u64).min(self.remaining());
        self.format.align_down(cap) as usize
    }

    /// Where a seek to `pos` lands.
    pub const fn seek_target(&self, pos: u64) -> u64 {
        if pos >= self.size {
            0
        } else {
            self.format.align_down(pos)
        }
    }
}

/// A PCM source over one audio file.
pub enum AudioStreamer {
    Wav(WavStreamer),
    Mp3(Mp3Streamer),
    Ogg(OggStreamer),
}

impl AudioStreamer {
    /// An unopened streamer for `format`, or `None` for [`AudioFileFormat::Unknown`].
    pub fn for_format(format: AudioFileFormat, io: &IoContext) -> Option<Self> {
        let fs = Arc::clone(io.fs());
        let decoders = io.decoders();
        match format {
            AudioFileFormat::Wav => Some(Self::Wav(WavStreamer::new(fs))),
            AudioFileFormat::Mp3 => Some(Self::Mp3(Mp3Streamer::new(
                fs,
                decoders.get(format).cloned(),
            ))),
            AudioFileFormat::Ogg => Some(Self::Ogg(OggStreamer::new(
                fs,
                decoders.get(format).cloned(),
            ))),
            AudioFileFormat::Unknown => None,
        }
    }

    /// Sniff `path` and build the matching, unopened streamer.
    pub fn for_path(path: &Path, io: &IoContext) -> Result<Self> {
        let format = sniff::classify(path, io.fs().as_ref());
        debug!("Sniffed {} as {:?}", path.display(), format);
        Self::for_format(format, io).ok_or_else(|| Error::FormatUnrecognized(path.to_path_buf()))
    }

    /// Sniff, build and open in one step.
    pub fn open_path(path: &Path, io: &IoContext) -> Result<Self> {
        let mut streamer = Self::for_path(path, io)?;
        streamer.open(path)?;
        Ok(streamer)
    }

    /// Open `path`. Fails with [`Error::AlreadyOpen`] if a file is already open.
    pub fn open(&mut self, path: &Path) -> Result<()> {
        match self {
            Self::Wav(s) => s.open(path),
            Self::Mp3(s) => s.open(path),
            Self::Ogg(s) => s.open(path),
        }
    }

    /// Decode up to `dst.len()` bytes, rounded down to whole frames.
    ///
    /// Returns `Ok(0)` at end of stream without touching `dst`.
    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        match self {
            Self::Wav(s) => s.read(dst),
            Self::Mp3(s) => s.read(dst),
            Self::Ogg(s) => s.read(dst),
        }
    }

    /// Move the cursor to `byte_pos` rounded down to a frame, or to 0 if
    /// `byte_pos` is at or past the end. Returns the new position.
    pub fn seek(&mut self, byte_pos: u64) -> Result<u64> {
        match self {
            Self::Wav(s) => s.seek(byte_pos),
            Self::Mp3(s) => s.seek(byte_pos),
            Self::Ogg(s) => s.seek(byte_pos),
        }
    }

    /// Release the file and zero all fields. Closing twice is harmless.
    pub fn close(&mut self) {
        match self {
            Self::Wav(s) => s.close(),
            Self::Mp3(s) => s.close(),
            Self::Ogg(s) => s.close(),
        }
    }

    pub fn reset(&mut self) -> Result<u64> {
        self.seek(0)
    }

    pub const fn state(&self) -> &StreamState {
        match self {
            Self::Wav(s) => s.state(),
            Self::Mp3(s) => s.state(),
            Self::Ogg(s) => s.state(),
        }
    }

    pub const fn file_format(&self) -> AudioFileFormat {
        match self {
            Self::Wav(_) => AudioFileFormat::Wav,
            Self::Mp3(_) => AudioFileFormat::Mp3,
            Self::Ogg(_) => AudioFileFormat::Ogg,
        }
    }

    pub const fn is_open(&self) -> bool {
        match self {
            Self::Wav(s) => s.is_open(),
            Self::Mp3(s) => s.is_open(),
            Self::Ogg(s) => s.is_open(),
        }
    }

    pub const fn is_eos(&self) -> bool {
        self.state().is_eos()
    }

    /// Decoded PCM length in bytes.
    pub const fn size(&self) -> u64 {
        self.state().size
    }

    pub const fn position(&self) -> u64 {
        self.state().position
    }

    pub const fn format(&self) -> PcmFormat {
        self.state().format
    }

    pub const fn sample_rate(&self) -> u32 {
        self.state().format.sample_rate
    }

    pub const fn channels(&self) -> u16 {
        self.state().format.channels
    }

    pub const fn sample_width(&self) -> u16 {
        self.state().format.sample_width
    }

    pub const fn block_size(&self) -> usize {
        self.state().format.block_size()
    }
}

/// Open `path` through `provider`, mapping decoder failures to [`Error::OpenFailed`].
fn open_decoder(
    fs: &dyn FileSystem,
    provider: Option<&Arc<dyn DecoderProvider>>,
    path: &Path,
    format: AudioFileFormat,
) -> Result<Box<dyn PcmDecoder>> {
    let provider = provider.ok_or(Error::DecoderUnavailable(format))?;
    let handle = fs.open(path)?;
    provider
        .open(handle, format)
        .map_err(|e| Error::open_failed(path, e.to_string()))
}

/// Stream state for a freshly opened decoder whose samples are `sample_width` bytes wide.
fn decoded_state(decoder: &dyn PcmDecoder, sample_width: u16, path: &Path) -> Result<StreamState> {
    let decoded = decoder.format();
    let format = PcmFormat::new(decoded.sample_rate, decoded.channels, sample_width);
    if !format.is_valid() {
        return Err(Error::open_failed(path, format!("unusable PCM layout {format:?}")));
    }
    let size = decoder.total_frames() * format.block_size() as u64;
    Ok(StreamState::new(format, size))
}
