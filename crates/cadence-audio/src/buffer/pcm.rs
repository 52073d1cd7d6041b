//! Fixed-capacity chunks of decoded PCM handed to playback voices.

use cadence_core::{AssetId, Error, PcmFormat, Result};
use tracing::trace;

use crate::streamer::AudioStreamer;

/// One chunk of interleaved PCM plus the layout needed to play it.
///
/// Buffers are filled from an [`AudioStreamer`] and shared with voices through
/// `Arc`; the owner tag names the asset that produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmBuffer {
    data: Vec<u8>,
    capacity: usize,
    format: PcmFormat,
    owner: AssetId,
    stream_offset: u64,
    end_of_stream: bool,
}

impl PcmBuffer {
    /// An empty buffer able to hold `capacity` bytes.
    ///
    /// Allocation failure is reported as [`Error::OutOfMemory`] instead of aborting.
    pub fn with_capacity(capacity: usize, format: PcmFormat, owner: AssetId) -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(capacity)
            .map_err(|_| Error::OutOfMemory(capacity))?;
        Ok(Self {
            data,
            capacity,
            format,
            owner,
            stream_offset: 0,
            end_of_stream: false,
        })
    }

    /// Wrap already decoded bytes.
    pub fn from_pcm(data: Vec<u8>, format: PcmFormat, owner: AssetId) -> Self {
        Self {
            capacity: data.len(),
            data,
            format,
            owner,
            stream_offset: 0,
            end_of_stream: true,
        }
    }

    /// Allocate a buffer and fill it from `streamer` starting at `offset`.
    pub fn decode_from(
        streamer: &mut AudioStreamer,
        capacity: usize,
        owner: AssetId,
        offset: u64,
    ) -> Result<Self> {
        let mut buffer = Self::with_capacity(capacity, streamer.format(), owner)?;
        buffer.fill_from(streamer, offset)?;
        Ok(buffer)
    }

    /// Decode an entire stream into one buffer.
    #[allow(clippy::cast_possible_truncation)]
    pub fn decode_all(streamer: &mut AudioStreamer, owner: AssetId) -> Result<Self> {
        let size = streamer.size() as usize;
        let mut buffer = Self::with_capacity(size, streamer.format(), owner)?;
        streamer.seek(0)?;

        buffer.data.resize(size, 0);
        let mut filled = 0;
        while filled < size {
            let n = streamer.read(&mut buffer.data[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buffer.data.truncate(filled);
        buffer.end_of_stream = true;
        Ok(buffer)
    }

    /// Overwrite this buffer with up to `capacity` bytes read at `offset`,
    /// reusing the existing allocation. Returns the bytes read.
    ///
    /// An `offset` at or past the end yields an empty end-of-stream buffer.
    pub fn fill_from(&mut self, streamer: &mut AudioStreamer, offset: u64) -> Result<usize> {
        self.format = streamer.format();
        self.data.clear();

        if offset >= streamer.size() {
            self.stream_offset = streamer.size();
            self.end_of_stream = true;
            return Ok(0);
        }
        if streamer.position() != offset {
            streamer.seek(offset)?;
        }
        self.stream_offset = streamer.position();

        self.data.resize(self.capacity, 0);
        let n = match streamer.read(&mut self.data) {
            Ok(n) => n,
            Err(e) => {
                self.data.clear();
                return Err(e);
            }
        };
        self.data.truncate(n);
        self.end_of_stream = streamer.is_eos();

        trace!(
            "Filled {} bytes at offset {} for {}",
            n,
            self.stream_offset,
            self.owner
        );
        Ok(n)
    }

    /// The filled bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub const fn format(&self) -> PcmFormat {
        self.format
    }

    pub const fn format_hash(&self) -> u64 {
        self.format.format_hash()
    }

    pub const fn owner(&self) -> AssetId {
        self.owner
    }

    /// Decode-byte offset of the first byte in this buffer.
    pub const fn stream_offset(&self) -> u64 {
        self.stream_offset
    }

    /// Whether the stream had no more data after this chunk.
    pub const fn is_end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    pub fn frames(&self) -> u64 {
        self.format.frames_in(self.data.len() as u64)
    }

    /// A copy of the bytes from `byte_offset` on, rounded down to a frame.
    pub fn tail_from(&self, byte_offset: u64) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let start = (self.format.align_down(byte_offset) as usize).min(self.data.len());
        Self {
            data: self.data[start..].to_vec(),
            capacity: self.data.len() - start,
            format: self.format,
            owner: self.owner,
            stream_offset: self.stream_offset + start as u64,
            end_of_stream: self.end_of_stream,
        }
    }
}
