//! Fixtures shared by unit tests: WAV builders, a scripted decoder, and in-memory I/O.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::path::Path;
use std::sync::Arc;

use cadence_core::{AudioFileFormat, Error, PcmFormat, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::decode::{DecodedFormat, DecoderProvider, DecoderRegistry, PcmDecoder, SampleEncoding};
use crate::io::{FileHandle, IoContext, MemoryFileSystem};

pub const STEREO16: PcmFormat = PcmFormat::new(44_100, 2, 2);

/// Install a test subscriber once; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Deterministic PCM ramp so misplaced bytes show up in comparisons.
pub fn pattern(len: usize) -> Vec<u8> {
    #[allow(clippy::cast_possible_truncation)]
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// A canonical RIFF/WAVE file, with `extra` chunks placed between `fmt ` and `data`.
pub fn wav_with_chunks(format: PcmFormat, pcm: &[u8], extra: &[(&[u8; 4], &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(b"WAVE");

    body.extend_from_slice(b"fmt ");
    body.extend_from_slice(&16u32.to_le_bytes());
    body.extend_from_slice(&1u16.to_le_bytes());
    body.extend_from_slice(&format.channels.to_le_bytes());
    body.extend_from_slice(&format.sample_rate.to_le_bytes());
    #[allow(clippy::cast_possible_truncation)]
    let block = format.block_size() as u32;
    body.extend_from_slice(&(format.sample_rate * block).to_le_bytes());
    #[allow(clippy::cast_possible_truncation)]
    body.extend_from_slice(&(block as u16).to_le_bytes());
    #[allow(clippy::cast_possible_truncation)]
    body.extend_from_slice(&(format.bits_per_sample() as u16).to_le_bytes());

    for (id, data) in extra {
        body.extend_from_slice(*id);
        #[allow(clippy::cast_possible_truncation)]
        body.extend_from_slice(&(data.len() as u32).to_le_bytes());
        body.extend_from_slice(data);
        if data.len() % 2 == 1 {
            body.push(0);
        }
    }

    body.extend_from_slice(b"data");
    #[allow(clippy::cast_possible_truncation)]
    body.extend_from_slice(&(pcm.len() as u32).to_le_bytes());
    body.extend_from_slice(pcm);

    let mut file = b"RIFF".to_vec();
    #[allow(clippy::cast_possible_truncation)]
    file.extend_from_slice(&(body.len() as u32).to_le_bytes());
    file.extend_from_slice(&body);
    file
}

pub fn wav_bytes(format: PcmFormat, pcm: &[u8]) -> Vec<u8> {
    wav_with_chunks(format, pcm, &[])
}

/// Serves a fixed PCM payload regardless of file contents, at most `max_chunk` bytes per read.
pub struct ScriptedProvider {
    pub format: DecodedFormat,
    pub pcm: Arc<Vec<u8>>,
    pub max_chunk: usize,
    /// Reads at or past this byte offset fail.
    pub fail_at: Option<usize>,
}

impl ScriptedProvider {
    pub fn new(format: PcmFormat, pcm: Vec<u8>, max_chunk: usize) -> Self {
        Self {
            format: DecodedFormat {
                sample_rate: format.sample_rate,
                channels: format.channels,
                encoding: SampleEncoding::S16,
            },
            pcm: Arc::new(pcm),
            max_chunk,
            fail_at: None,
        }
    }

    #[must_use]
    pub const fn failing_at(mut self, offset: usize) -> Self {
        self.fail_at = Some(offset);
        self
    }
}

impl DecoderProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn open(
        &self,
        _source: Box<dyn FileHandle>,
        _format: AudioFileFormat,
    ) -> Result<Box<dyn PcmDecoder>> {
        Ok(Box::new(ScriptedDecoder {
            format: self.format,
            pcm: Arc::clone(&self.pcm),
            pos: 0,
            max_chunk: self.max_chunk,
            fail_at: self.fail_at,
        }))
    }
}

struct ScriptedDecoder {
    format: DecodedFormat,
    pcm: Arc<Vec<u8>>,
    pos: usize,
    max_chunk: usize,
    fail_at: Option<usize>,
}

impl ScriptedDecoder {
    fn block(&self) -> usize {
        usize::from(self.format.encoding.sample_size()) * usize::from(self.format.channels)
    }
}

impl PcmDecoder for ScriptedDecoder {
    fn format(&self) -> DecodedFormat {
        self.format
    }

    fn total_frames(&self) -> u64 {
        (self.pcm.len() / self.block()) as u64
    }

    fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        if self.fail_at.is_some_and(|at| self.pos >= at) {
            return Err(Error::DecodeError("scripted failure".to_string()));
        }
        let n = dst.len().min(self.max_chunk).min(self.pcm.len() - self.pos);
        dst[..n].copy_from_slice(&self.pcm[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn seek_to_frame(&mut self, frame: u64) -> Result<()> {
        self.pos = (frame as usize * self.block()).min(self.pcm.len());
        Ok(())
    }
}

/// An in-memory file system with scripted MP3 and Ogg decoders.
pub fn memory_io(provider: Option<Arc<dyn DecoderProvider>>) -> (Arc<MemoryFileSystem>, IoContext) {
    let fs = Arc::new(MemoryFileSystem::new());
    let mut decoders = DecoderRegistry::empty();
    if let Some(provider) = provider {
        decoders = decoders.with_mp3(Arc::clone(&provider)).with_ogg(provider);
    }
    let io = IoContext::new(fs.clone(), decoders);
    (fs, io)
}

/// An in-memory WAV asset of `pcm_len` pattern bytes at `path`.
pub fn wav_io(path: &str, format: PcmFormat, pcm_len: usize) -> (IoContext, Vec<u8>) {
    let pcm = pattern(pcm_len);
    let (fs, io) = memory_io(None);
    fs.insert(Path::new(path), wav_bytes(format, &pcm));
    (io, pcm)
}

/// 360 ms of 32 kHz mono MPEG-1 Layer III, ten frames with no Xing or LAME tag.
pub const TONE_MP3: &[u8] = include_bytes!("../fixtures/tone.mp3");

/// `TONE_MP3` with an invalid `part2_3_length` in the fifth frame.
pub const TONE_CORRUPT_MP3: &[u8] = include_bytes!("../fixtures/tone_corrupt.mp3");

/// 768 ms of 8 kHz mono Ogg Vorbis, 49 short blocks over seven audio pages.
pub const TONE_OGG: &[u8] = include_bytes!("../fixtures/tone.ogg");
