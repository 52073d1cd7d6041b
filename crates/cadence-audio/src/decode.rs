//! Compressed audio decoding.
//!
//! Streamers see decoders only through [`PcmDecoder`]: a pull source of
//! interleaved PCM bytes with frame-accurate seeking. The default provider is
//! symphonia; a [`DecoderRegistry`] without a provider for a format makes that
//! format unavailable rather than failing at startup.

use std::fmt;
use std::sync::Arc;

use cadence_core::{AudioFileFormat, Error, Result};
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader, SeekMode, SeekTo},
    io::{MediaSourceStream, MediaSourceStreamOptions},
    meta::MetadataOptions,
    probe::Hint,
};
use tracing::{debug, trace, warn};

use crate::io::{FileHandle, MediaSourceAdapter};

/// Consecutive corrupt packets tolerated before a read fails.
const MAX_DECODE_RETRIES: usize = 3;

/// Frames decoded and dropped ahead of a seek target, so codec overlap state
/// is warm and output after a seek matches a linear decode.
const SEEK_PREROLL_FRAMES: u64 = 4096;

/// Sample encoding of decoder output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleEncoding {
    U8,
    S16,
    S24,
    S32,
    F32,
}

impl SampleEncoding {
    /// Bytes per mono sample.
    pub const fn sample_size(self) -> u16 {
        match self {
            Self::U8 => 1,
            Self::S16 => 2,
            Self::S24 => 3,
            Self::S32 | Self::F32 => 4,
        }
    }
}

/// Output layout reported by a decoder once opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub encoding: SampleEncoding,
}

/// An opened compressed stream producing interleaved little-endian PCM.
pub trait PcmDecoder: Send {
    fn format(&self) -> DecodedFormat;

    /// Length of the decoded stream in frames.
    fn total_frames(&self) -> u64;

    /// Decode into `dst`, returning the bytes written. Fewer than `dst.len()`
    /// bytes may be produced; `0` means end of stream.
    fn read(&mut self, dst: &mut [u8]) -> Result<usize>;

    /// Reposition so the next `read` starts at `frame`.
    fn seek_to_frame(&mut self, frame: u64) -> Result<()>;
}

/// Opens [`PcmDecoder`]s over file handles.
pub trait DecoderProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Take ownership of `source` and prepare it for decoding. The handle is
    /// closed when the returned decoder is dropped.
    fn open(
        &self,
        source: Box<dyn FileHandle>,
        format: AudioFileFormat,
    ) -> Result<Box<dyn PcmDecoder>>;
}

/// Which provider decodes which compressed format.
#[derive(Clone)]
pub struct DecoderRegistry {
    mp3: Option<Arc<dyn DecoderProvider>>,
    ogg: Option<Arc<dyn DecoderProvider>>,
}

impl DecoderRegistry {
    /// A registry with no decoders at all. Only WAV will play.
    pub const fn empty() -> Self {
        Self { mp3: None, ogg: None }
    }

    /// symphonia for both MP3 and Ogg Vorbis.
    pub fn symphonia() -> Self {
        let provider: Arc<dyn DecoderProvider> = Arc::new(SymphoniaProvider);
        Self {
            mp3: Some(Arc::clone(&provider)),
            ogg: Some(provider),
        }
    }

    #[must_use]
    pub fn with_mp3(mut self, provider: Arc<dyn DecoderProvider>) -> Self {
        self.mp3 = Some(provider);
        self
    }

    #[must_use]
    pub fn with_ogg(mut self, provider: Arc<dyn DecoderProvider>) -> Self {
        self.ogg = Some(provider);
        self
    }

    /// Drop the provider for `format`, making it unavailable.
    #[must_use]
    pub fn without(mut self, format: AudioFileFormat) -> Self {
        match format {
            AudioFileFormat::Mp3 => self.mp3 = None,
            AudioFileFormat::Ogg => self.ogg = None,
            AudioFileFormat::Wav | AudioFileFormat::Unknown => {}
        }
        self
    }

    pub fn get(&self, format: AudioFileFormat) -> Option<&Arc<dyn DecoderProvider>> {
        match format {
            AudioFileFormat::Mp3 => self.mp3.as_ref(),
            AudioFileFormat::Ogg => self.ogg.as_ref(),
            AudioFileFormat::Wav | AudioFileFormat::Unknown => None,
        }
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::symphonia()
    }
}

impl fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderRegistry")
            .field("mp3", &self.mp3.as_ref().map(|p| p.name()))
            .field("ogg", &self.ogg.as_ref().map(|p| p.name()))
            .finish()
    }
}

/// Decodes MP3 and Ogg Vorbis through symphonia, always to signed 16-bit.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymphoniaProvider;

impl DecoderProvider for SymphoniaProvider {
    fn name(&self) -> &'static str {
        "symphonia"
    }

    fn open(
        &self,
        source: Box<dyn FileHandle>,
        format: AudioFileFormat,
    ) -> Result<Box<dyn PcmDecoder>> {
        Ok(Box::new(SymphoniaDecoder::open(source, format)?))
    }
}

/// symphonia format reader and codec for a single audio track.
pub struct SymphoniaDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: u16,
    total_frames: u64,
    /// Decoded bytes not yet handed out.
    pending: Vec<u8>,
    pending_pos: usize,
    /// Frame the next output must start at, set by a seek until reached.
    seek_target: Option<u64>,
    finished: bool,
}

impl SymphoniaDecoder {
    pub fn open(source: Box<dyn FileHandle>, file_format: AudioFileFormat) -> Result<Self> {
        let mss = MediaSourceStream::new(
            Box::new(MediaSourceAdapter::new(source)),
            MediaSourceStreamOptions::default(),
        );

        let mut hint = Hint::new();
        if let Some(ext) = file_format.extension() {
            hint.with_extension(ext);
        }

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &MetadataOptions::default())
            .map_err(|e| Error::DecodeError(format!("Failed to probe format: {e}")))?;

        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::DecodeError("No audio tracks found".to_string()))?;

        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| Error::DecodeError("Track has no sample rate".to_string()))?;
        #[allow(clippy::cast_possible_truncation)]
        let channels = track
            .codec_params
            .channels
            .map(|c| c.count() as u16)
            .ok_or_else(|| Error::DecodeError("Track has no channel layout".to_string()))?;
        let n_frames = track.codec_params.n_frames;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| Error::DecodeError(format!("Failed to create decoder: {e}")))?;

        let total_frames = match n_frames {
            Some(n) => n,
            None => count_frames(format.as_mut(), track_id)?,
        };

        debug!(
            "Decoded track: id={}, sample_rate={}, channels={}, frames={}",
            track_id, sample_rate, channels, total_frames
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            channels,
            total_frames,
            pending: Vec::new(),
            pending_pos: 0,
            seek_target: None,
            finished: false,
        })
    }

    /// Decode the next packet of our track into `pending`. Returns false at end of stream.
    fn decode_packet(&mut self) -> Result<bool> {
        let mut failures = 0;
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(false);
                }
                // Chained streams are not followed.
                Err(SymphoniaError::ResetRequired) => return Ok(false),
                Err(e) => return Err(Error::DecodeError(format!("Failed to read packet: {e}"))),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let packet_ts = packet.ts();
            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    failures = 0;
                    decoded
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    failures += 1;
                    warn!("Decode error (skipping packet): {e}");
                    if failures >= MAX_DECODE_RETRIES {
                        return Err(Error::DecodeError(format!(
                            "{failures} consecutive corrupt packets: {e}"
                        )));
                    }
                    continue;
                }
                Err(e) => return Err(Error::DecodeError(format!("Decode failed: {e}"))),
            };

            let frames = decoded.frames() as u64;
            if frames == 0 {
                continue;
            }

            let skip = match self.seek_target {
                Some(target) if packet_ts + frames <= target => continue,
                Some(target) => {
                    self.seek_target = None;
                    if packet_ts > target {
                        warn!(
                            "Seek overshot: wanted frame {}, first packet at {}",
                            target, packet_ts
                        );
                    }
                    target.saturating_sub(packet_ts)
                }
                None => 0,
            };

            let mut samples = SampleBuffer::<i16>::new(decoded.capacity() as u64, *decoded.spec());
            samples.copy_interleaved_ref(decoded);

            let channels = u64::from(self.channels.max(1));
            #[allow(clippy::cast_possible_truncation)]
            let skip_samples = ((skip * channels) as usize).min(samples.samples().len());

            self.pending.clear();
            self.pending_pos = 0;
            for sample in &samples.samples()[skip_samples..] {
                self.pending.extend_from_slice(&sample.to_le_bytes());
            }
            if !self.pending.is_empty() {
                return Ok(true);
            }
        }
    }
}

impl PcmDecoder for SymphoniaDecoder {
    fn format(&self) -> DecodedFormat {
        DecodedFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
            encoding: SampleEncoding::S16,
        }
    }

    fn total_frames(&self) -> u64 {
        self.total_frames
    }

    fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        let mut written = 0;
        while written < dst.len() {
            if self.pending_pos >= self.pending.len() {
                if self.finished || !self.decode_packet()? {
                    self.finished = true;
                    break;
                }
            }
            let chunk = &self.pending[self.pending_pos..];
            let n = chunk.len().min(dst.len() - written);
            dst[written..written + n].copy_from_slice(&chunk[..n]);
            written += n;
            self.pending_pos += n;
        }
        Ok(written)
    }

    fn seek_to_frame(&mut self, frame: u64) -> Result<()> {
        let start = frame.saturating_sub(SEEK_PREROLL_FRAMES);
        let seeked = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::TimeStamp {
                    ts: start,
                    track_id: self.track_id,
                },
            )
            .map_err(|e| Error::DecodeError(format!("Seek failed: {e}")))?;

        self.decoder.reset();
        self.pending.clear();
        self.pending_pos = 0;
        self.finished = false;
        self.seek_target = Some(frame);
        trace!(
            "Seeked to frame {} (preroll from {}, landed at {})",
            frame,
            start,
            seeked.actual_ts
        );
        Ok(())
    }
}

/// Count frames by walking every packet, then rewind. Used when the container
/// does not declare its length.
fn count_frames(format: &mut dyn FormatReader, track_id: u32) -> Result<u64> {
    let mut total = 0u64;
    loop {
        match format.next_packet() {
            Ok(packet) if packet.track_id() == track_id => total += packet.dur,
            Ok(_) => {}
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(Error::DecodeError(format!("Failed to scan stream: {e}"))),
        }
    }

    format
        .seek(SeekMode::Accurate, SeekTo::TimeStamp { ts: 0, track_id })
        .map_err(|e| Error::DecodeError(format!("Failed to rewind after scan: {e}")))?;

    debug!("Counted {} frames by scanning", total);
    Ok(total)
}
