//! RIFF/WAVE streamer. PCM is read straight from the `data` chunk.

use std::io::{self, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use cadence_core::{Error, PcmFormat, Result};
use thiserror::Error as ThisError;
use tracing::{debug, trace};

use super::StreamState;
use crate::io::{read_up_to, FileHandle, FileSystem};

const WAVE_FORMAT_PCM: u16 = 0x0001;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Why a file was not accepted as PCM WAV.
#[derive(Debug, ThisError)]
enum HeaderError {
    #[error("not a RIFF/WAVE file")]
    NotRiff,
    #[error("no fmt chunk before the data chunk")]
    MissingFmt,
    #[error("no data chunk")]
    MissingData,
    #[error("unsupported format tag {0:#06x}")]
    UnsupportedEncoding(u16),
    #[error("invalid PCM layout: {0} Hz, {1} channels, {2} bits")]
    InvalidLayout(u32, u16, u16),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WavHeader {
    format: PcmFormat,
    data_offset: u64,
    data_len: u64,
}

/// Streams PCM out of a RIFF/WAVE file.
pub struct WavStreamer {
    fs: Arc<dyn FileSystem>,
    file: Option<Box<dyn FileHandle>>,
    data_offset: u64,
    state: StreamState,
}

impl WavStreamer {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            file: None,
            data_offset: 0,
            state: StreamState::default(),
        }
    }

    pub fn open(&mut self, path: &Path) -> Result<()> {
        if self.file.is_some() {
            return Err(Error::AlreadyOpen);
        }

        let mut file = self.fs.open(path)?;
        let header = parse_header(file.as_mut())
            .map_err(|e| Error::open_failed(path, e.to_string()))?;
        file.seek(SeekFrom::Start(header.data_offset))?;

        debug!(
            "Opened WAV {}: {} Hz, {} ch, {} bit, {} bytes of PCM",
            path.display(),
            header.format.sample_rate,
            header.format.channels,
            header.format.bits_per_sample(),
            header.data_len
        );

        self.file = Some(file);
        self.data_offset = header.data_offset;
        self.state = StreamState::new(header.format, header.data_len);
        Ok(())
    }

    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        let Some(file) = self.file.as_mut() else {
            return Ok(0);
        };
        let len = self.state.read_len(dst.len());
        if len == 0 {
            return Ok(0);
        }
        let n = read_up_to(file.as_mut(), &mut dst[..len])?;
        self.state.position += n as u64;
        Ok(n)
    }

    pub fn seek(&mut self, byte_pos: u64) -> Result<u64> {
        let Some(file) = self.file.as_mut() else {
            return Ok(0);
        };
        let target = self.state.seek_target(byte_pos);
        file.seek(SeekFrom::Start(self.data_offset + target))?;
        self.state.position = target;
        Ok(target)
    }

    pub fn close(&mut self) {
        if self.file.take().is_some() {
            trace!("Closed WAV stream");
        }
        self.data_offset = 0;
        self.state = StreamState::default();
    }

    pub const fn state(&self) -> &StreamState {
        &self.state
    }

    pub const fn is_open(&self) -> bool {
        self.file.is_some()
    }
}

fn le_u16(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Walk the RIFF chunk list, returning the PCM layout and where the samples live.
///
/// Chunks between `fmt ` and `data` are skipped by their declared size
/// (plus the pad byte after odd-sized chunks).
fn parse_header(file: &mut dyn FileHandle) -> std::result::Result<WavHeader, HeaderError> {
    let file_len = file.byte_len()?;
    file.seek(SeekFrom::Start(0))?;

    let mut riff = [0u8; 12];
    if read_up_to(file, &mut riff)? < riff.len()
        || &riff[0..4] != b"RIFF"
        || &riff[8..12] != b"WAVE"
    {
        return Err(HeaderError::NotRiff);
    }

    let mut format = None;
    loop {
        let mut chunk = [0u8; 8];
        if read_up_to(file, &mut chunk)? < chunk.len() {
            return Err(HeaderError::MissingData);
        }
        let size = u64::from(le_u32(&chunk[4..8]));
        let body = file.tell()?;

        match &chunk[0..4] {
            b"fmt " => {
                let mut fmt = [0u8; 16];
                if size < 16 || read_up_to(file, &mut fmt)? < fmt.len() {
                    return Err(HeaderError::NotRiff);
                }
                format = Some(parse_fmt(&fmt)?);
            }
            b"data" => {
                let format = format.ok_or(HeaderError::MissingFmt)?;
                let present = file_len.saturating_sub(body);
                let data_len = format.align_down(size.min(present));
                return Ok(WavHeader {
                    format,
                    data_offset: body,
                    data_len,
                });
            }
            other => trace!(
                "Skipping {:?} chunk of {} bytes",
                String::from_utf8_lossy(other),
                size
            ),
        }

        file.seek(SeekFrom::Start(body + size + (size & 1)))?;
    }
}

fn parse_fmt(fmt: &[u8; 16]) -> std::result::Result<PcmFormat, HeaderError> {
    let tag = le_u16(&fmt[0..2]);
    if tag != WAVE_FORMAT_PCM && tag != WAVE_FORMAT_EXTENSIBLE {
        return Err(HeaderError::UnsupportedEncoding(tag));
    }
    let channels = le_u16(&fmt[2..4]);
    let sample_rate = le_u32(&fmt[4..8]);
    let bits = le_u16(&fmt[14..16]);

    let format = PcmFormat::new(sample_rate, channels, bits / 8);
    if !format.is_valid() || bits % 8 != 0 {
        return Err(HeaderError::InvalidLayout(sample_rate, channels, bits));
    }
    Ok(format)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;
    use crate::io::MemoryFileSystem;
    use crate::test_support::{pattern, wav_bytes, wav_with_chunks, STEREO16};

    fn streamer_for(bytes: Vec<u8>) -> WavStreamer {
        let fs = Arc::new(MemoryFileSystem::new());
        fs.insert("t.wav", bytes);
        let mut streamer = WavStreamer::new(fs);
        streamer.open(Path::new("t.wav")).unwrap();
        streamer
    }

    #[test]
    fn test_data_after_metadata_chunks() {
        let pcm = pattern(800);
        let list: &[u8] = b"INFOISFT\x05\0\0\0abcd\0";
        let fact: &[u8] = b"\x10\0\0\0";
        let bytes = wav_with_chunks(STEREO16, &pcm, &[(b"LIST", list), (b"fact", fact)]);
        let mut streamer = streamer_for(bytes);
        assert_eq!(streamer.state().size, 800);

        let mut dst = vec![0u8; 800];
        assert_eq!(streamer.read(&mut dst).unwrap(), 800);
        assert_eq!(dst, pcm);
    }

    #[test]
    fn test_odd_chunk_padding() {
        let pcm = pattern(40);
        let junk: &[u8] = b"odd";
        let bytes = wav_with_chunks(STEREO16, &pcm, &[(b"junk", junk)]);
        let mut streamer = streamer_for(bytes);

        let mut dst = vec![0u8; 40];
        assert_eq!(streamer.read(&mut dst).unwrap(), 40);
        assert_eq!(dst, pcm);
    }

    #[test]
    fn test_truncated_data_is_clamped() {
        let mut bytes = wav_bytes(STEREO16, &pattern(1000));
        bytes.truncate(bytes.len() - 301);
        let streamer = streamer_for(bytes);
        // 699 bytes present, rounded down to a whole frame
        assert_eq!(streamer.state().size, 696);
    }

    #[test]
    fn test_seek_maps_to_file_offset() {
        let pcm = pattern(2000);
        let mut streamer = streamer_for(wav_bytes(STEREO16, &pcm));
        assert_eq!(streamer.seek(1003).unwrap(), 1000);

        let mut dst = [0u8; 8];
        assert_eq!(streamer.read(&mut dst).unwrap(), 8);
        assert_eq!(&dst, &pcm[1000..1008]);

        assert_eq!(streamer.seek(2000).unwrap(), 0);
        assert_eq!(streamer.read(&mut dst).unwrap(), 8);
        assert_eq!(&dst, &pcm[..8]);
    }

    #[test]
    fn test_rejects_non_pcm() {
        let mut bytes = wav_bytes(STEREO16, &pattern(16));
        // format tag lives right after "RIFF....WAVEfmt ....", at offset 20
        bytes[20] = 3;
        let fs = Arc::new(MemoryFileSystem::new());
        fs.insert("f.wav", bytes);
        let mut streamer = WavStreamer::new(fs);
        let err = streamer.open(Path::new("f.wav")).unwrap_err();
        assert!(err.to_string().contains("unsupported format tag 0x0003"));
        assert!(!streamer.is_open());
    }

    #[test]
    fn test_rejects_missing_data_and_bad_magic() {
        let fs = Arc::new(MemoryFileSystem::new());
        let mut no_data = wav_bytes(STEREO16, &[]);
        no_data.truncate(36);
        fs.insert("n.wav", no_data);
        fs.insert("x.wav", b"RIFX\0\0\0\0WAVE".to_vec());

        let mut streamer = WavStreamer::new(fs);
        assert!(matches!(streamer.open(Path::new("n.wav")), Err(Error::OpenFailed { .. })));
        assert!(matches!(streamer.open(Path::new("x.wav")), Err(Error::OpenFailed { .. })));
    }

    #[test]
    fn test_extensible_header_accepted() {
        let mut bytes = wav_bytes(STEREO16, &pattern(64));
        bytes[20..22].copy_from_slice(&WAVE_FORMAT_EXTENSIBLE.to_le_bytes());
        let streamer = streamer_for(bytes);
        assert_eq!(streamer.state().format, STEREO16);
    }
}
