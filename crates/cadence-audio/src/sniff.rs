//! Audio container detection from file names and header bytes.

use std::path::Path;

use cadence_core::AudioFileFormat;
use tracing::debug;

use crate::io::{read_up_to, FileSystem};

/// Bytes of header inspected when the extension is inconclusive.
const HEADER_LEN: usize = 12;

/// Classify `path`, trusting a recognised extension and falling back to the header.
///
/// Never fails: anything unreadable or unrecognised is [`AudioFileFormat::Unknown`].
pub fn classify(path: &Path, fs: &dyn FileSystem) -> AudioFileFormat {
    let format = classify_extension(path);
    if format.is_known() {
        return format;
    }
    classify_header(path, fs)
}

/// Classify by the exact three-character extension of the last path segment.
pub fn classify_extension(path: &Path) -> AudioFileFormat {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return AudioFileFormat::Unknown;
    };
    match name.rfind('.') {
        Some(dot) if name.len() - dot == 4 => AudioFileFormat::from_extension(&name[dot + 1..]),
        _ => AudioFileFormat::Unknown,
    }
}

/// Open `path` and classify its first bytes.
pub fn classify_header(path: &Path, fs: &dyn FileSystem) -> AudioFileFormat {
    let mut handle = match fs.open(path) {
        Ok(handle) => handle,
        Err(e) => {
            debug!("Cannot sniff {}: {e}", path.display());
            return AudioFileFormat::Unknown;
        }
    };

    let mut header = [0u8; HEADER_LEN];
    let n = read_up_to(&mut *handle, &mut header).unwrap_or(0);
    classify_bytes(&header[..n])
}

/// Classify a file from its leading bytes.
pub fn classify_bytes(header: &[u8]) -> AudioFileFormat {
    if header.len() >= HEADER_LEN && &header[0..4] == b"RIFF" && &header[8..12] == b"WAVE" {
        AudioFileFormat::Wav
    } else if header.starts_with(b"OggS") {
        AudioFileFormat::Ogg
    } else if header.starts_with(b"ID3") || is_mpeg_layer3_sync(header) {
        AudioFileFormat::Mp3
    } else {
        AudioFileFormat::Unknown
    }
}

/// An untagged MP3 starts directly on an MPEG audio frame: 11 sync bits, then layer III.
fn is_mpeg_layer3_sync(header: &[u8]) -> bool {
    match header {
        [0xFF, b1, ..] => b1 & 0xE0 == 0xE0 && (b1 >> 1) & 0x03 == 0x01,
        _ => false,
    }
}
