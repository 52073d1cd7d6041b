//! File access capability shared by the sniffer, the streamers, and the decoders.
//!
//! Nothing in this crate touches the OS file API directly; every byte goes
//! through a [`FileSystem`] so assets can live on disk, in memory, or in a pack.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use cadence_core::{Error, Result};
use parking_lot::RwLock;
use symphonia::core::io::MediaSource;
use tracing::trace;

use crate::decode::DecoderRegistry;

/// An open, read-only, seekable file.
pub trait FileHandle: Read + Seek + Send + Sync {
    /// Current byte offset.
    fn tell(&mut self) -> io::Result<u64> {
        self.stream_position()
    }

    /// Total length in bytes. The cursor is left where it was.
    fn byte_len(&mut self) -> io::Result<u64> {
        let pos = self.stream_position()?;
        let len = self.seek(SeekFrom::End(0))?;
        if pos != len {
            self.seek(SeekFrom::Start(pos))?;
        }
        Ok(len)
    }
}

impl<T: Read + Seek + Send + Sync> FileHandle for T {}

/// Opens files for reading.
pub trait FileSystem: Send + Sync {
    /// Open `path` read-only. A missing or unreadable file is [`Error::OpenFailed`].
    fn open(&self, path: &Path) -> Result<Box<dyn FileHandle>>;
}

/// Read into `buf` until it is full or the handle reports end of file.
///
/// Unlike `read_exact`, a short file is not an error; the byte count is returned.
pub fn read_up_to<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// The local disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

impl FileSystem for LocalFileSystem {
    fn open(&self, path: &Path) -> Result<Box<dyn FileHandle>> {
        let file = File::open(path).map_err(|e| Error::open_failed(path, e.to_string()))?;
        trace!("Opened {}", path.display());
        Ok(Box::new(file))
    }
}

/// Files held in memory, keyed by path.
///
/// Blobs are shared, so opening the same path twice never copies the data.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    files: RwLock<HashMap<PathBuf, Bytes>>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a file.
    pub fn insert(&self, path: impl Into<PathBuf>, data: impl Into<Bytes>) {
        self.files.write().insert(path.into(), data.into());
    }

    /// Remove a file. Handles that are already open keep working.
    pub fn remove(&self, path: &Path) -> Option<Bytes> {
        self.files.write().remove(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.read().contains_key(path)
    }
}

impl FileSystem for MemoryFileSystem {
    fn open(&self, path: &Path) -> Result<Box<dyn FileHandle>> {
        let data = self
            .files
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| Error::open_failed(path, "no such file"))?;
        Ok(Box::new(Cursor::new(data)))
    }
}

/// Presents a [`FileHandle`] to symphonia as a byte-stream source.
///
/// This is the read/seek/tell hook set a decoder drives; dropping the adapter closes the handle.
pub struct MediaSourceAdapter {
    handle: Box<dyn FileHandle>,
    len: Option<u64>,
}

impl MediaSourceAdapter {
    pub fn new(mut handle: Box<dyn FileHandle>) -> Self {
        let len = handle.byte_len().ok();
        Self { handle, len }
    }
}

impl Read for MediaSourceAdapter {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.handle.read(buf)
    }
}

impl Seek for MediaSourceAdapter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.handle.seek(pos)
    }
}

impl MediaSource for MediaSourceAdapter {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        self.len
    }
}

/// Everything a streamer needs to reach its bytes: a file system and the decoders.
#[derive(Clone)]
pub struct IoContext {
    fs: Arc<dyn FileSystem>,
    decoders: DecoderRegistry,
}

impl IoContext {
    pub fn new(fs: Arc<dyn FileSystem>, decoders: DecoderRegistry) -> Self {
        Self { fs, decoders }
    }

    /// Local disk with the default symphonia decoders.
    pub fn local() -> Self {
        Self::new(Arc::new(LocalFileSystem), DecoderRegistry::default())
    }

    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    pub const fn decoders(&self) -> &DecoderRegistry {
        &self.decoders
    }

    /// Open `path` through the configured file system.
    pub fn open(&self, path: &Path) -> Result<Box<dyn FileHandle>> {
        self.fs.open(path)
    }
}

impl Default for IoContext {
    fn default() -> Self {
        Self::local()
    }
}

impl fmt::Debug for IoContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoContext")
            .field("decoders", &self.decoders)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;
    use std::io::Write;

    #[test]
    fn test_memory_fs_open() {
        let fs = MemoryFileSystem::new();
        fs.insert("a.bin", vec![1u8, 2, 3, 4]);

        let mut handle = fs.open(Path::new("a.bin")).unwrap();
        assert_eq!(handle.byte_len().unwrap(), 4);

        let mut buf = [0u8; 8];
        assert_eq!(read_up_to(&mut *handle, &mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], &[1, 2, 3, 4]);
        assert_eq!(handle.tell().unwrap(), 4);
    }

    #[test]
    fn test_memory_fs_missing() {
        let fs = MemoryFileSystem::new();
        let err = fs.open(Path::new("missing.wav")).err().unwrap();
        assert!(matches!(err, Error::OpenFailed { .. }));
    }

    #[test]
    fn test_byte_len_keeps_position() {
        let mut cursor = Cursor::new(vec![0u8; 100]);
        cursor.seek(SeekFrom::Start(40)).unwrap();
        assert_eq!(FileHandle::byte_len(&mut cursor).unwrap(), 100);
        assert_eq!(cursor.tell().unwrap(), 40);
    }

    #[test]
    fn test_local_fs_roundtrip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"RIFF").unwrap();
        file.flush().unwrap();

        let mut handle = LocalFileSystem.open(file.path()).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(read_up_to(&mut *handle, &mut buf).unwrap(), 4);
        assert_eq!(&buf, b"RIFF");

        let missing = file.path().with_extension("nope");
        assert!(LocalFileSystem.open(&missing).is_err());
    }

    #[test]
    fn test_media_source_adapter() {
        let adapter = MediaSourceAdapter::new(Box::new(Cursor::new(vec![0u8; 12])));
        assert!(adapter.is_seekable());
        assert_eq!(adapter.byte_len(), Some(12));
    }
}
