//! Byte stream abstraction and protocol registry.
//!
//! Decoders read through [`ByteStream`]: a seekable-or-not byte source
//! with an optional known length. Built-in implementations cover files and
//! in-memory data; applications can register custom protocols which are
//! then addressable as `(protocol, path, param)` triples from every
//! `*_from_stream_params` entry point.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use resona_core::{EngineError, EngineResult};

/// A byte source for decoding.
pub trait ByteStream: Send + Sync {
    /// Read up to `buf.len()` bytes; 0 means end of stream.
    fn read(&mut self, buf: &mut [u8]) -> EngineResult<usize>;

    /// Absolute seek. Implementations that cannot seek return
    /// `ByteStreamUnsupportedOperation`.
    fn seek(&mut self, _pos: u64) -> EngineResult<()> {
        Err(EngineError::ByteStreamUnsupportedOperation("seek"))
    }

    fn supports_seek(&self) -> bool {
        false
    }

    /// Total length in bytes when known.
    fn len(&self) -> Option<u64> {
        None
    }
}

/// A file-backed stream.
pub struct FileByteStream {
    file: File,
    length: u64,
}

impl FileByteStream {
    pub fn open(path: &str) -> EngineResult<Self> {
        let file = File::open(path)
            .map_err(|_| EngineError::ByteStreamNotFound(path.to_string()))?;
        let length = file
            .metadata()
            .map(|m| m.len())
            .map_err(EngineError::Io)?;
        Ok(Self { file, length })
    }
}

impl ByteStream for FileByteStream {
    fn read(&mut self, buf: &mut [u8]) -> EngineResult<usize> {
        self.file.read(buf).map_err(EngineError::Io)
    }

    fn seek(&mut self, pos: u64) -> EngineResult<()> {
        self.file
            .seek(SeekFrom::Start(pos))
            .map_err(EngineError::Io)?;
        Ok(())
    }

    fn supports_seek(&self) -> bool {
        true
    }

    fn len(&self) -> Option<u64> {
        Some(self.length)
    }
}

/// An in-memory stream over shared bytes.
pub struct MemoryByteStream {
    data: Arc<[u8]>,
    position: usize,
}

impl MemoryByteStream {
    pub fn new(data: Arc<[u8]>) -> Self {
        Self { data, position: 0 }
    }
}

impl ByteStream for MemoryByteStream {
    fn read(&mut self, buf: &mut [u8]) -> EngineResult<usize> {
        let remaining = &self.data[self.position.min(self.data.len())..];
        let count = buf.len().min(remaining.len());
        buf[..count].copy_from_slice(&remaining[..count]);
        self.position += count;
        Ok(count)
    }

    fn seek(&mut self, pos: u64) -> EngineResult<()> {
        if pos > self.data.len() as u64 {
            return Err(EngineError::ByteStreamCustom(format!(
                "seek to {pos} past end of {}-byte stream",
                self.data.len()
            )));
        }
        self.position = pos as usize;
        Ok(())
    }

    fn supports_seek(&self) -> bool {
        true
    }

    fn len(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }
}

/// Opens a stream for `(path, param)`.
pub type ProtocolOpener =
    Box<dyn Fn(&str, u64) -> EngineResult<Box<dyn ByteStream>> + Send + Sync>;

/// Process-wide protocol registry. The `file` protocol is built in.
pub struct StreamProtocolRegistry {
    protocols: RwLock<HashMap<String, ProtocolOpener>>,
}

impl Default for StreamProtocolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamProtocolRegistry {
    pub fn new() -> Self {
        let registry = Self {
            protocols: RwLock::new(HashMap::new()),
        };
        registry.register(
            "file",
            Box::new(|path, _param| Ok(Box::new(FileByteStream::open(path)?) as Box<dyn ByteStream>)),
        );
        registry
    }

    pub fn register(&self, name: &str, opener: ProtocolOpener) {
        self.protocols.write().insert(name.to_string(), opener);
    }

    pub fn open(&self, protocol: &str, path: &str, param: u64) -> EngineResult<Box<dyn ByteStream>> {
        let protocols = self.protocols.read();
        let opener = protocols.get(protocol).ok_or_else(|| {
            EngineError::Validation(format!("no stream protocol named {protocol:?}"))
        })?;
        opener(path, param)
    }
}

/// Adapter presenting a [`ByteStream`] as `std::io` Read + Seek for the
/// decoder layer.
pub struct ByteStreamIo {
    inner: Box<dyn ByteStream>,
    position: u64,
}

impl ByteStreamIo {
    pub fn new(inner: Box<dyn ByteStream>) -> Self {
        Self { inner, position: 0 }
    }

    pub fn supports_seek(&self) -> bool {
        self.inner.supports_seek()
    }

    pub fn stream_len(&self) -> Option<u64> {
        self.inner.len()
    }
}

impl Read for ByteStreamIo {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let got = self
            .inner
            .read(buf)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        self.position += got as u64;
        Ok(got)
    }
}

impl Seek for ByteStreamIo {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(delta) => self.position as i64 + delta,
            SeekFrom::End(delta) => match self.inner.len() {
                Some(len) => len as i64 + delta,
                None => {
                    return Err(std::io::Error::other("stream length unknown"));
                }
            },
        };
        if target < 0 {
            return Err(std::io::Error::other("seek before start"));
        }
        self.inner
            .seek(target as u64)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        self.position = target as u64;
        Ok(self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_stream_reads_and_seeks() {
        let data: Arc<[u8]> = (0u8..100).collect::<Vec<_>>().into();
        let mut stream = MemoryByteStream::new(data);
        assert_eq!(stream.len(), Some(100));

        let mut buf = [0u8; 10];
        assert_eq!(stream.read(&mut buf).unwrap(), 10);
        assert_eq!(buf[9], 9);

        stream.seek(95).unwrap();
        assert_eq!(stream.read(&mut buf).unwrap(), 5);
        assert_eq!(buf[0], 95);
        assert_eq!(stream.read(&mut buf).unwrap(), 0);

        assert!(stream.seek(101).is_err());
    }

    #[test]
    fn registry_rejects_unknown_protocols() {
        let registry = StreamProtocolRegistry::new();
        assert!(matches!(
            registry.open("nope", "path", 0),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn custom_protocols_are_callable() {
        let registry = StreamProtocolRegistry::new();
        registry.register(
            "mem100",
            Box::new(|_path, _param| {
                let data: Arc<[u8]> = vec![7u8; 100].into();
                Ok(Box::new(MemoryByteStream::new(data)) as Box<dyn ByteStream>)
            }),
        );
        let mut stream = registry.open("mem100", "anything", 0).unwrap();
        let mut buf = [0u8; 4];
        stream.read(&mut buf).unwrap();
        assert_eq!(buf, [7, 7, 7, 7]);
    }

    #[test]
    fn io_adapter_tracks_position() {
        let data: Arc<[u8]> = (0u8..50).collect::<Vec<_>>().into();
        let mut io = ByteStreamIo::new(Box::new(MemoryByteStream::new(data)));
        let mut buf = [0u8; 5];
        io.read_exact(&mut buf).unwrap();
        assert_eq!(io.seek(SeekFrom::Current(5)).unwrap(), 10);
        io.read_exact(&mut buf).unwrap();
        assert_eq!(buf[0], 10);
        assert_eq!(io.seek(SeekFrom::End(-10)).unwrap(), 40);
    }
}
