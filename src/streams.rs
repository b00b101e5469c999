//! Stream adapters handed to the engine.
//!
//! Host-backed streams wrap host objects ([`InputSource`], [`OutputSink`]) and
//! perform every read, write and seek as an action on the session's event
//! loop. [`FileInStream`] reads a file natively, without involving the host.

use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::dispatch::Requester;
use crate::engine::{EngineError, EngineResult, InStream, OutStream, SequentialOutStream};
use crate::fsx;
use crate::host::Wrapped;

/// A readable host object: archive input or item data.
pub trait InputSource: Read + Seek + Send {}

impl<T: Read + Seek + Send> InputSource for T {}

/// A writable host object: archive output or an extracted item.
pub trait OutputSink: Write + Send {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let _ = pos;
        Err(io::Error::new(io::ErrorKind::Unsupported, "sink is not seekable"))
    }

    fn set_len(&mut self, size: u64) -> io::Result<()> {
        let _ = size;
        Err(io::Error::new(io::ErrorKind::Unsupported, "sink cannot be truncated"))
    }

    /// Flushes and closes the sink. In-memory sinks return their contents.
    fn finish(mut self: Box<Self>) -> io::Result<Option<Vec<u8>>> {
        self.flush()?;
        Ok(None)
    }
}

impl OutputSink for fsx::File {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Seek::seek(self, pos)
    }

    fn set_len(&mut self, size: u64) -> io::Result<()> {
        fsx::File::set_len(self, size)
    }
}

impl OutputSink for Cursor<Vec<u8>> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Seek::seek(self, pos)
    }

    fn set_len(&mut self, size: u64) -> io::Result<()> {
        let len = usize::try_from(size).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        self.get_mut().resize(len, 0);
        Ok(())
    }

    fn finish(self: Box<Self>) -> io::Result<Option<Vec<u8>>> {
        Ok(Some(self.into_inner()))
    }
}

impl OutputSink for Vec<u8> {
    fn finish(self: Box<Self>) -> io::Result<Option<Vec<u8>>> {
        Ok(Some(*self))
    }
}

/// A sink shared between an engine stream and the bridge that hands it back
/// to the host once the engine is done with it.
pub type SharedSink = Arc<Mutex<Option<Box<dyn OutputSink>>>>;

pub fn shared_sink(sink: Box<dyn OutputSink>) -> SharedSink {
    Arc::new(Mutex::new(Some(sink)))
}

fn lock_sink(sink: &SharedSink) -> MutexGuard<'_, Option<Box<dyn OutputSink>>> {
    sink.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Takes the sink back out of a [`SharedSink`].
pub fn take_sink(sink: &SharedSink) -> Option<Box<dyn OutputSink>> {
    lock_sink(sink).take()
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "stream already closed")
}

/// Engine input backed by a host object.
pub struct HostInStream {
    source: Box<dyn InputSource>,
    requester: Requester,
}

impl HostInStream {
    pub fn new(source: Box<dyn InputSource>, requester: Requester) -> Self {
        Self { source, requester }
    }
}

impl InStream for HostInStream {
    fn read(&mut self, buf: &mut [u8]) -> EngineResult<usize> {
        let source = &mut self.source;
        let mut read = 0;
        let ok = self.requester.run(|| {
            read = Read::read(source, buf)?;
            Ok(())
        });
        if ok {
            Ok(read)
        } else {
            Err(EngineError::Fail)
        }
    }

    fn seek(&mut self, pos: SeekFrom) -> EngineResult<u64> {
        let source = &mut self.source;
        let mut offset = 0;
        let ok = self.requester.run(|| {
            offset = Seek::seek(source, pos)?;
            Ok(())
        });
        if ok {
            Ok(offset)
        } else {
            Err(EngineError::Fail)
        }
    }
}

/// Engine output backed by a host object.
pub struct HostOutStream {
    sink: SharedSink,
    requester: Requester,
}

impl HostOutStream {
    pub fn new(sink: SharedSink, requester: Requester) -> Self {
        Self { sink, requester }
    }

    fn with_sink(&self, mut f: impl FnMut(&mut dyn OutputSink) -> io::Result<()> + Send) -> EngineResult {
        let sink = &self.sink;
        let ok = self.requester.run(|| {
            let mut guard = lock_sink(sink);
            let sink = guard.as_mut().ok_or_else(closed)?;
            f(&mut **sink)?;
            Ok(())
        });
        if ok {
            Ok(())
        } else {
            Err(EngineError::Fail)
        }
    }
}

impl SequentialOutStream for HostOutStream {
    fn write(&mut self, buf: &[u8]) -> EngineResult<usize> {
        self.with_sink(|sink| sink.write_all(buf))?;
        Ok(buf.len())
    }
}

impl OutStream for HostOutStream {
    fn seek(&mut self, pos: SeekFrom) -> EngineResult<u64> {
        let mut offset = 0;
        self.with_sink(|sink| {
            offset = sink.seek(pos)?;
            Ok(())
        })?;
        Ok(offset)
    }

    fn set_size(&mut self, size: u64) -> EngineResult {
        self.with_sink(|sink| sink.set_len(size))
    }
}

/// Engine input reading a file directly on the engine's thread.
pub struct FileInStream {
    file: Wrapped<fsx::File>,
}

impl FileInStream {
    /// Opens `path`. A file that cannot be opened yields a stream whose every
    /// call fails, which the engine reports for that item.
    pub fn open(path: &Path) -> Self {
        let file = match fsx::File::open(path) {
            Ok(f) => Wrapped::Live(f),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot open item source");
                Wrapped::Uninitialized
            }
        };
        Self { file }
    }

    pub fn is_open(&self) -> bool {
        self.file.is_live()
    }
}

impl InStream for FileInStream {
    fn read(&mut self, buf: &mut [u8]) -> EngineResult<usize> {
        let file = self.file.get_mut().ok_or(EngineError::Fail)?;
        Read::read(file, buf).map_err(|_| EngineError::Fail)
    }

    fn seek(&mut self, pos: SeekFrom) -> EngineResult<u64> {
        let file = self.file.get_mut().ok_or(EngineError::Fail)?;
        Seek::seek(file, pos).map_err(|_| EngineError::Fail)
    }
}
