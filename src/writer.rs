//! Writing archives: queue items, compress them, close.

use std::io::Cursor;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use walkdir::WalkDir;

use crate::callbacks::UpdateBridge;
use crate::config::DispatchConfig;
use crate::dispatch::Dispatcher;
use crate::engine::{EngineBinding, EngineError, Format, OutArchive};
use crate::error::BridgeError;
use crate::fsx;
use crate::host::{Host, HostException, Wrapped};
use crate::info::{clean_path, ItemKind, UpdateItem};
use crate::options::SevenZipOptions;
use crate::progress::{ProgressState, ProgressTracker};
use crate::session::{Session, SessionState};
use crate::streams::{shared_sink, take_sink, HostOutStream, InputSource, OutputSink, SharedSink};

use SessionState::*;

/// Where the data of a queued item comes from.
pub enum ItemSource {
    /// A file read natively by the engine.
    Path(PathBuf),
    /// A host reader; every read is dispatched to the event loop.
    Reader(Box<dyn InputSource>),
}

impl std::fmt::Debug for ItemSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemSource::Path(path) => f.debug_tuple("Path").field(path).finish(),
            ItemSource::Reader(_) => f.write_str("Reader(..)"),
        }
    }
}

/// Host side of a compression run. Calls run on the event loop under the
/// host token; an `Err` stops the run and is re-raised by `compress`.
pub trait CompressHandler: Send {
    /// Data of `item`, or `None` for items without data.
    fn stream(&mut self, item: &UpdateItem) -> Result<Option<ItemSource>, HostException>;

    /// Called once the engine finished reading a [`ItemSource::Reader`].
    fn result(&mut self, item: &UpdateItem, success: bool) -> Result<(), HostException> {
        let _ = (item, success);
        Ok(())
    }

    fn progress(&mut self, state: &ProgressState) -> Result<(), HostException> {
        let _ = state;
        Ok(())
    }
}

/// Buffers are read from memory, files from disk, directories carry no data.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCompressHandler;

impl CompressHandler for DefaultCompressHandler {
    fn stream(&mut self, item: &UpdateItem) -> Result<Option<ItemSource>, HostException> {
        Ok(match &item.kind {
            ItemKind::Buffer(data) => Some(ItemSource::Reader(Box::new(Cursor::new(Arc::clone(data))))),
            ItemKind::File(path) => Some(ItemSource::Path(path.clone())),
            ItemKind::Dir => None,
        })
    }
}

enum Failed {
    Options(EngineError),
    Update(EngineError),
}

/// A write session producing one archive.
pub struct ArchiveWriter {
    archive: Wrapped<Box<dyn OutArchive>>,
    session: Session,
    format: Format,
    output: Option<SharedSink>,
    password: Option<String>,
    items: Vec<UpdateItem>,
    options: Option<SevenZipOptions>,
    progress_interval: Duration,
    binding: Arc<EngineBinding>,
}

impl std::fmt::Debug for ArchiveWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveWriter")
            .field("format", &self.format)
            .field("session", &self.session)
            .field("items", &self.items.len())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ArchiveWriter {
    pub fn new(host: Arc<dyn Host>, format: Format) -> Result<Self, BridgeError> {
        Ok(Self::with_binding(EngineBinding::current()?, host, format, &DispatchConfig::default()))
    }

    /// A writer on an explicit binding. If the engine cannot create the
    /// archive object the writer starts out in the `Error` state.
    pub fn with_binding(binding: Arc<EngineBinding>, host: Arc<dyn Host>, format: Format, config: &DispatchConfig) -> Self {
        let mut session = Session::new(Dispatcher::new(host, config));
        let archive = match binding.factory().create_writer(&format.class_id()) {
            Ok(archive) => Wrapped::Live(archive),
            Err(e) => {
                tracing::warn!(%format, error = %e, "engine cannot create writer");
                session.set_state(Error);
                Wrapped::Uninitialized
            }
        };
        Self {
            archive,
            session,
            format,
            output: None,
            password: None,
            items: Vec::new(),
            options: (format == Format::SevenZip).then(SevenZipOptions::default),
            progress_interval: config.progress_interval,
            binding,
        }
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn state(&mut self) -> SessionState {
        self.session.state()
    }

    pub fn binding(&self) -> &Arc<EngineBinding> {
        &self.binding
    }

    /// 7z tunables; `None` for other formats.
    pub fn options(&self) -> Option<&SevenZipOptions> {
        self.options.as_ref()
    }

    pub fn options_mut(&mut self) -> Option<&mut SevenZipOptions> {
        self.options.as_mut()
    }

    pub fn items(&self) -> &[UpdateItem] {
        &self.items
    }

    /// Starts an archive written to `sink`. Most formats need a seekable sink.
    pub fn open(&mut self, sink: impl OutputSink + 'static, password: Option<&str>) -> Result<(), BridgeError> {
        self.session.begin(&[Initial])?;
        self.output = Some(shared_sink(Box::new(sink)));
        self.password = password.map(str::to_owned);
        self.items.clear();
        self.session.settle(&[Initial], "Open error")?;
        self.session.set_state(Opened);
        Ok(())
    }

    /// Starts an archive written to a new file at `path`.
    pub fn open_file(&mut self, path: &Path, password: Option<&str>) -> Result<(), BridgeError> {
        let file = fsx::File::create(path).map_err(|e| BridgeError::io(e, path))?;
        self.open(file, password)
    }

    pub fn add_item(&mut self, item: UpdateItem) -> Result<(), BridgeError> {
        self.session.begin(&[Opened])?;
        self.items.push(item);
        self.session.settle(&[Opened], "addItem error")
    }

    /// Compresses the queued items through `handler`. A no-op once compressed.
    pub fn compress_with(&mut self, handler: &mut dyn CompressHandler) -> Result<(), BridgeError> {
        if self.session.state() == Compressed {
            return Ok(());
        }
        self.session.begin(&[Opened])?;
        let count = u32::try_from(self.items.len())
            .map_err(|_| BridgeError::InvalidArgument("too many items".into()))?;
        let (Some(archive), Some(output)) = (self.archive.get_mut(), self.output.clone()) else {
            return self.session.fail(BridgeError::invalid_operation("compress error"));
        };
        let props = self.options.as_ref().map(SevenZipOptions::to_properties);
        let items = &self.items;
        let password = self.password.clone();
        let progress = ProgressTracker::new(self.progress_interval);

        let outcome = self.session.execute(|requester| -> Result<(), Failed> {
            if let Some(props) = &props {
                archive.set_properties(props).map_err(Failed::Options)?;
            }
            let stream = HostOutStream::new(output, requester.clone());
            let mut callback = UpdateBridge::new(requester.clone(), items, handler, password, progress);
            archive.update_items(Box::new(stream), count, &mut callback).map_err(Failed::Update)
        })?;

        let outcome = match outcome {
            Ok(()) => Ok(()),
            Err(Failed::Options(e)) => {
                tracing::warn!(error = %e, "engine rejected archive options");
                return Err(BridgeError::InvalidArgument("Invalid option".into()));
            }
            Err(Failed::Update(e)) => Err(e),
        };
        self.session.settle_engine(outcome, &[Opened], "compress error", || {
            BridgeError::EngineFailure("UpdateItems error".into())
        })?;
        self.session.set_state(Compressed);
        Ok(())
    }

    /// Compresses with [`DefaultCompressHandler`].
    pub fn compress(&mut self) -> Result<(), BridgeError> {
        self.compress_with(&mut DefaultCompressHandler)
    }

    /// Finishes the session and closes the output. In-memory outputs hand
    /// back the archive bytes.
    pub fn close(&mut self) -> Result<Option<Vec<u8>>, BridgeError> {
        match self.session.state() {
            Closed => return Ok(None),
            Error => {
                self.items.clear();
                self.output = None;
                self.session.set_state(Closed);
                return Ok(None);
            }
            _ => {}
        }
        self.session.begin(&[Opened, Compressed])?;
        self.items.clear();
        self.session.settle(&[Opened, Compressed], "close error")?;

        let data = match self.output.take().as_ref().and_then(take_sink) {
            Some(sink) => match sink.finish() {
                Ok(data) => data,
                Err(e) => return self.session.fail(e.into()),
            },
            None => None,
        };
        self.session.set_state(Closed);
        Ok(data)
    }

    /// Queues `data` stored as `name`.
    pub fn add_data(&mut self, data: impl Into<Arc<[u8]>>, name: &str) -> Result<(), BridgeError> {
        let name = archive_name(Path::new(name), "filename")?;
        self.add_item(UpdateItem::buffer(name, data))
    }

    /// Queues the file at the relative `path`, stored under that path.
    pub fn add_file(&mut self, path: &Path) -> Result<(), BridgeError> {
        let name = archive_name(path, "filename")?;
        self.queue_file(path, name)
    }

    /// Queues the file at `path`, stored as `name`.
    pub fn add_file_as(&mut self, path: &Path, name: &str) -> Result<(), BridgeError> {
        let name = archive_name(Path::new(name), "as")?;
        self.queue_file(path, name)
    }

    fn queue_file(&mut self, path: &Path, name: String) -> Result<(), BridgeError> {
        let item = UpdateItem::file(name, path).map_err(|e| BridgeError::io(e, path))?;
        self.add_item(item)
    }

    /// Queues a directory entry.
    pub fn mkdir(&mut self, name: &str) -> Result<(), BridgeError> {
        let name = archive_name(Path::new(name), "directory_name")?;
        self.add_item(UpdateItem::dir(name))
    }

    /// Queues the relative directory `dir` and everything below it.
    pub fn add_directory(&mut self, dir: &Path) -> Result<(), BridgeError> {
        let name = archive_name(dir, "directory")?;
        self.queue_tree(dir, &name)
    }

    /// Queues `dir` and everything below it under the archive path `name`.
    pub fn add_directory_as(&mut self, dir: &Path, name: &str) -> Result<(), BridgeError> {
        let name = archive_name(Path::new(name), "as")?;
        self.queue_tree(dir, &name)
    }

    fn queue_tree(&mut self, dir: &Path, base: &str) -> Result<(), BridgeError> {
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf());
                BridgeError::io(e.into(), path)
            })?;
            let rel = entry.path().strip_prefix(dir).unwrap_or(entry.path());
            let name = if rel.as_os_str().is_empty() {
                base.to_string()
            } else {
                archive_name(&Path::new(base).join(rel), "entry")?
            };

            let kind = entry.file_type();
            if kind.is_file() {
                self.queue_file(entry.path(), name)?;
            } else if kind.is_dir() {
                let meta = entry.metadata().map_err(|e| BridgeError::io(e.into(), entry.path()))?;
                let (ctime, atime, mtime) = fsx::file_times(&meta);
                self.add_item(UpdateItem::dir(name).with_times(ctime, atime, mtime))?;
            } else {
                return Err(BridgeError::InvalidArgument(format!("{} is invalid entry", entry.path().display())));
            }
        }
        Ok(())
    }
}

/// Normalises a path for storage in an archive: relative, non-empty and
/// `/`-separated.
fn archive_name(path: &Path, what: &str) -> Result<String, BridgeError> {
    let cleaned = clean_path(path);
    if cleaned.as_os_str().is_empty() {
        return Err(BridgeError::InvalidArgument(format!(
            "{what} should contain valid pathname. {}",
            path.display()
        )));
    }
    let mut parts = Vec::new();
    for comp in cleaned.components() {
        match comp {
            Component::Normal(part) => parts.push(part.to_string_lossy()),
            Component::ParentDir => parts.push("..".into()),
            _ => {
                return Err(BridgeError::InvalidArgument(format!(
                    "{what} should be relative. {}",
                    path.display()
                )))
            }
        }
    }
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn archive_names_are_relative_and_clean() {
        assert_eq!(archive_name(Path::new("a/./b/../c.txt"), "x").unwrap(), "a/c.txt");
        let err = archive_name(Path::new("/etc/passwd"), "filename").unwrap_err();
        assert_eq!(err.to_string(), "filename should be relative. /etc/passwd");
        let err = archive_name(Path::new("."), "as").unwrap_err();
        assert!(err.to_string().starts_with("as should contain valid pathname"));
    }

    #[test]
    fn default_handler_sources() {
        let mut h = DefaultCompressHandler;
        let buffer = UpdateItem::buffer("a", b"abc".to_vec());
        match h.stream(&buffer).unwrap() {
            Some(ItemSource::Reader(mut r)) => {
                let mut s = Vec::new();
                r.read_to_end(&mut s).unwrap();
                assert_eq!(s, b"abc");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(h.stream(&UpdateItem::dir("d")).unwrap().is_none());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"x").unwrap();
        let file = UpdateItem::file("f", &path).unwrap();
        assert!(matches!(h.stream(&file).unwrap(), Some(ItemSource::Path(p)) if p == path));
    }
}
