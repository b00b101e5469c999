//! Reading archives: open, enumerate, extract and test.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::callbacks::{ExtractBridge, OpenBridge};
use crate::config::DispatchConfig;
use crate::dispatch::Dispatcher;
use crate::engine::{EngineBinding, EngineResult, Format, InArchive, OperationResult};
use crate::error::BridgeError;
use crate::fsx;
use crate::host::{Host, HostException, Wrapped};
use crate::info::{clean_path, ArchiveInfo, EntryInfo, ARCHIVE_PROPS, ENTRY_PROPS};
use crate::progress::{ProgressState, ProgressTracker};
use crate::prop::{PropVariant, Value};
use crate::session::{Session, SessionState};
use crate::streams::{HostInStream, InputSource, OutputSink};

use SessionState::*;

/// Host side of an extraction. Every call runs on the event loop under the
/// host token; an `Err` stops the extraction and is re-raised by the caller.
pub trait ExtractHandler: Send {
    /// Where to write `entry`. `None` skips its data.
    fn stream(&mut self, entry: &EntryInfo) -> Result<Option<Box<dyn OutputSink>>, HostException>;

    /// Hands back the sink returned for `entry` once the engine is done with it.
    fn result(&mut self, entry: &EntryInfo, sink: Box<dyn OutputSink>, success: bool) -> Result<(), HostException>;

    fn progress(&mut self, state: &ProgressState) -> Result<(), HostException> {
        let _ = state;
        Ok(())
    }
}

/// Per-entry outcome of a detailed test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TestOutcome {
    Ok,
    UnsupportedMethod,
    DataError,
    CrcError,
    Other(i32),
}

impl From<OperationResult> for TestOutcome {
    fn from(result: OperationResult) -> Self {
        match result {
            OperationResult::Ok => TestOutcome::Ok,
            OperationResult::UnsupportedMethod => TestOutcome::UnsupportedMethod,
            OperationResult::DataError => TestOutcome::DataError,
            OperationResult::CrcError => TestOutcome::CrcError,
            OperationResult::Other(code) => TestOutcome::Other(code),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestReport {
    Passed(bool),
    Detailed(Vec<TestOutcome>),
}

/// A read session on one archive.
pub struct ArchiveReader {
    archive: Wrapped<Box<dyn InArchive>>,
    session: Session,
    format: Format,
    password: Option<String>,
    password_specified: bool,
    entries: Option<Vec<EntryInfo>>,
    progress_interval: Duration,
    // Last, so the archive is gone before the library can be unloaded.
    binding: Arc<EngineBinding>,
}

impl std::fmt::Debug for ArchiveReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveReader")
            .field("format", &self.format)
            .field("session", &self.session)
            .field("live", &self.archive.is_live())
            .finish_non_exhaustive()
    }
}

impl ArchiveReader {
    /// A reader for `format` on the process engine binding.
    pub fn new(host: Arc<dyn Host>, format: Format) -> Result<Self, BridgeError> {
        Ok(Self::with_binding(EngineBinding::current()?, host, format, &DispatchConfig::default()))
    }

    /// A reader on an explicit binding. If the engine cannot create the
    /// archive object the reader starts out in the `Error` state.
    pub fn with_binding(binding: Arc<EngineBinding>, host: Arc<dyn Host>, format: Format, config: &DispatchConfig) -> Self {
        let mut session = Session::new(Dispatcher::new(host, config));
        let archive = match binding.factory().create_reader(&format.class_id()) {
            Ok(archive) => Wrapped::Live(archive),
            Err(e) => {
                tracing::warn!(%format, error = %e, "engine cannot create reader");
                session.set_state(Error);
                Wrapped::Uninitialized
            }
        };
        Self {
            archive,
            session,
            format,
            password: None,
            password_specified: false,
            entries: None,
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

    /// Opens the archive read from `source`. Without a password the engine is
    /// given an empty one if it asks, and a failed open is reported as if
    /// that empty password had been given.
    pub fn open(&mut self, source: impl InputSource + 'static, password: Option<&str>) -> Result<(), BridgeError> {
        self.session.begin(&[Initial])?;
        self.entries = None;
        self.password_specified = true;
        self.password = Some(password.unwrap_or_default().to_string());

        let source: Box<dyn InputSource> = Box::new(source);
        let password = self.password.clone();
        let Some(archive) = self.archive.get_mut() else {
            return self.session.fail(BridgeError::invalid_operation("Open error"));
        };
        let outcome = self.session.execute(|requester| {
            let stream = HostInStream::new(source, requester.clone());
            let mut callback = OpenBridge::new(requester.clone(), password);
            archive.open(Box::new(stream), &mut callback)
        })?;

        let password_specified = self.password_specified;
        self.session
            .settle_engine(outcome, &[Initial], "Open error", || BridgeError::OpenFailed { password_specified })?;
        self.session.set_state(Opened);
        Ok(())
    }

    /// Opens the archive file at `path`.
    pub fn open_file(&mut self, path: &Path, password: Option<&str>) -> Result<(), BridgeError> {
        let file = fsx::File::open(path).map_err(|e| BridgeError::io(e, path))?;
        self.open(file, password)
    }

    /// Closes the archive. Closing twice is a no-op; closing a failed session
    /// only marks it closed.
    pub fn close(&mut self) -> Result<(), BridgeError> {
        match self.session.state() {
            Closed => return Ok(()),
            Error => {
                self.entries = None;
                self.session.set_state(Closed);
                return Ok(());
            }
            _ => {}
        }
        self.session.begin(&[Opened])?;
        let Some(archive) = self.archive.get_mut() else {
            return self.session.fail(BridgeError::invalid_operation("Close error"));
        };
        let outcome = self.session.execute(|_| archive.close())?;
        self.entries = None;

        self.session.settle(&[Opened], "Close error")?;
        if let Err(e) = outcome {
            tracing::warn!(error = %e, "engine failed to close archive");
        }
        self.session.set_state(Closed);
        Ok(())
    }

    pub fn entry_count(&mut self) -> Result<u32, BridgeError> {
        self.session.begin(&[Opened])?;
        let Some(archive) = self.archive.get_mut() else {
            return self.session.fail(BridgeError::invalid_operation("entryNum error"));
        };
        let outcome = self.session.execute(|_| archive.item_count())?;
        self.session.settle_engine(outcome, &[Opened], "entryNum error", || {
            BridgeError::EngineFailure("Cannot get number of items".into())
        })
    }

    pub fn archive_info(&mut self) -> Result<ArchiveInfo, BridgeError> {
        self.session.begin(&[Opened])?;
        let Some(archive) = self.archive.get_mut() else {
            return self.session.fail(BridgeError::invalid_operation("getArchiveProperty error"));
        };
        let props = self.session.execute(|_| {
            ARCHIVE_PROPS.map(|(id, vt)| archive.archive_property(id).map(|p| p.expect(vt)).unwrap_or_default())
        })?;
        self.session.settle(&[Opened], "getArchiveProperty error")?;
        Ok(ArchiveInfo::from_values(props.map(Value::from)))
    }

    /// Entry `index`, or `None` past the end.
    pub fn entry(&mut self, index: u32) -> Result<Option<EntryInfo>, BridgeError> {
        self.session.begin(&[Opened])?;
        self.fill_entries()?;
        self.session.settle(&[Opened], "getEntryInfo error")?;
        Ok(self.cached_entries().get(index as usize).cloned())
    }

    pub fn entries(&mut self) -> Result<Vec<EntryInfo>, BridgeError> {
        self.session.begin(&[Opened])?;
        self.fill_entries()?;
        self.session.settle(&[Opened], "getAllEntryInfo error")?;
        Ok(self.cached_entries().to_vec())
    }

    fn cached_entries(&self) -> &[EntryInfo] {
        self.entries.as_deref().unwrap_or_default()
    }

    /// Reads every entry's properties once per open archive.
    fn fill_entries(&mut self) -> Result<(), BridgeError> {
        if self.entries.is_some() {
            return Ok(());
        }
        let Some(archive) = self.archive.get_mut() else {
            return self.session.fail(BridgeError::invalid_operation("Invalid operation"));
        };
        let listed = self.session.execute(|_| -> EngineResult<Vec<[PropVariant; 12]>> {
            let count = archive.item_count()?;
            Ok((0..count)
                .map(|idx| {
                    ENTRY_PROPS.map(|(id, vt)| archive.property(idx, id).map(|p| p.expect(vt)).unwrap_or_default())
                })
                .collect())
        })?;

        let listed = match listed {
            Ok(listed) => listed,
            Err(_) => return self.session.fail(BridgeError::EngineFailure("Cannot get number of items".into())),
        };
        if self.session.state() == Error {
            return self.session.fail(BridgeError::EngineFailure("Cannot get property of items".into()));
        }
        let entries = listed
            .into_iter()
            .zip(0u32..)
            .map(|(props, index)| EntryInfo::from_values(index, props.map(Value::from)))
            .collect();
        self.entries = Some(entries);
        Ok(())
    }

    fn run_extract(
        &mut self,
        indices: Option<&[u32]>,
        handler: &mut dyn ExtractHandler,
        state_msg: &str,
        engine_msg: &str,
    ) -> Result<(), BridgeError> {
        self.session.begin(&[Opened])?;
        self.fill_entries()?;

        let Some(archive) = self.archive.get_mut() else {
            return self.session.fail(BridgeError::invalid_operation(state_msg));
        };
        let entries = self.entries.as_deref().unwrap_or_default();
        let password = self.password.clone();
        let progress = ProgressTracker::new(self.progress_interval);
        let outcome = self.session.execute(|requester| {
            let mut callback = ExtractBridge::extract(requester.clone(), entries, handler, password, progress);
            archive.extract(indices, false, &mut callback)
        })?;
        self.session
            .settle_engine(outcome, &[Opened], state_msg, || BridgeError::EngineFailure(engine_msg.to_string()))
    }

    /// Extracts entry `index` through `handler`.
    pub fn extract(&mut self, index: u32, handler: &mut dyn ExtractHandler) -> Result<(), BridgeError> {
        self.run_extract(Some(&[index]), handler, "extract error", "Invalid file format. extract")
    }

    /// Extracts the given entries, in the order the engine visits them.
    pub fn extract_files(&mut self, indices: &[u32], handler: &mut dyn ExtractHandler) -> Result<(), BridgeError> {
        self.run_extract(Some(indices), handler, "extractFiles error", "Invalid file format. extractFiles")
    }

    pub fn extract_all(&mut self, handler: &mut dyn ExtractHandler) -> Result<(), BridgeError> {
        self.run_extract(None, handler, "extractAll error", "Invalid file format. extractAll")
    }

    /// Tests every entry. With `detail` the outcome of each entry is returned.
    pub fn test_all(&mut self, detail: bool) -> Result<TestReport, BridgeError> {
        self.session.begin(&[Opened])?;
        let Some(archive) = self.archive.get_mut() else {
            return self.session.fail(BridgeError::invalid_operation("testAll error"));
        };
        let counted = self.session.execute(|_| archive.item_count())?;
        self.session.settle(&[Opened], "testAll error")?;
        let count = match counted {
            Ok(count) if self.session.state() != Error => count,
            _ => return self.session.fail(BridgeError::EngineFailure("Cannot get number of items".into())),
        };

        let mut results = vec![OperationResult::Ok; count as usize];
        let Some(archive) = self.archive.get_mut() else {
            return self.session.fail(BridgeError::invalid_operation("testAll error"));
        };
        let password = self.password.clone();
        let progress = ProgressTracker::new(self.progress_interval);
        let outcome = self.session.execute(|requester| {
            let mut callback = ExtractBridge::test(requester.clone(), &mut results, password, progress);
            archive.extract(None, true, &mut callback)
        })?;
        self.session.settle_engine(outcome, &[Opened], "testAll error", || {
            BridgeError::EngineFailure("Archive corrupted.".into())
        })?;

        Ok(if detail {
            TestReport::Detailed(results.into_iter().map(TestOutcome::from).collect())
        } else {
            TestReport::Passed(results.iter().all(|r| r.is_ok()))
        })
    }

    /// Whether every entry tests clean. Any error counts as a failure.
    pub fn test(&mut self) -> bool {
        matches!(self.test_all(false), Ok(TestReport::Passed(true)))
    }

    pub fn verify(&mut self) -> bool {
        self.test()
    }

    /// Per-entry test outcomes, or `None` if the test could not run.
    pub fn verify_detail(&mut self) -> Option<Vec<TestOutcome>> {
        match self.test_all(true) {
            Ok(TestReport::Detailed(outcomes)) => Some(outcomes),
            _ => None,
        }
    }

    /// Extracts entry `index` below `dir`.
    pub fn extract_to(&mut self, index: u32, dir: &Path) -> Result<(), BridgeError> {
        self.extract(index, &mut FileExtractor::new(dir))
    }

    /// Extracts the given entries below `dir`. Duplicates are ignored.
    pub fn extract_files_to(&mut self, indices: &[u32], dir: &Path) -> Result<(), BridgeError> {
        let mut list = indices.to_vec();
        list.sort_unstable();
        list.dedup();
        self.extract_files(&list, &mut FileExtractor::new(dir))
    }

    pub fn extract_all_to(&mut self, dir: &Path) -> Result<(), BridgeError> {
        self.extract_all(&mut FileExtractor::new(dir))
    }

    /// Extracts below `dir` the entries for which `pred` holds.
    pub fn extract_if(&mut self, dir: &Path, mut pred: impl FnMut(&EntryInfo) -> bool) -> Result<(), BridgeError> {
        let selected: Vec<u32> = self.entries()?.iter().filter(|e| pred(e)).map(|e| e.index).collect();
        self.extract_files_to(&selected, dir)
    }

    /// Contents of entry `index`; `None` for directories, anti-items and
    /// indices past the end.
    pub fn extract_data(&mut self, index: u32) -> Result<Option<Vec<u8>>, BridgeError> {
        match self.entry(index)? {
            Some(entry) if entry.has_data() => {}
            _ => return Ok(None),
        }
        let mut collector = DataCollector::for_indices(&[index]);
        self.extract(index, &mut collector)?;
        Ok(collector.into_output().into_iter().next().flatten())
    }

    /// Contents of the given entries, positioned as in `indices`.
    pub fn extract_files_data(&mut self, indices: &[u32]) -> Result<Vec<Option<Vec<u8>>>, BridgeError> {
        let mut collector = DataCollector::for_indices(indices);
        let mut list = indices.to_vec();
        list.sort_unstable();
        list.dedup();
        self.extract_files(&list, &mut collector)?;
        Ok(collector.into_output())
    }

    /// Contents of every entry, by index.
    pub fn extract_all_data(&mut self) -> Result<Vec<Option<Vec<u8>>>, BridgeError> {
        let count = self.entries()?.len() as u32;
        let indices: Vec<u32> = (0..count).collect();
        let mut collector = DataCollector::for_indices(&indices);
        self.extract_all(&mut collector)?;
        Ok(collector.into_output())
    }
}

/// Writes extracted entries below a directory, restoring attributes and times.
#[derive(Debug)]
pub struct FileExtractor {
    base: PathBuf,
}

#[derive(Debug, thiserror::Error)]
#[error("entry path escapes the target directory: {0}")]
pub struct UnsafePath(pub PathBuf);

impl FileExtractor {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn target(&self, entry: &EntryInfo) -> Result<PathBuf, HostException> {
        let rel = clean_path(&entry.path);
        let escapes = rel
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
        if escapes {
            return Err(Box::new(UnsafePath(entry.path.clone())));
        }
        Ok(self.base.join(rel))
    }

    fn restore_metadata(path: &Path, entry: &EntryInfo) {
        if let Some(attrib) = entry.attrib {
            if let Err(e) = fsx::set_file_attribute(path, attrib) {
                tracing::warn!(path = %path.display(), error = %e, "cannot restore attributes");
            }
        }
        if let Err(e) = fsx::set_file_times(path, entry.atime, entry.mtime) {
            tracing::warn!(path = %path.display(), error = %e, "cannot restore times");
        }
    }
}

impl ExtractHandler for FileExtractor {
    fn stream(&mut self, entry: &EntryInfo) -> Result<Option<Box<dyn OutputSink>>, HostException> {
        let path = self.target(entry)?;
        if entry.anti {
            match fsx::symlink_metadata(&path) {
                Ok(meta) if meta.is_dir() => fsx::remove_dir_all(&path)?,
                Ok(_) => fsx::remove_file(&path)?,
                Err(_) => {}
            }
            return Ok(None);
        }
        if entry.is_dir() {
            fsx::create_dir_all(&path)?;
            Self::restore_metadata(&path, entry);
            return Ok(None);
        }
        if let Some(parent) = path.parent() {
            fsx::create_dir_all(parent)?;
        }
        Ok(Some(Box::new(fsx::File::create(&path)?)))
    }

    fn result(&mut self, entry: &EntryInfo, sink: Box<dyn OutputSink>, _success: bool) -> Result<(), HostException> {
        sink.finish()?;
        if !entry.anti {
            Self::restore_metadata(&self.target(entry)?, entry);
        }
        Ok(())
    }
}

/// Collects extracted entries in memory.
#[derive(Debug, Default)]
pub struct DataCollector {
    positions: HashMap<u32, Vec<usize>>,
    output: Vec<Option<Vec<u8>>>,
}

impl DataCollector {
    /// Output slot `i` receives the data of entry `indices[i]`.
    pub fn for_indices(indices: &[u32]) -> Self {
        let mut positions: HashMap<u32, Vec<usize>> = HashMap::new();
        for (pos, &index) in indices.iter().enumerate() {
            positions.entry(index).or_default().push(pos);
        }
        Self { positions, output: vec![None; indices.len()] }
    }

    pub fn into_output(self) -> Vec<Option<Vec<u8>>> {
        self.output
    }
}

impl ExtractHandler for DataCollector {
    fn stream(&mut self, entry: &EntryInfo) -> Result<Option<Box<dyn OutputSink>>, HostException> {
        if !entry.has_data() {
            return Ok(None);
        }
        Ok(Some(Box::new(Cursor::new(Vec::new()))))
    }

    fn result(&mut self, entry: &EntryInfo, sink: Box<dyn OutputSink>, _success: bool) -> Result<(), HostException> {
        let data = sink.finish()?;
        for &pos in self.positions.get(&entry.index).into_iter().flatten() {
            self.output[pos] = data.clone();
        }
        Ok(())
    }
}
