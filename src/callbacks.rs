//! Engine callback objects for open, extract and update.
//!
//! Each bridge lives on the calling thread's stack for the duration of one
//! native engine call. Whatever touches host objects (handlers, item
//! descriptors, host streams) is submitted to the event loop; a refused or
//! failed action turns into an engine failure code so the engine unwinds.

use crate::dispatch::Requester;
use crate::engine::{
    AskMode, EngineError, EngineResult, ExtractCallback, InStream, ItemUpdate, OpenCallback,
    OperationResult, SequentialOutStream, UpdateCallback,
};
use crate::info::{EntryInfo, UpdateItem};
use crate::progress::ProgressTracker;
use crate::prop::{datetime_to_filetime, PropId, PropVariant};
use crate::reader::ExtractHandler;
use crate::streams::{shared_sink, take_sink, FileInStream, HostInStream, HostOutStream, SharedSink};
use crate::writer::{CompressHandler, ItemSource};

fn check_fault(requester: &Requester) -> EngineResult {
    if requester.is_faulted() {
        Err(EngineError::Abort)
    } else {
        Ok(())
    }
}

fn give_password(password: &Option<String>) -> EngineResult<String> {
    password.clone().ok_or(EngineError::Abort)
}

pub struct OpenBridge {
    requester: Requester,
    password: Option<String>,
}

impl OpenBridge {
    pub fn new(requester: Requester, password: Option<String>) -> Self {
        Self { requester, password }
    }
}

impl OpenCallback for OpenBridge {
    fn set_total(&mut self, _files: Option<u64>, _bytes: Option<u64>) -> EngineResult {
        check_fault(&self.requester)
    }

    fn set_completed(&mut self, _files: Option<u64>, _bytes: Option<u64>) -> EngineResult {
        check_fault(&self.requester)
    }

    fn password(&mut self) -> EngineResult<String> {
        give_password(&self.password)
    }
}

struct Processing {
    index: u32,
    mode: AskMode,
    sink: Option<SharedSink>,
}

/// Bridges extraction and testing to an [`ExtractHandler`].
pub struct ExtractBridge<'a> {
    requester: Requester,
    entries: &'a [EntryInfo],
    handler: Option<&'a mut dyn ExtractHandler>,
    password: Option<String>,
    progress: ProgressTracker,
    current: Option<Processing>,
    test_results: Option<&'a mut [OperationResult]>,
}

impl<'a> ExtractBridge<'a> {
    pub fn extract(
        requester: Requester,
        entries: &'a [EntryInfo],
        handler: &'a mut dyn ExtractHandler,
        password: Option<String>,
        progress: ProgressTracker,
    ) -> Self {
        Self {
            requester,
            entries,
            handler: Some(handler),
            password,
            progress,
            current: None,
            test_results: None,
        }
    }

    /// A bridge for test runs: no handler, per-item results go to `results`.
    pub fn test(
        requester: Requester,
        results: &'a mut [OperationResult],
        password: Option<String>,
        progress: ProgressTracker,
    ) -> Self {
        Self {
            requester,
            entries: &[],
            handler: None,
            password,
            progress,
            current: None,
            test_results: Some(results),
        }
    }
}

impl ExtractCallback for ExtractBridge<'_> {
    fn set_total(&mut self, total: u64) -> EngineResult {
        check_fault(&self.requester)?;
        self.progress.set_total(total);
        Ok(())
    }

    fn set_completed(&mut self, completed: u64) -> EngineResult {
        check_fault(&self.requester)?;
        let Some(state) = self.progress.set_completed(completed) else { return Ok(()) };
        let Some(handler) = self.handler.as_deref_mut() else { return Ok(()) };
        if self.requester.run(|| handler.progress(&state)) {
            Ok(())
        } else {
            Err(EngineError::Fail)
        }
    }

    fn get_stream(&mut self, index: u32, mode: AskMode) -> EngineResult<Option<Box<dyn SequentialOutStream>>> {
        match mode {
            AskMode::Extract => {}
            AskMode::Test => {
                self.current = Some(Processing { index, mode, sink: None });
                return Ok(None);
            }
            AskMode::Skip => return Ok(None),
        }

        let entry = self.entries.get(index as usize).ok_or(EngineError::InvalidArg)?;
        let handler = self.handler.as_deref_mut().ok_or(EngineError::Fail)?;
        let mut out = None;
        let ok = self.requester.run(|| {
            out = handler.stream(entry)?;
            Ok(())
        });
        if !ok {
            self.current = None;
            return Err(EngineError::Fail);
        }

        match out {
            Some(sink) => {
                let sink = shared_sink(sink);
                self.current = Some(Processing { index, mode, sink: Some(sink.clone()) });
                Ok(Some(Box::new(HostOutStream::new(sink, self.requester.clone()))))
            }
            None => {
                self.current = Some(Processing { index, mode, sink: None });
                Ok(None)
            }
        }
    }

    fn prepare_operation(&mut self, _mode: AskMode) -> EngineResult {
        Ok(())
    }

    fn set_operation_result(&mut self, result: OperationResult) -> EngineResult {
        let Some(processing) = self.current.take() else { return Ok(()) };
        match processing.mode {
            AskMode::Test => {
                if let Some(slot) = self
                    .test_results
                    .as_deref_mut()
                    .and_then(|results| results.get_mut(processing.index as usize))
                {
                    *slot = result;
                }
                Ok(())
            }
            AskMode::Skip => Ok(()),
            AskMode::Extract => {
                let Some(sink) = processing.sink else { return Ok(()) };
                let entry = self.entries.get(processing.index as usize).ok_or(EngineError::InvalidArg)?;
                let handler = self.handler.as_deref_mut().ok_or(EngineError::Fail)?;
                let mut sink = take_sink(&sink);
                let ok = self.requester.run(|| match sink.take() {
                    Some(sink) => handler.result(entry, sink, result.is_ok()),
                    None => Ok(()),
                });
                if ok {
                    Ok(())
                } else {
                    Err(EngineError::Fail)
                }
            }
        }
    }

    fn password(&mut self) -> EngineResult<String> {
        give_password(&self.password)
    }
}

/// Bridges an update to the writer's queued items and a [`CompressHandler`].
pub struct UpdateBridge<'a> {
    requester: Requester,
    items: &'a [UpdateItem],
    handler: &'a mut dyn CompressHandler,
    password: Option<String>,
    progress: ProgressTracker,
    current: Option<u32>,
}

impl<'a> UpdateBridge<'a> {
    pub fn new(
        requester: Requester,
        items: &'a [UpdateItem],
        handler: &'a mut dyn CompressHandler,
        password: Option<String>,
        progress: ProgressTracker,
    ) -> Self {
        Self { requester, items, handler, password, progress, current: None }
    }

    fn item(&self, index: u32) -> EngineResult<&'a UpdateItem> {
        self.items.get(index as usize).ok_or(EngineError::InvalidArg)
    }
}

fn item_property(item: &UpdateItem, id: PropId) -> PropVariant {
    match id {
        PropId::IsAnti => PropVariant::Bool(item.anti),
        PropId::Path => PropVariant::Str(item.path.clone()),
        PropId::IsDir => PropVariant::Bool(item.is_dir()),
        PropId::Size => PropVariant::UI8(item.size),
        PropId::Attrib => PropVariant::UI4(item.attrib),
        PropId::CTime => PropVariant::FileTime(datetime_to_filetime(&item.ctime)),
        PropId::ATime => PropVariant::FileTime(datetime_to_filetime(&item.atime)),
        PropId::MTime => PropVariant::FileTime(datetime_to_filetime(&item.mtime)),
        PropId::PosixAttrib => PropVariant::UI4(item.posix_attrib),
        PropId::User => item.user.clone().map_or(PropVariant::Empty, PropVariant::Str),
        PropId::Group => item.group.clone().map_or(PropVariant::Empty, PropVariant::Str),
        other => {
            tracing::warn!(prop = ?other, "unknown property requested for update item");
            PropVariant::Empty
        }
    }
}

impl UpdateCallback for UpdateBridge<'_> {
    fn set_total(&mut self, total: u64) -> EngineResult {
        check_fault(&self.requester)?;
        self.progress.set_total(total);
        Ok(())
    }

    fn set_completed(&mut self, completed: u64) -> EngineResult {
        check_fault(&self.requester)?;
        let Some(state) = self.progress.set_completed(completed) else { return Ok(()) };
        let handler = &mut *self.handler;
        if self.requester.run(|| handler.progress(&state)) {
            Ok(())
        } else {
            Err(EngineError::Fail)
        }
    }

    fn update_item_info(&mut self, index: u32) -> EngineResult<ItemUpdate> {
        let item = self.item(index)?;
        let mut update = ItemUpdate::default();
        let ok = self.requester.run(|| {
            update = ItemUpdate {
                new_data: item.new_data,
                new_properties: item.new_properties,
                index_in_archive: item.index_in_archive,
            };
            Ok(())
        });
        if ok {
            Ok(update)
        } else {
            Err(EngineError::Fail)
        }
    }

    fn property(&mut self, index: u32, id: PropId) -> EngineResult<PropVariant> {
        let item = self.item(index)?;
        let mut value = PropVariant::Empty;
        if self.requester.run(|| {
            value = item_property(item, id);
            Ok(())
        }) {
            Ok(value)
        } else {
            Err(EngineError::Fail)
        }
    }

    fn get_stream(&mut self, index: u32) -> EngineResult<Option<Box<dyn InStream>>> {
        self.current = None;
        let item = self.item(index)?;
        let handler = &mut *self.handler;
        let mut source = None;
        let ok = self.requester.run(|| {
            source = handler.stream(item)?;
            Ok(())
        });
        if !ok {
            return Err(EngineError::Fail);
        }

        // Only host readers get a result notification; files are read natively.
        Ok(match source {
            None => None,
            Some(ItemSource::Path(path)) => Some(Box::new(FileInStream::open(&path))),
            Some(ItemSource::Reader(reader)) => {
                self.current = Some(index);
                Some(Box::new(HostInStream::new(reader, self.requester.clone())))
            }
        })
    }

    fn set_operation_result(&mut self, result: OperationResult) -> EngineResult {
        let Some(index) = self.current.take() else { return Ok(()) };
        let item = self.item(index)?;
        let handler = &mut *self.handler;
        if self.requester.run(|| handler.result(item, result.is_ok())) {
            Ok(())
        } else {
            Err(EngineError::Fail)
        }
    }

    fn password(&mut self) -> EngineResult<Option<String>> {
        Ok(self.password.clone())
    }
}
