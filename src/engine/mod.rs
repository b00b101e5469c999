//! # Engine Interfaces
//!
//! The archive engine is an external library; these traits are the whole of
//! what the bridge expects from it and what it hands back for callbacks.
//! Every method reports an [`EngineResult`]; engines signal cancellation with
//! [`EngineError::Abort`] and everything else with a failure code.

pub mod binding;
pub mod format;

pub use binding::EngineBinding;
pub use format::{ClassId, Format};

use std::io::SeekFrom;

use crate::prop::{PropId, PropVariant};

/// Engine status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("operation aborted")]
    Abort,
    #[error("operation failed")]
    Fail,
    #[error("not implemented")]
    NotImpl,
    #[error("invalid argument")]
    InvalidArg,
    #[error("engine error code {0:#010x}")]
    Code(u32),
}

pub type EngineResult<T = ()> = Result<T, EngineError>;

pub trait InStream: Send {
    fn read(&mut self, buf: &mut [u8]) -> EngineResult<usize>;
    fn seek(&mut self, pos: SeekFrom) -> EngineResult<u64>;
}

pub trait SequentialOutStream: Send {
    fn write(&mut self, buf: &[u8]) -> EngineResult<usize>;
}

pub trait OutStream: SequentialOutStream {
    fn seek(&mut self, pos: SeekFrom) -> EngineResult<u64>;
    fn set_size(&mut self, size: u64) -> EngineResult;
}

/// What the engine intends to do with the item whose stream it asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AskMode {
    Extract,
    Test,
    Skip,
}

/// Per-item outcome reported by the engine after extracting or testing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationResult {
    Ok,
    UnsupportedMethod,
    DataError,
    CrcError,
    Other(i32),
}

impl OperationResult {
    pub fn is_ok(self) -> bool {
        self == OperationResult::Ok
    }
}

pub trait OpenCallback: Send {
    fn set_total(&mut self, files: Option<u64>, bytes: Option<u64>) -> EngineResult;
    fn set_completed(&mut self, files: Option<u64>, bytes: Option<u64>) -> EngineResult;
    fn password(&mut self) -> EngineResult<String>;
}

pub trait ExtractCallback: Send {
    fn set_total(&mut self, total: u64) -> EngineResult;
    fn set_completed(&mut self, completed: u64) -> EngineResult;
    /// `Ok(None)` tells the engine to skip writing the item's data.
    fn get_stream(&mut self, index: u32, mode: AskMode) -> EngineResult<Option<Box<dyn SequentialOutStream>>>;
    fn prepare_operation(&mut self, mode: AskMode) -> EngineResult;
    fn set_operation_result(&mut self, result: OperationResult) -> EngineResult;
    fn password(&mut self) -> EngineResult<String>;
}

/// How the engine should treat one item of an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ItemUpdate {
    pub new_data: bool,
    pub new_properties: bool,
    pub index_in_archive: Option<u32>,
}

pub trait UpdateCallback: Send {
    fn set_total(&mut self, total: u64) -> EngineResult;
    fn set_completed(&mut self, completed: u64) -> EngineResult;
    fn update_item_info(&mut self, index: u32) -> EngineResult<ItemUpdate>;
    fn property(&mut self, index: u32, id: PropId) -> EngineResult<PropVariant>;
    /// `Ok(None)` for items without data, such as directories.
    fn get_stream(&mut self, index: u32) -> EngineResult<Option<Box<dyn InStream>>>;
    fn set_operation_result(&mut self, result: OperationResult) -> EngineResult;
    /// `Ok(None)` when the archive is written without a password.
    fn password(&mut self) -> EngineResult<Option<String>>;
}

/// An archive opened for reading.
pub trait InArchive: Send {
    fn open(&mut self, stream: Box<dyn InStream>, callback: &mut dyn OpenCallback) -> EngineResult;
    fn close(&mut self) -> EngineResult;
    fn item_count(&self) -> EngineResult<u32>;
    fn property(&self, index: u32, id: PropId) -> EngineResult<PropVariant>;
    fn archive_property(&self, id: PropId) -> EngineResult<PropVariant>;
    /// Extracts or tests (`test`) the given items, or all of them for `None`.
    fn extract(&mut self, indices: Option<&[u32]>, test: bool, callback: &mut dyn ExtractCallback) -> EngineResult;
}

/// An archive being written.
pub trait OutArchive: Send {
    fn update_items(&mut self, out: Box<dyn OutStream>, count: u32, callback: &mut dyn UpdateCallback) -> EngineResult;

    /// Coder properties, by name. Writers without tunables keep the default.
    fn set_properties(&mut self, props: &[(String, PropVariant)]) -> EngineResult {
        let _ = props;
        Err(EngineError::NotImpl)
    }
}

/// Creates archive objects by format class id. Implemented by engine libraries.
pub trait EngineFactory: Send + Sync {
    fn create_reader(&self, format: &ClassId) -> EngineResult<Box<dyn InArchive>>;
    fn create_writer(&self, format: &ClassId) -> EngineResult<Box<dyn OutArchive>>;
}
