//! In-memory engine used by the integration tests.
//!
//! Archives are JSON documents. The reader keeps its input stream and reads it
//! again on every extraction, so stream callbacks cross the event loop the same
//! way they do with a real engine.

#![allow(dead_code)]

use std::io::SeekFrom;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use sevenbridge::config::DispatchConfig;
use sevenbridge::engine::{
    AskMode, ClassId, EngineBinding, EngineError, EngineFactory, EngineResult, ExtractCallback, Format, InArchive,
    InStream, OpenCallback, OperationResult, OutArchive, OutStream, UpdateCallback,
};
use sevenbridge::host::{Host, LocalHost};
use sevenbridge::options::{Method, LEVELS};
use sevenbridge::prop::{PropId, PropVariant};
use sevenbridge::reader::ArchiveReader;
use sevenbridge::writer::ArchiveWriter;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemItem {
    pub path: String,
    #[serde(default)]
    pub dir: bool,
    #[serde(default)]
    pub anti: bool,
    #[serde(default)]
    pub data: Vec<u8>,
    #[serde(default)]
    pub mtime: Option<u64>,
    #[serde(default)]
    pub attrib: u32,
    /// Reported as a CRC failure when extracted or tested.
    #[serde(default)]
    pub corrupt: bool,
}

impl MemItem {
    pub fn file(path: &str, data: &[u8]) -> Self {
        Self { path: path.into(), data: data.to_vec(), attrib: 0x20, ..Default::default() }
    }

    pub fn dir(path: &str) -> Self {
        Self { path: path.into(), dir: true, attrib: 0x10, ..Default::default() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemArchive {
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub props: Vec<(String, String)>,
    pub items: Vec<MemItem>,
}

impl MemArchive {
    pub fn new(items: Vec<MemItem>) -> Self {
        Self { items, ..Default::default() }
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap()
    }

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}

/// Counters shared between an engine and the test inspecting it.
#[derive(Debug, Default)]
pub struct EngineStats {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub extract_reads: AtomicUsize,
    /// Engine threads the callbacks were issued from.
    pub threads: Mutex<Vec<std::thread::ThreadId>>,
}

#[derive(Debug, Clone, Default)]
pub struct MemEngine {
    pub stats: Arc<EngineStats>,
    /// Fail every update after reading all items.
    pub fail_updates: bool,
    /// Refuse every coder property.
    pub reject_options: bool,
}

fn mem_class(format: &ClassId) -> bool {
    *format == Format::SevenZip.class_id() || *format == Format::Zip.class_id()
}

impl EngineFactory for MemEngine {
    fn create_reader(&self, format: &ClassId) -> EngineResult<Box<dyn InArchive>> {
        if !mem_class(format) {
            return Err(EngineError::NotImpl);
        }
        Ok(Box::new(MemReader { stats: self.stats.clone(), stream: None, archive: None, size: 0 }))
    }

    fn create_writer(&self, format: &ClassId) -> EngineResult<Box<dyn OutArchive>> {
        if !mem_class(format) {
            return Err(EngineError::NotImpl);
        }
        Ok(Box::new(MemWriter {
            stats: self.stats.clone(),
            props: Vec::new(),
            tunable: *format == Format::SevenZip.class_id() && !self.reject_options,
            fail: self.fail_updates,
        }))
    }
}

fn read_all(stream: &mut dyn InStream) -> EngineResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut buf = [0u8; 7];
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Ok(out);
        }
        out.extend_from_slice(&buf[..n]);
    }
}

fn write_all(stream: &mut dyn sevenbridge::engine::SequentialOutStream, mut data: &[u8]) -> EngineResult {
    while !data.is_empty() {
        let n = stream.write(&data[..data.len().min(5)])?;
        if n == 0 {
            return Err(EngineError::Fail);
        }
        data = &data[n..];
    }
    Ok(())
}

pub struct MemReader {
    stats: Arc<EngineStats>,
    stream: Option<Box<dyn InStream>>,
    archive: Option<MemArchive>,
    size: u64,
}

impl MemReader {
    fn archive(&self) -> EngineResult<&MemArchive> {
        self.archive.as_ref().ok_or(EngineError::Fail)
    }

    fn record_thread(&self) {
        self.stats.threads.lock().unwrap().push(std::thread::current().id());
    }
}

impl InArchive for MemReader {
    fn open(&mut self, mut stream: Box<dyn InStream>, callback: &mut dyn OpenCallback) -> EngineResult {
        self.record_thread();
        stream.seek(SeekFrom::Start(0))?;
        let bytes = read_all(stream.as_mut())?;
        let archive = MemArchive::parse(&bytes).ok_or(EngineError::Fail)?;
        callback.set_total(Some(archive.items.len() as u64), Some(bytes.len() as u64))?;
        if let Some(expected) = &archive.password {
            if callback.password()? != *expected {
                return Err(EngineError::Fail);
            }
        }
        callback.set_completed(Some(archive.items.len() as u64), Some(bytes.len() as u64))?;
        self.size = bytes.len() as u64;
        self.archive = Some(archive);
        self.stream = Some(stream);
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) -> EngineResult {
        self.stream = None;
        self.archive = None;
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn item_count(&self) -> EngineResult<u32> {
        Ok(self.archive()?.items.len() as u32)
    }

    fn property(&self, index: u32, id: PropId) -> EngineResult<PropVariant> {
        let archive = self.archive()?;
        let item = archive.items.get(index as usize).ok_or(EngineError::InvalidArg)?;
        Ok(match id {
            PropId::Path => PropVariant::Str(item.path.clone()),
            PropId::IsDir => PropVariant::Bool(item.dir),
            PropId::IsAnti => PropVariant::Bool(item.anti),
            PropId::Size if !item.dir => PropVariant::UI8(item.data.len() as u64),
            PropId::PackSize if !item.dir => PropVariant::UI8(item.data.len() as u64),
            PropId::MTime => item.mtime.map_or(PropVariant::Empty, PropVariant::FileTime),
            PropId::Attrib => PropVariant::UI4(item.attrib),
            PropId::Crc if !item.dir => PropVariant::UI4(crc32fast::hash(&item.data)),
            PropId::Encrypted => PropVariant::Bool(archive.password.is_some()),
            PropId::Method => PropVariant::Str("Copy".into()),
            _ => PropVariant::Empty,
        })
    }

    fn archive_property(&self, id: PropId) -> EngineResult<PropVariant> {
        let archive = self.archive()?;
        Ok(match id {
            PropId::Method => PropVariant::Str("Copy".into()),
            PropId::Solid => PropVariant::Bool(false),
            PropId::NumBlocks => PropVariant::UI4(archive.items.len() as u32),
            PropId::PhySize => PropVariant::UI8(self.size),
            _ => PropVariant::Empty,
        })
    }

    fn extract(&mut self, indices: Option<&[u32]>, test: bool, callback: &mut dyn ExtractCallback) -> EngineResult {
        self.record_thread();
        let stream = self.stream.as_mut().ok_or(EngineError::Fail)?;
        stream.seek(SeekFrom::Start(0))?;
        let archive = MemArchive::parse(&read_all(stream.as_mut())?).ok_or(EngineError::Fail)?;
        self.stats.extract_reads.fetch_add(1, Ordering::SeqCst);

        let all: Vec<u32> = (0..archive.items.len() as u32).collect();
        let indices = indices.unwrap_or(&all);
        let total = indices.iter().filter_map(|&i| archive.items.get(i as usize)).map(|i| i.data.len() as u64).sum();
        callback.set_total(total)?;

        let key_ok = match &archive.password {
            Some(expected) => callback.password()? == *expected,
            None => true,
        };
        let mode = if test { AskMode::Test } else { AskMode::Extract };
        let mut done = 0;
        for &index in indices {
            let item = archive.items.get(index as usize).ok_or(EngineError::InvalidArg)?;
            let out = callback.get_stream(index, mode)?;
            callback.prepare_operation(mode)?;
            if let Some(mut out) = out {
                if key_ok && !item.corrupt {
                    write_all(out.as_mut(), &item.data)?;
                }
            }
            let result = if !key_ok {
                OperationResult::DataError
            } else if item.corrupt {
                OperationResult::CrcError
            } else {
                OperationResult::Ok
            };
            callback.set_operation_result(result)?;
            done += item.data.len() as u64;
            callback.set_completed(done)?;
        }
        Ok(())
    }
}

pub struct MemWriter {
    stats: Arc<EngineStats>,
    props: Vec<(String, String)>,
    tunable: bool,
    fail: bool,
}

fn render(value: &PropVariant) -> String {
    match value {
        PropVariant::Str(s) => s.clone(),
        PropVariant::UI4(n) => n.to_string(),
        PropVariant::Bool(b) => b.to_string(),
        other => format!("{other:?}"),
    }
}

impl OutArchive for MemWriter {
    fn set_properties(&mut self, props: &[(String, PropVariant)]) -> EngineResult {
        if !self.tunable {
            return Err(EngineError::NotImpl);
        }
        for (name, value) in props {
            let valid = match (name.as_str(), value) {
                ("0", PropVariant::Str(m)) => Method::ALL.iter().any(|k| k.engine_name() == m),
                ("x", PropVariant::UI4(level)) => LEVELS.contains(level),
                ("s" | "hc" | "he" | "mt", PropVariant::Bool(_)) => true,
                _ => false,
            };
            if !valid {
                return Err(EngineError::InvalidArg);
            }
            self.props.push((name.clone(), render(value)));
        }
        Ok(())
    }

    fn update_items(&mut self, mut out: Box<dyn OutStream>, count: u32, callback: &mut dyn UpdateCallback) -> EngineResult {
        self.stats.threads.lock().unwrap().push(std::thread::current().id());
        let password = callback.password()?;
        callback.set_total(u64::from(count))?;
        let mut items = Vec::new();
        for index in 0..count {
            let update = callback.update_item_info(index)?;
            let path = match callback.property(index, PropId::Path)? {
                PropVariant::Str(path) => path,
                _ => return Err(EngineError::InvalidArg),
            };
            let dir = callback.property(index, PropId::IsDir)? == PropVariant::Bool(true);
            let anti = callback.property(index, PropId::IsAnti)? == PropVariant::Bool(true);
            let mtime = match callback.property(index, PropId::MTime)? {
                PropVariant::FileTime(ft) => Some(ft),
                _ => None,
            };
            let attrib = match callback.property(index, PropId::Attrib)? {
                PropVariant::UI4(a) => a,
                _ => 0,
            };
            let mut data = Vec::new();
            if update.new_data && !dir {
                if let Some(mut input) = callback.get_stream(index)? {
                    data = read_all(input.as_mut())?;
                }
            }
            callback.set_operation_result(OperationResult::Ok)?;
            callback.set_completed(u64::from(index) + 1)?;
            items.push(MemItem { path, dir, anti, data, mtime, attrib, corrupt: false });
        }
        if self.fail {
            return Err(EngineError::Fail);
        }

        let archive = MemArchive { password, props: self.props.clone(), items };
        let bytes = archive.to_bytes();
        out.seek(SeekFrom::Start(0))?;
        out.set_size(0)?;
        write_all(out.as_mut(), &bytes)
    }
}

pub fn binding(engine: MemEngine) -> Arc<EngineBinding> {
    EngineBinding::from_factory(engine)
}

/// A fast progress interval so tests see every notification.
pub fn config() -> DispatchConfig {
    DispatchConfig { progress_interval: std::time::Duration::ZERO, ..DispatchConfig::default() }
}

pub fn reader(host: &Arc<LocalHost>, engine: &MemEngine, format: Format) -> ArchiveReader {
    let host: Arc<dyn Host> = host.clone();
    ArchiveReader::with_binding(binding(engine.clone()), host, format, &config())
}

pub fn writer(host: &Arc<LocalHost>, engine: &MemEngine, format: Format) -> ArchiveWriter {
    let host: Arc<dyn Host> = host.clone();
    ArchiveWriter::with_binding(binding(engine.clone()), host, format, &config())
}
