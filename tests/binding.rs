mod common;

use std::io::Cursor;
use std::sync::Arc;

use common::{MemArchive, MemEngine, MemItem};
use sevenbridge::engine::{EngineBinding, Format};
use sevenbridge::host::LocalHost;
use sevenbridge::reader::ArchiveReader;
use sevenbridge::session::SessionState;
use sevenbridge::writer::ArchiveWriter;
use sevenbridge::BridgeError;

// One test: the binding is process-wide state.
#[test]
fn process_binding_lifecycle() {
    let host = LocalHost::new();
    let _token = host.enter();

    assert!(matches!(EngineBinding::current(), Err(BridgeError::BindingUnavailable)));
    let err = ArchiveReader::new(host.clone(), Format::SevenZip).err().unwrap();
    assert_eq!(err.to_string(), "engine binding is not initialized");

    let engine = MemEngine::default();
    let binding = EngineBinding::from_factory(engine.clone());
    EngineBinding::install(binding.clone()).unwrap();
    assert!(EngineBinding::install(EngineBinding::from_factory(MemEngine::default())).is_err());
    assert!(binding.origin().is_none());

    let mut writer = ArchiveWriter::new(host.clone(), Format::SevenZip).unwrap();
    assert!(Arc::ptr_eq(writer.binding(), &binding));
    writer.open(Cursor::new(Vec::new()), None).unwrap();
    writer.add_data(b"kept alive".to_vec(), "k.txt").unwrap();

    let mut reader = ArchiveReader::new(host.clone(), Format::SevenZip).unwrap();
    let archive = MemArchive::new(vec![MemItem::file("a", b"a")]);
    reader.open(Cursor::new(archive.to_bytes()), None).unwrap();

    // sessions hold the binding past teardown
    let removed = EngineBinding::teardown().unwrap();
    assert!(Arc::ptr_eq(&removed, &binding));
    assert!(EngineBinding::teardown().is_none());
    drop(removed);

    writer.compress().unwrap();
    assert!(writer.close().unwrap().is_some());
    assert_eq!(reader.extract_data(0).unwrap().as_deref(), Some(&b"a"[..]));
    reader.close().unwrap();
    assert_eq!(reader.state(), SessionState::Closed);

    assert!(ArchiveWriter::new(host.clone(), Format::SevenZip).is_err());
}

#[test]
fn missing_library_cannot_load() {
    let dir = tempfile::tempdir().unwrap();
    let err = EngineBinding::open(&dir.path().join("libmissing_engine.so")).unwrap_err();
    assert!(matches!(err, BridgeError::Library(_)));

    std::fs::write(dir.path().join("libbogus.so"), b"not a shared object").unwrap();
    assert!(EngineBinding::open(&dir.path().join("libbogus.so")).is_err());
}
