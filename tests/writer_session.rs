mod common;

use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{MemArchive, MemEngine};
use sevenbridge::engine::Format;
use sevenbridge::host::{Host, HostException, LocalHost};
use sevenbridge::info::UpdateItem;
use sevenbridge::options::Method;
use sevenbridge::session::SessionState;
use sevenbridge::writer::{CompressHandler, DefaultCompressHandler, ItemSource};
use sevenbridge::BridgeError;

fn memory_archive(bytes: Option<Vec<u8>>) -> MemArchive {
    MemArchive::parse(&bytes.expect("in-memory sink returns its bytes")).expect("valid archive")
}

#[test]
fn compress_queued_items_into_memory() {
    let host = LocalHost::new();
    let _token = host.enter();
    let engine = MemEngine::default();
    let mut writer = common::writer(&host, &engine, Format::SevenZip);

    writer.open(Cursor::new(Vec::new()), None).unwrap();
    writer.add_data(b"hello".to_vec(), "greeting.txt").unwrap();
    writer.mkdir("empty").unwrap();
    writer.add_data(b"nested".to_vec(), "a/./b/../c.txt").unwrap();
    assert_eq!(writer.items().len(), 3);

    writer.compress().unwrap();
    assert_eq!(writer.state(), SessionState::Compressed);
    // second compress is a no-op
    writer.compress().unwrap();

    let archive = memory_archive(writer.close().unwrap());
    assert_eq!(writer.state(), SessionState::Closed);
    let paths: Vec<_> = archive.items.iter().map(|i| i.path.as_str()).collect();
    assert_eq!(paths, ["greeting.txt", "empty", "a/c.txt"]);
    assert_eq!(archive.items[0].data, b"hello");
    assert!(archive.items[1].dir);
    assert!(archive.items[0].mtime.is_some());
    assert_eq!(archive.password, None);
}

#[test]
fn options_reach_the_engine() {
    let host = LocalHost::new();
    let _token = host.enter();
    let engine = MemEngine::default();
    let mut writer = common::writer(&host, &engine, Format::SevenZip);

    let options = writer.options_mut().unwrap();
    options.set_method(Method::Ppmd);
    options.set_level(9).unwrap();
    options.solid = false;
    writer.open(Cursor::new(Vec::new()), Some("pw")).unwrap();
    writer.add_data(b"x".to_vec(), "x").unwrap();
    writer.compress().unwrap();

    let archive = memory_archive(writer.close().unwrap());
    assert_eq!(archive.password.as_deref(), Some("pw"));
    let prop = |name: &str| archive.props.iter().find(|(n, _)| n == name).map(|(_, v)| v.clone());
    assert_eq!(prop("0").as_deref(), Some("PPMD"));
    assert_eq!(prop("x").as_deref(), Some("9"));
    assert_eq!(prop("s").as_deref(), Some("false"));
}

#[test]
fn invalid_level_is_rejected_before_compress() {
    let host = LocalHost::new();
    let _token = host.enter();
    let engine = MemEngine::default();
    let mut writer = common::writer(&host, &engine, Format::SevenZip);
    let err = writer.options_mut().unwrap().set_level(4).unwrap_err();
    assert_eq!(err.to_string(), "level should be 0, 1, 3, 5, 7 or 9");
    assert_eq!(writer.state(), SessionState::Initial);

    writer.options_mut().unwrap().set_level(0).unwrap();
    assert_eq!(writer.options().unwrap().method(), Method::Copy);
}

#[test]
fn rejected_options_leave_session_open() {
    let host = LocalHost::new();
    let _token = host.enter();
    let engine = MemEngine { reject_options: true, ..MemEngine::default() };
    let mut writer = common::writer(&host, &engine, Format::SevenZip);
    writer.open(Cursor::new(Vec::new()), None).unwrap();
    writer.add_data(b"x".to_vec(), "x").unwrap();

    let err = writer.compress().unwrap_err();
    assert!(matches!(err, BridgeError::InvalidArgument(_)));
    assert_eq!(err.to_string(), "Invalid option");
    assert_eq!(writer.state(), SessionState::Opened);
}

#[test]
fn formats_without_options_refuse_them() {
    let host = LocalHost::new();
    let _token = host.enter();
    let engine = MemEngine::default();
    let mut writer = common::writer(&host, &engine, Format::Zip);
    assert!(writer.options().is_none());

    writer.open(Cursor::new(Vec::new()), None).unwrap();
    writer.add_data(b"zip".to_vec(), "z.txt").unwrap();
    writer.compress().unwrap();
    let archive = memory_archive(writer.close().unwrap());
    assert!(archive.props.is_empty());
}

#[test]
fn engine_failure_forces_error() {
    let host = LocalHost::new();
    let _token = host.enter();
    let engine = MemEngine { fail_updates: true, ..MemEngine::default() };
    let mut writer = common::writer(&host, &engine, Format::SevenZip);
    writer.open(Cursor::new(Vec::new()), None).unwrap();
    writer.add_data(b"x".to_vec(), "x").unwrap();

    let err = writer.compress().unwrap_err();
    assert!(matches!(err, BridgeError::EngineFailure(_)));
    assert_eq!(err.to_string(), "UpdateItems error");
    assert_eq!(writer.state(), SessionState::Error);

    assert_eq!(writer.add_data(b"y".to_vec(), "y").unwrap_err().to_string(), "Invalid operation");
    assert_eq!(writer.close().unwrap(), None);
    assert_eq!(writer.state(), SessionState::Closed);
}

/// Serves every buffer item from the host, counting the calls.
struct CountingHandler {
    host: Arc<LocalHost>,
    streams: Arc<AtomicUsize>,
    results: Vec<(String, bool)>,
    fail_on: Option<&'static str>,
}

impl CompressHandler for CountingHandler {
    fn stream(&mut self, item: &UpdateItem) -> Result<Option<ItemSource>, HostException> {
        assert!(self.host.token().held_by_current_thread());
        self.streams.fetch_add(1, Ordering::SeqCst);
        if self.fail_on == Some(item.path.as_str()) {
            return Err(format!("no data for {}", item.path).into());
        }
        DefaultCompressHandler.stream(item)
    }

    fn result(&mut self, item: &UpdateItem, success: bool) -> Result<(), HostException> {
        self.results.push((item.path.clone(), success));
        Ok(())
    }
}

#[test]
fn custom_handler_supplies_data() {
    let host = LocalHost::new();
    let _token = host.enter();
    let engine = MemEngine::default();
    let mut writer = common::writer(&host, &engine, Format::SevenZip);
    writer.open(Cursor::new(Vec::new()), None).unwrap();
    writer.add_data(b"one".to_vec(), "1.txt").unwrap();
    writer.mkdir("dir").unwrap();
    writer.add_data(b"two".to_vec(), "2.txt").unwrap();

    let streams = Arc::new(AtomicUsize::new(0));
    let mut handler = CountingHandler { host: host.clone(), streams: streams.clone(), results: Vec::new(), fail_on: None };
    writer.compress_with(&mut handler).unwrap();
    assert_eq!(streams.load(Ordering::SeqCst), 2);
    assert_eq!(handler.results, vec![("1.txt".to_string(), true), ("2.txt".to_string(), true)]);
    let archive = memory_archive(writer.close().unwrap());
    assert_eq!(archive.items[2].data, b"two");
}

#[test]
fn handler_exception_wins_over_engine_code() {
    let host = LocalHost::new();
    let _token = host.enter();
    let engine = MemEngine::default();
    let mut writer = common::writer(&host, &engine, Format::SevenZip);
    writer.open(Cursor::new(Vec::new()), None).unwrap();
    writer.add_data(b"one".to_vec(), "1.txt").unwrap();
    writer.add_data(b"two".to_vec(), "2.txt").unwrap();

    let mut handler =
        CountingHandler { host: host.clone(), streams: Arc::default(), results: Vec::new(), fail_on: Some("2.txt") };
    let err = writer.compress_with(&mut handler).unwrap_err();
    assert_eq!(err.to_string(), "no data for 2.txt");
    assert!(err.host_exception().is_some());
    assert_eq!(writer.state(), SessionState::Error);
}

#[test]
fn files_and_directories_from_disk() {
    let src = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(src.path().join("tree/sub")).unwrap();
    std::fs::write(src.path().join("tree/a.txt"), b"alpha").unwrap();
    std::fs::write(src.path().join("tree/sub/b.txt"), b"beta").unwrap();
    std::fs::write(src.path().join("single.txt"), b"single").unwrap();

    let host = LocalHost::new();
    let _token = host.enter();
    let engine = MemEngine::default();
    let out = src.path().join("out.7z");
    let mut writer = common::writer(&host, &engine, Format::SevenZip);
    writer.open_file(&out, None).unwrap();
    writer.add_directory_as(&src.path().join("tree"), "tree").unwrap();
    writer.add_file_as(&src.path().join("single.txt"), "renamed.txt").unwrap();
    writer.compress().unwrap();
    assert_eq!(writer.close().unwrap(), None);

    let mut bytes = Vec::new();
    std::fs::File::open(&out).unwrap().read_to_end(&mut bytes).unwrap();
    let archive = MemArchive::parse(&bytes).unwrap();
    let paths: Vec<_> = archive.items.iter().map(|i| i.path.as_str()).collect();
    assert_eq!(paths, ["tree", "tree/a.txt", "tree/sub", "tree/sub/b.txt", "renamed.txt"]);
    assert_eq!(archive.items[3].data, b"beta");
    assert_eq!(archive.items[4].data, b"single");
}

#[test]
fn absolute_names_are_refused() {
    let host = LocalHost::new();
    let _token = host.enter();
    let engine = MemEngine::default();
    let mut writer = common::writer(&host, &engine, Format::SevenZip);
    writer.open(Cursor::new(Vec::new()), None).unwrap();
    let err = writer.add_data(b"x".to_vec(), "/etc/passwd").unwrap_err();
    assert_eq!(err.to_string(), "filename should be relative. /etc/passwd");
    assert_eq!(writer.state(), SessionState::Opened);
}

#[test]
fn written_archive_reads_back() {
    let host = LocalHost::new();
    let _token = host.enter();
    let engine = MemEngine::default();
    let mut writer = common::writer(&host, &engine, Format::SevenZip);
    writer.open(Cursor::new(Vec::new()), Some("k")).unwrap();
    writer.add_data(b"round".to_vec(), "r.txt").unwrap();
    writer.compress().unwrap();
    let bytes = writer.close().unwrap().unwrap();

    let mut reader = common::reader(&host, &engine, Format::SevenZip);
    reader.open(Cursor::new(bytes), Some("k")).unwrap();
    assert_eq!(reader.extract_data(0).unwrap().as_deref(), Some(&b"round"[..]));
    reader.close().unwrap();
}
