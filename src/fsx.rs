//! Cross-platform filesystem wrapper.
//!
//! Re-exports `std::fs` and adds the attribute and timestamp helpers used when
//! items are added to or extracted from an archive. Attributes use the archive
//! convention: Windows attribute bits in the low word and, when bit `0x8000`
//! is set, the Unix mode in the high word.

use std::io;
use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Utc};

pub use std::fs::*;

pub const ATTRIBUTE_READONLY: u32 = 0x01;
pub const ATTRIBUTE_DIRECTORY: u32 = 0x10;
pub const ATTRIBUTE_ARCHIVE: u32 = 0x20;
pub const ATTRIBUTE_UNIX_EXTENSION: u32 = 0x8000;

/// Builds an attribute word from a Unix mode.
pub fn attribute_from_mode(mode: u32, is_dir: bool) -> u32 {
    let mut attrib = if is_dir { ATTRIBUTE_DIRECTORY } else { ATTRIBUTE_ARCHIVE };
    if mode & 0o200 == 0 {
        attrib |= ATTRIBUTE_READONLY;
    }
    attrib | ATTRIBUTE_UNIX_EXTENSION | ((mode & 0xFFFF) << 16)
}

/// Unix mode carried in an attribute word, if it has one.
pub fn mode_from_attribute(attrib: u32) -> Option<u32> {
    if attrib & ATTRIBUTE_UNIX_EXTENSION != 0 {
        Some((attrib >> 16) & 0o7777)
    } else {
        None
    }
}

#[cfg(unix)]
/// Attribute word of `path`.
pub fn file_attribute(path: &Path) -> io::Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    let meta = std::fs::metadata(path)?;
    Ok(attribute_from_mode(meta.permissions().mode(), meta.is_dir()))
}

#[cfg(not(unix))]
/// Attribute word of `path`.
pub fn file_attribute(path: &Path) -> io::Result<u32> {
    let meta = std::fs::metadata(path)?;
    let mut attrib = if meta.is_dir() { ATTRIBUTE_DIRECTORY } else { ATTRIBUTE_ARCHIVE };
    if meta.permissions().readonly() {
        attrib |= ATTRIBUTE_READONLY;
    }
    Ok(attrib)
}

#[cfg(unix)]
/// Applies an attribute word to `path`: the Unix mode if present, otherwise
/// just the read-only bit.
pub fn set_file_attribute(path: &Path, attrib: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if let Some(mode) = mode_from_attribute(attrib) {
        return std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode));
    }
    let mut perms = std::fs::metadata(path)?.permissions();
    let mode = perms.mode();
    let mode = if attrib & ATTRIBUTE_READONLY != 0 { mode & !0o222 } else { mode | 0o200 };
    perms.set_mode(mode);
    std::fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
/// Applies the read-only bit of an attribute word to `path`.
pub fn set_file_attribute(path: &Path, attrib: u32) -> io::Result<()> {
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_readonly(attrib & ATTRIBUTE_READONLY != 0);
    std::fs::set_permissions(path, perms)
}

fn to_utc(t: io::Result<SystemTime>) -> Option<DateTime<Utc>> {
    t.ok().map(DateTime::<Utc>::from)
}

/// Creation, access and modification times, where the platform reports them.
pub fn file_times(meta: &Metadata) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    (to_utc(meta.created()), to_utc(meta.accessed()), to_utc(meta.modified()))
}

/// Sets access and modification times. Missing values keep the current time
/// of the file.
pub fn set_file_times(path: &Path, atime: Option<DateTime<Utc>>, mtime: Option<DateTime<Utc>>) -> io::Result<()> {
    if atime.is_none() && mtime.is_none() {
        return Ok(());
    }
    let file = std::fs::File::open(path)?;
    let mut times = FileTimes::new();
    if let Some(t) = atime {
        times = times.set_accessed(SystemTime::from(t));
    }
    if let Some(t) = mtime {
        times = times.set_modified(SystemTime::from(t));
    }
    file.set_times(times)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn mode_round_trips_through_attribute() {
        let attrib = attribute_from_mode(0o100644, false);
        assert_eq!(attrib & 0xFFFF, ATTRIBUTE_ARCHIVE | ATTRIBUTE_UNIX_EXTENSION);
        assert_eq!(mode_from_attribute(attrib), Some(0o644));

        let ro_dir = attribute_from_mode(0o040555, true);
        assert_ne!(ro_dir & ATTRIBUTE_DIRECTORY, 0);
        assert_ne!(ro_dir & ATTRIBUTE_READONLY, 0);
        assert_eq!(mode_from_attribute(0x20), None);
    }

    #[test]
    fn modification_time_is_restored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"x").unwrap();
        let t = Utc.timestamp_opt(1_234_567_890, 0).unwrap();
        set_file_times(&path, None, Some(t)).unwrap();
        let (_, _, mtime) = file_times(&std::fs::metadata(&path).unwrap());
        assert_eq!(mtime, Some(t));
    }

    #[cfg(unix)]
    #[test]
    fn unix_mode_is_applied() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"x").unwrap();
        set_file_attribute(&path, attribute_from_mode(0o600, false)).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(file_attribute(&path).unwrap() >> 16 & 0o777, 0o600);
    }
}
