//! Descriptors exchanged with host code: archive and entry metadata read from
//! an archive, and the items queued for writing one.

use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::fsx;
use crate::prop::{PropId, Value, VarType};

/// Archive-level properties queried for [`ArchiveInfo`], with their expected types.
pub(crate) const ARCHIVE_PROPS: [(PropId, VarType); 5] = [
    (PropId::Method, VarType::Str),
    (PropId::Solid, VarType::Bool),
    (PropId::NumBlocks, VarType::UI4),
    (PropId::HeadersSize, VarType::UI8),
    (PropId::PhySize, VarType::UI8),
];

/// Per-item properties queried for [`EntryInfo`], with their expected types.
pub(crate) const ENTRY_PROPS: [(PropId, VarType); 12] = [
    (PropId::Path, VarType::Str),
    (PropId::Method, VarType::Str),
    (PropId::IsDir, VarType::Bool),
    (PropId::Encrypted, VarType::Bool),
    (PropId::IsAnti, VarType::Bool),
    (PropId::Size, VarType::UI8),
    (PropId::PackSize, VarType::UI8),
    (PropId::CTime, VarType::FileTime),
    (PropId::ATime, VarType::FileTime),
    (PropId::MTime, VarType::FileTime),
    (PropId::Attrib, VarType::UI4),
    (PropId::Crc, VarType::UI4),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveInfo {
    pub method: Option<String>,
    pub solid: bool,
    pub num_blocks: Option<u64>,
    pub header_size: Option<u64>,
    pub phy_size: Option<u64>,
}

impl ArchiveInfo {
    pub(crate) fn from_values(values: [Value; 5]) -> Self {
        let [method, solid, num_blocks, header_size, phy_size] = values;
        Self {
            method: method.as_str().map(str::to_owned),
            solid: solid.as_bool().unwrap_or(false),
            num_blocks: num_blocks.as_u64(),
            header_size: header_size.as_u64(),
            phy_size: phy_size.as_u64(),
        }
    }

    /// Physical size of the archive in bytes.
    pub fn size(&self) -> Option<u64> {
        self.phy_size
    }
}

impl fmt::Display for ArchiveInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#<ArchiveInfo: {}, {}byte>",
            self.method.as_deref().unwrap_or(""),
            self.phy_size.unwrap_or(0)
        )
    }
}

/// Metadata of one archive item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryInfo {
    pub index: u32,
    pub path: PathBuf,
    pub method: Option<String>,
    pub dir: bool,
    pub encrypted: bool,
    pub anti: bool,
    pub size: Option<u64>,
    pub pack_size: Option<u64>,
    pub ctime: Option<DateTime<Utc>>,
    pub atime: Option<DateTime<Utc>>,
    pub mtime: Option<DateTime<Utc>>,
    pub attrib: Option<u32>,
    pub crc: Option<u32>,
}

impl EntryInfo {
    pub(crate) fn from_values(index: u32, values: [Value; 12]) -> Self {
        let [path, method, dir, encrypted, anti, size, pack_size, ctime, atime, mtime, attrib, crc] = values;
        let to_u32 = |v: Value| v.as_u64().and_then(|n| u32::try_from(n).ok());
        Self {
            index,
            path: clean_path(path.as_str().unwrap_or("")),
            method: method.as_str().map(str::to_owned),
            dir: dir.as_bool().unwrap_or(false),
            encrypted: encrypted.as_bool().unwrap_or(false),
            anti: anti.as_bool().unwrap_or(false),
            size: size.as_u64(),
            pack_size: pack_size.as_u64(),
            ctime: ctime.as_time(),
            atime: atime.as_time(),
            mtime: mtime.as_time(),
            attrib: to_u32(attrib),
            crc: to_u32(crc),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.dir
    }

    pub fn is_file(&self) -> bool {
        !self.dir
    }

    /// Whether extracting the entry produces data.
    pub fn has_data(&self) -> bool {
        !(self.dir || self.anti)
    }

    fn kind(&self) -> &'static str {
        if self.anti {
            "Anti"
        } else if self.dir {
            "Dir"
        } else {
            "File"
        }
    }
}

impl fmt::Display for EntryInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{} :{}]", self.kind(), self.index, self.path.display())
    }
}

/// Lexically normalises a path: drops `.` segments and folds `a/..`.
/// Leading `..` segments that cannot be folded are kept.
pub fn clean_path(path: impl AsRef<Path>) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for comp in path.as_ref().components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(comp),
            },
            other => out.push(other),
        }
    }
    out.iter().map(|c| c.as_os_str()).collect()
}

/// Data source of a queued item.
#[derive(Debug, Clone)]
pub enum ItemKind {
    /// In-memory contents.
    Buffer(Arc<[u8]>),
    Dir,
    /// Contents read from a file on disk when the item is compressed.
    File(PathBuf),
}

/// An item queued on a writer.
#[derive(Debug, Clone)]
pub struct UpdateItem {
    pub kind: ItemKind,
    pub path: String,
    pub index_in_archive: Option<u32>,
    pub new_data: bool,
    pub new_properties: bool,
    pub anti: bool,
    pub size: u64,
    pub attrib: u32,
    pub posix_attrib: u32,
    pub ctime: DateTime<Utc>,
    pub atime: DateTime<Utc>,
    pub mtime: DateTime<Utc>,
    pub user: Option<String>,
    pub group: Option<String>,
}

pub const ATTRIB_DIRECTORY: u32 = 0x10;
pub const ATTRIB_ARCHIVE: u32 = 0x20;

impl UpdateItem {
    fn new(kind: ItemKind, path: String, size: u64, attrib: u32) -> Self {
        let now = Utc::now();
        Self {
            kind,
            path,
            index_in_archive: None,
            new_data: true,
            new_properties: true,
            anti: false,
            size,
            attrib,
            posix_attrib: 0,
            ctime: now,
            atime: now,
            mtime: now,
            user: None,
            group: None,
        }
    }

    pub fn buffer(name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        let data = data.into();
        let size = data.len() as u64;
        Self::new(ItemKind::Buffer(data), name.into(), size, ATTRIB_ARCHIVE)
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self::new(ItemKind::Dir, name.into(), 0, ATTRIB_DIRECTORY)
    }

    /// Describes the file at `source`, stored in the archive as `name`.
    /// Size, attributes and times come from the file system.
    pub fn file(name: impl Into<String>, source: &Path) -> io::Result<Self> {
        let meta = fsx::metadata(source)?;
        let mut item = Self::new(ItemKind::File(source.to_path_buf()), name.into(), meta.len(), ATTRIB_ARCHIVE);
        item.attrib = fsx::file_attribute(source)?;
        let (ctime, atime, mtime) = fsx::file_times(&meta);
        item.ctime = ctime.unwrap_or(item.ctime);
        item.atime = atime.unwrap_or(item.atime);
        item.mtime = mtime.unwrap_or(item.mtime);
        Ok(item)
    }

    pub fn with_times(mut self, ctime: Option<DateTime<Utc>>, atime: Option<DateTime<Utc>>, mtime: Option<DateTime<Utc>>) -> Self {
        self.ctime = ctime.unwrap_or(self.ctime);
        self.atime = atime.unwrap_or(self.atime);
        self.mtime = mtime.unwrap_or(self.mtime);
        self
    }

    pub fn is_buffer(&self) -> bool {
        matches!(self.kind, ItemKind::Buffer(_))
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, ItemKind::Dir)
    }

    pub fn is_file(&self) -> bool {
        !self.is_dir()
    }

    pub fn data(&self) -> Option<&[u8]> {
        match &self.kind {
            ItemKind::Buffer(data) => Some(data),
            _ => None,
        }
    }

    pub fn source_path(&self) -> Option<&Path> {
        match &self.kind {
            ItemKind::File(path) => Some(path),
            _ => None,
        }
    }
}
