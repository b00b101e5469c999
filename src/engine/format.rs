//! Archive format class ids.

use std::fmt;
use std::str::FromStr;

use crate::error::BridgeError;

/// A format class id, laid out as a GUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.data4;
        write!(
            f,
            "{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
            self.data1, self.data2, self.data3, d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7]
        )
    }
}

/// Formats the bridge knows the class id of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Format {
    Zip,
    BZip2,
    Rar,
    Z,
    Lzh,
    #[default]
    SevenZip,
    Cab,
    Lzma,
    Wim,
    Iso,
    Tar,
    GZip,
}

impl Format {
    pub const ALL: [Format; 12] = [
        Format::Zip,
        Format::BZip2,
        Format::Rar,
        Format::Z,
        Format::Lzh,
        Format::SevenZip,
        Format::Cab,
        Format::Lzma,
        Format::Wim,
        Format::Iso,
        Format::Tar,
        Format::GZip,
    ];

    fn code(self) -> u8 {
        match self {
            Format::Zip => 0x01,
            Format::BZip2 => 0x02,
            Format::Rar => 0x03,
            Format::Z => 0x05,
            Format::Lzh => 0x06,
            Format::SevenZip => 0x07,
            Format::Cab => 0x08,
            Format::Lzma => 0x0A,
            Format::Wim => 0xE6,
            Format::Iso => 0xE7,
            Format::Tar => 0xEE,
            Format::GZip => 0xEF,
        }
    }

    /// `23170F69-40C1-278A-1000-000110XX0000`, XX being the format code.
    pub fn class_id(self) -> ClassId {
        ClassId {
            data1: 0x2317_0F69,
            data2: 0x40C1,
            data3: 0x278A,
            data4: [0x10, 0x00, 0x00, 0x01, 0x10, self.code(), 0x00, 0x00],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Format::Zip => "zip",
            Format::BZip2 => "bzip2",
            Format::Rar => "rar",
            Format::Z => "z",
            Format::Lzh => "lzh",
            Format::SevenZip => "7z",
            Format::Cab => "cab",
            Format::Lzma => "lzma",
            Format::Wim => "wim",
            Format::Iso => "iso",
            Format::Tar => "tar",
            Format::GZip => "gzip",
        }
    }

    /// Guesses the format from a file name's extension.
    pub fn from_extension(path: &std::path::Path) -> Option<Format> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "7z" => Some(Format::SevenZip),
            "zip" | "jar" => Some(Format::Zip),
            "bz2" | "tbz2" => Some(Format::BZip2),
            "gz" | "tgz" => Some(Format::GZip),
            "lha" => Some(Format::Lzh),
            other => other.parse().ok(),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Format {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        let alias = match lower.as_str() {
            "sevenzip" | "seven_zip" => "7z",
            "bz2" => "bzip2",
            "gz" => "gzip",
            other => other,
        };
        Format::ALL
            .into_iter()
            .find(|f| f.name() == alias)
            .ok_or_else(|| BridgeError::InvalidArgument(format!("Unknown archive format: {s}")))
    }
}
