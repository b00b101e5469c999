//! 7z writer tunables.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::BridgeError;
use crate::prop::PropVariant;

/// Coder used for item data in a 7z archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Method {
    Lzma,
    Lzma2,
    Ppmd,
    Bzip2,
    Deflate,
    Copy,
}

impl Method {
    pub const ALL: [Method; 6] =
        [Method::Lzma, Method::Lzma2, Method::Ppmd, Method::Bzip2, Method::Deflate, Method::Copy];

    /// Name the engine expects in the method property.
    pub fn engine_name(self) -> &'static str {
        match self {
            Method::Lzma => "LZMA",
            Method::Lzma2 => "LZMA2",
            Method::Ppmd => "PPMD",
            Method::Bzip2 => "BZIP2",
            Method::Deflate => "DEFLATE",
            Method::Copy => "COPY",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Ppmd => f.write_str("PPMd"),
            other => f.write_str(other.engine_name()),
        }
    }
}

impl FromStr for Method {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase();
        Method::ALL
            .into_iter()
            .find(|m| m.engine_name() == upper)
            .ok_or_else(|| BridgeError::InvalidArgument("Invalid method specified".into()))
    }
}

/// Levels the 7z coder accepts.
pub const LEVELS: [u32; 6] = [0, 1, 3, 5, 7, 9];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SevenZipOptions {
    method: Method,
    level: u32,
    pub solid: bool,
    pub header_compression: bool,
    pub header_encryption: bool,
    pub multi_threading: bool,
}

impl Default for SevenZipOptions {
    fn default() -> Self {
        Self {
            method: Method::Lzma,
            level: 5,
            solid: true,
            header_compression: true,
            header_encryption: false,
            multi_threading: true,
        }
    }
}

impl SevenZipOptions {
    pub fn method(&self) -> Method {
        self.method
    }

    /// Selects the coder. `Copy` also drops the level to 0.
    pub fn set_method(&mut self, method: Method) {
        if method == Method::Copy {
            self.level = 0;
        }
        self.method = method;
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    /// Sets the level. Level 0 switches the coder to `Copy`.
    pub fn set_level(&mut self, level: u32) -> Result<(), BridgeError> {
        match level {
            0 => self.method = Method::Copy,
            1 | 3 | 5 | 7 | 9 => {}
            _ => return Err(BridgeError::InvalidArgument("level should be 0, 1, 3, 5, 7 or 9".into())),
        }
        self.level = level;
        Ok(())
    }

    /// Engine properties, in the order the coder reads them.
    pub fn to_properties(&self) -> Vec<(String, PropVariant)> {
        vec![
            ("0".to_string(), PropVariant::Str(self.method.engine_name().to_string())),
            ("x".to_string(), PropVariant::UI4(self.level)),
            ("s".to_string(), PropVariant::Bool(self.solid)),
            ("hc".to_string(), PropVariant::Bool(self.header_compression)),
            ("he".to_string(), PropVariant::Bool(self.header_encryption)),
            ("mt".to_string(), PropVariant::Bool(self.multi_threading)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_parsing_is_case_insensitive() {
        assert_eq!("ppmd".parse::<Method>().unwrap(), Method::Ppmd);
        assert_eq!(Method::Ppmd.to_string(), "PPMd");
        assert_eq!("Lzma2".parse::<Method>().unwrap().to_string(), "LZMA2");
        let err = "zstd".parse::<Method>().unwrap_err();
        assert_eq!(err.to_string(), "Invalid method specified");
    }

    #[test]
    fn copy_and_level_zero_are_linked() {
        let mut opts = SevenZipOptions::default();
        opts.set_method(Method::Copy);
        assert_eq!(opts.level(), 0);

        let mut opts = SevenZipOptions::default();
        opts.set_level(0).unwrap();
        assert_eq!(opts.method(), Method::Copy);

        let mut opts = SevenZipOptions::default();
        assert!(opts.set_level(4).is_err());
        assert_eq!(opts.level(), 5);
        opts.set_level(9).unwrap();
        assert_eq!(opts.method(), Method::Lzma);
    }

    #[test]
    fn default_properties() {
        let props = SevenZipOptions::default().to_properties();
        let names: Vec<_> = props.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["0", "x", "s", "hc", "he", "mt"]);
        assert_eq!(props[0].1, PropVariant::Str("LZMA".into()));
        assert_eq!(props[1].1, PropVariant::UI4(5));
        assert_eq!(props[4].1, PropVariant::Bool(false));
    }
}
