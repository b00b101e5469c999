//! # sevenbridge
//!
//! Drives a dynamically loaded archive engine from a single-threaded host.
//!
//! The engine does the compression work on threads of its own and calls back
//! into the host for stream I/O, passwords, item metadata and progress. Host
//! code may only run on the thread that holds the host's execution token, so
//! every such callback is handed to a per-operation event loop that owns the
//! token, runs the callbacks one at a time in submission order, and reports
//! back the first exception any of them raised.
//!
//! ## Key Modules
//!
//! - [`host`]: the capabilities consumed from the embedding runtime, and [`host::LocalHost`].
//! - [`dispatch`]: the cross-thread action dispatcher and its event loop.
//! - [`engine`]: the engine traits and the process-wide [`engine::EngineBinding`].
//! - [`reader`] and [`writer`]: archive sessions built on top of both.
//!
//! ## Examples
//!
//! ```no_run
//! use std::path::Path;
//! use sevenbridge::engine::{EngineBinding, Format};
//! use sevenbridge::host::LocalHost;
//! use sevenbridge::reader::ArchiveReader;
//!
//! # fn main() -> Result<(), sevenbridge::BridgeError> {
//! EngineBinding::load(Path::new("libsevenbridge_engine.so"))?;
//! let host = LocalHost::new();
//! let _token = host.enter();
//!
//! let mut reader = ArchiveReader::new(host.clone(), Format::SevenZip)?;
//! reader.open_file(Path::new("data.7z"), None)?;
//! for entry in reader.entries()? {
//!     println!("{entry}");
//! }
//! reader.extract_all_to(Path::new("out"))?;
//! reader.close()?;
//! # Ok(())
//! # }
//! ```

pub mod callbacks;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub use error::BridgeError;

pub mod host;
pub mod info;
pub mod options;
pub mod progress;
pub mod prop;
pub mod reader;
pub mod session;
pub mod streams;
pub mod writer;

// Cross-platform filesystem wrapper
pub mod fsx;
