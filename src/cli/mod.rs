use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::engine::Format;
use crate::options::Method;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Engine library to load. Defaults to SEVENBRIDGE_ENGINE, then the platform library next to this binary.
    #[arg(long, global = true)]
    pub engine: Option<PathBuf>,

    /// Archive format. Guessed from the archive's extension when omitted, falling back to 7z.
    #[arg(long, global = true)]
    pub format: Option<Format>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Create a new archive from specified files and directories.
    #[command(alias = "c")]
    Create {
        /// One or more input files or directories to add to the archive.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// The path for the output archive file (e.g., my_archive.7z).
        #[arg(short, long)]
        output: PathBuf,

        /// Set a password to encrypt the archive. If not provided, SEVENBRIDGE_PASSWORD is used when set.
        #[arg(long)]
        password: Option<String>,

        /// Compression method for 7z archives: LZMA, LZMA2, PPMd, BZIP2, DEFLATE or COPY.
        #[arg(long)]
        method: Option<Method>,

        /// Compression level for 7z archives (0, 1, 3, 5, 7 or 9).
        #[arg(long)]
        level: Option<u32>,

        /// Disable solid compression.
        #[arg(long = "no-solid", action = clap::ArgAction::SetFalse)]
        solid: bool,

        /// Encrypt the archive headers too. Requires a password.
        #[arg(long)]
        encrypt_headers: bool,
    },

    /// Extract files from an archive.
    #[command(alias = "x")]
    Extract {
        /// The archive file to extract.
        #[arg(required = true)]
        archive: PathBuf,

        /// Specific files or directories to extract. If empty, all files will be extracted.
        files: Vec<PathBuf>,

        /// The directory where files will be extracted. Defaults to the current directory.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// The password for decrypting the archive. If not provided, will try to read from SEVENBRIDGE_PASSWORD.
        #[arg(long)]
        password: Option<String>,

        /// Prompt for the password when none was given.
        #[arg(short = 'p', long)]
        ask_password: bool,
    },

    /// List the contents of an archive without extracting it.
    #[command(alias = "l")]
    List {
        /// The archive file to list contents of.
        #[arg(required = true)]
        archive: PathBuf,

        #[arg(long)]
        password: Option<String>,

        /// Print archive and entry metadata as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Test the integrity of every entry.
    #[command(alias = "t")]
    Test {
        #[arg(required = true)]
        archive: PathBuf,

        #[arg(long)]
        password: Option<String>,

        /// Report the outcome of each entry.
        #[arg(long)]
        detail: bool,
    },
}

/// Parses command-line arguments using `clap`.
pub fn run() -> Result<Args, Box<dyn std::error::Error>> {
    Ok(Args::try_parse()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_create_options() {
        let args = Args::try_parse_from([
            "sevenbridge", "c", "a", "b", "-o", "out.7z", "--method", "ppmd", "--level", "9", "--no-solid",
        ])
        .unwrap();
        match args.command {
            Commands::Create { inputs, method, level, solid, .. } => {
                assert_eq!(inputs.len(), 2);
                assert_eq!(method, Some(Method::Ppmd));
                assert_eq!(level, Some(9));
                assert!(!solid);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn global_engine_and_format() {
        let args = Args::try_parse_from(["sevenbridge", "list", "x.zip", "--engine", "/e.so", "--format", "zip"]).unwrap();
        assert_eq!(args.engine, Some(PathBuf::from("/e.so")));
        assert_eq!(args.format, Some(Format::Zip));
    }

    #[test]
    fn unknown_method_is_rejected() {
        assert!(Args::try_parse_from(["sevenbridge", "create", "a", "-o", "o.7z", "--method", "zstd"]).is_err());
    }
}
