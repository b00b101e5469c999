//! Main entry point for the sevenbridge CLI app

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sevenbridge::cli::{self, Commands};
use sevenbridge::config::{self, LOG_ENV};
use sevenbridge::engine::{EngineBinding, Format};
use sevenbridge::host::{Host, LocalHost};
use sevenbridge::info::clean_path;
use sevenbridge::reader::{ArchiveReader, TestOutcome, TestReport};
use sevenbridge::writer::ArchiveWriter;
use tracing_subscriber::EnvFilter;

fn main() -> std::process::ExitCode {
    init_tracing();
    if let Err(e) = run_app() {
        match e.downcast_ref::<clap::Error>() {
            Some(clap_err) => {
                let _ = clap_err.print();
            }
            None => eprintln!("Error: {}", e),
        }
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV)
                .or_else(|_| EnvFilter::try_new("warn"))
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

fn pick_format(explicit: Option<Format>, archive: &Path) -> Format {
    explicit.or_else(|| Format::from_extension(archive)).unwrap_or_default()
}

fn run_app() -> Result<(), Box<dyn std::error::Error>> {
    let args = match cli::run() {
        Ok(args) => args,
        Err(e) => {
            if let Some(clap_err) = e.downcast_ref::<clap::Error>() {
                if !clap_err.use_stderr() {
                    clap_err.print()?;
                    return Ok(());
                }
            }
            return Err(e);
        }
    };

    let engine = config::engine_path(args.engine.as_deref()).ok_or("cannot locate the engine library; pass --engine")?;
    let binding = EngineBinding::load(&engine)?;
    tracing::debug!(engine = %engine.display(), "engine loaded");

    let local = LocalHost::new();
    let _token = local.enter();
    let host: Arc<dyn Host> = local.clone();

    match args.command {
        Commands::List { archive, password, json } => {
            let password = config::password_from_opt_or_env(password);
            let mut reader = ArchiveReader::new(host, pick_format(args.format, &archive))?;
            reader.open_file(&archive, password.as_deref())?;
            let entries = reader.entries()?;
            if json {
                let info = reader.archive_info()?;
                let doc = serde_json::json!({
                    "archive": info,
                    "entries": entries,
                });
                println!("{}", serde_json::to_string_pretty(&doc)?);
            } else {
                for entry in &entries {
                    let size = entry.size.map(|s| s.to_string()).unwrap_or_default();
                    let kind = if entry.is_dir() { "D" } else { " " };
                    println!("{kind} {size:>12}  {}", entry.path.display());
                }
                println!("{} entries", entries.len());
            }
            reader.close()?;
        }
        Commands::Extract { archive, files, output, password, ask_password } => {
            let password = config::resolve_password(password, ask_password)?;
            let out_dir = output.unwrap_or_else(|| PathBuf::from("."));
            let mut reader = ArchiveReader::new(host, pick_format(args.format, &archive))?;
            reader.open_file(&archive, password.as_deref())?;
            if files.is_empty() {
                reader.extract_all_to(&out_dir)?;
            } else {
                let wanted: Vec<PathBuf> = files.iter().map(clean_path).collect();
                reader.extract_if(&out_dir, |entry| wanted.iter().any(|w| entry.path.starts_with(w)))?;
            }
            reader.close()?;
        }
        Commands::Test { archive, password, detail } => {
            let password = config::password_from_opt_or_env(password);
            let mut reader = ArchiveReader::new(host, pick_format(args.format, &archive))?;
            reader.open_file(&archive, password.as_deref())?;
            let passed = match reader.test_all(detail)? {
                TestReport::Passed(passed) => passed,
                TestReport::Detailed(outcomes) => {
                    let entries = reader.entries()?;
                    for (entry, outcome) in entries.iter().zip(&outcomes) {
                        println!("{:?}\t{}", outcome, entry.path.display());
                    }
                    outcomes.iter().all(|o| *o == TestOutcome::Ok)
                }
            };
            reader.close()?;
            if !passed {
                return Err(format!("{}: archive corrupted", archive.display()).into());
            }
            println!("Everything is Ok");
        }
        Commands::Create { inputs, output, password, method, level, solid, encrypt_headers } => {
            let password = config::password_from_opt_or_env(password);
            if encrypt_headers && password.is_none() {
                return Err("--encrypt-headers requires a password".into());
            }
            let mut writer = ArchiveWriter::new(host, pick_format(args.format, &output))?;
            if let Some(options) = writer.options_mut() {
                if let Some(method) = method {
                    options.set_method(method);
                }
                if let Some(level) = level {
                    options.set_level(level)?;
                }
                options.solid = solid;
                options.header_encryption = encrypt_headers;
            } else if method.is_some() || level.is_some() {
                tracing::warn!("--method and --level only apply to 7z archives");
            }
            writer.open_file(&output, password.as_deref())?;
            for input in &inputs {
                let name = input
                    .file_name()
                    .and_then(|n| n.to_str())
                    .ok_or_else(|| format!("{} has no usable file name", input.display()))?;
                if input.is_dir() {
                    writer.add_directory_as(input, name)?;
                } else {
                    writer.add_file_as(input, name)?;
                }
            }
            writer.compress()?;
            writer.close()?;
        }
    }

    drop(binding);
    EngineBinding::teardown();
    Ok(())
}
