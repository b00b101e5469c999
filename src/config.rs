//! Runtime configuration: where the engine library lives, where passwords come
//! from, and how the event loop is set up.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the engine library to load.
pub const ENGINE_ENV: &str = "SEVENBRIDGE_ENGINE";
/// Environment variable holding an archive password.
pub const PASSWORD_ENV: &str = "SEVENBRIDGE_PASSWORD";
/// Environment variable with a `tracing` filter directive for the binary.
pub const LOG_ENV: &str = "SEVENBRIDGE_LOG";
/// Base name of the engine library, without platform prefix or suffix.
pub const ENGINE_LIBRARY: &str = "sevenbridge_engine";

/// Settings for a session's event loop.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Name given to the worker thread.
    pub worker_name: String,
    /// Minimum time between two progress notifications dispatched to a handler.
    pub progress_interval: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            worker_name: "sevenbridge-loop".to_string(),
            progress_interval: Duration::from_millis(100),
        }
    }
}

/// Resolves the engine library path.
///
/// Priority:
/// 1. an explicit path (e.g. `--engine`),
/// 2. the `SEVENBRIDGE_ENGINE` environment variable,
/// 3. the platform library name next to the running executable.
pub fn engine_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = env::var_os(ENGINE_ENV).filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(path));
    }
    let exe = env::current_exe().ok()?;
    Some(exe.parent()?.join(libloading::library_filename(ENGINE_LIBRARY)))
}

/// Gets the password from the command-line option or the `SEVENBRIDGE_PASSWORD`
/// environment variable. Returns `None` if neither is present, leaving the
/// caller free to prompt.
pub fn password_from_opt_or_env(password_opt: Option<String>) -> Option<String> {
    if let Some(pass) = password_opt {
        return Some(pass);
    }
    env::var(PASSWORD_ENV).ok()
}

/// Like [`password_from_opt_or_env`], falling back to an interactive prompt
/// when `prompt` is set.
pub fn resolve_password(password_opt: Option<String>, prompt: bool) -> std::io::Result<Option<String>> {
    if let Some(pass) = password_from_opt_or_env(password_opt) {
        return Ok(Some(pass));
    }
    if prompt {
        return rpassword::prompt_password("Password: ").map(Some);
    }
    Ok(None)
}
