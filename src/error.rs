use std::path::PathBuf;

use crate::host::HostException;

/// The primary error type for all operations in the `sevenbridge` crate.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The operation is not legal in the session's current state.
    #[error("{0}")]
    InvalidOperation(String),

    /// The engine rejected the archive on open. With a password in play the
    /// engine cannot tell a corrupt header from a wrong key, so both are reported here.
    #[error("{}", open_failed_message(.password_specified))]
    OpenFailed { password_specified: bool },

    /// An engine call returned a failure code outside of `open`.
    #[error("{0}")]
    EngineFailure(String),

    /// A caller-supplied option or argument was rejected.
    #[error("{0}")]
    InvalidArgument(String),

    /// An exception raised by host code inside a dispatched action, re-raised unchanged.
    #[error(transparent)]
    Host(HostException),

    /// The host delivered an interrupt while a native call was outstanding.
    #[error("Interrupted")]
    Interrupted,

    /// An I/O error occurred, typically while reading or writing a file.
    /// Includes the path where the error happened.
    #[error("I/O error on path '{}': {source}", path.display())]
    Io { source: std::io::Error, path: PathBuf },

    /// The engine library could not be loaded or did not export the entry point.
    #[error("engine library error: {0}")]
    Library(String),

    /// No engine binding is installed for this process.
    #[error("engine binding is not initialized")]
    BindingUnavailable,
}

impl BridgeError {
    pub(crate) fn invalid_operation(msg: impl Into<String>) -> Self {
        BridgeError::InvalidOperation(msg.into())
    }

    /// Wraps an I/O error together with the path it happened on.
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        BridgeError::Io { source, path: path.into() }
    }

    /// Returns the host exception if this error carries one.
    pub fn host_exception(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            BridgeError::Host(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

fn open_failed_message(password_specified: &bool) -> &'static str {
    if *password_specified {
        "Invalid file format. open. or password is incorrect."
    } else {
        "Invalid file format. open."
    }
}

// Generic IO error conversion that doesn't require a path
impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Io { source: err, path: PathBuf::new() }
    }
}

impl From<libloading::Error> for BridgeError {
    fn from(err: libloading::Error) -> Self {
        BridgeError::Library(err.to_string())
    }
}
