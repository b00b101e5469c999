//! # Host Capability Surface
//!
//! The archive sessions never talk to the embedding runtime directly. Everything
//! they need from it goes through the [`Host`] trait:
//!
//! - an exclusive [`ExecutionToken`] that must be held to run host-bound logic,
//! - a protected-call boundary that turns raised exceptions into values,
//! - thread spawning bound to the host's execution context,
//! - a way to run blocking native work with the token released and an unblock hook.
//!
//! [`LocalHost`] is the in-process implementation used by the CLI and the tests.

mod local;
mod token;

pub use local::{HostPanic, LocalHost};
pub use token::{ExecutionToken, Suspended, TokenGuard};

use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;

/// An exception raised by host code. Opaque to the dispatcher; it is captured,
/// carried across threads and handed back to the caller unchanged.
pub type HostException = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Unblock hook installed around native work; invoked from whichever thread
/// delivers the interrupt.
pub type UnblockFn = Arc<dyn Fn() + Send + Sync>;

/// Returned by [`Host::without_token`] when an interrupt arrived during the region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("interrupted")]
pub struct Interrupted;

/// The capabilities the dispatcher consumes from the embedding runtime.
pub trait Host: Send + Sync + 'static {
    /// The runtime's exclusive-execution token.
    fn token(&self) -> &ExecutionToken;

    /// Runs `f` inside the runtime's protected-call boundary. Anything `f`
    /// raises, including a panic, comes back as `Err` instead of unwinding.
    fn protect(
        &self,
        f: &mut dyn FnMut() -> Result<(), HostException>,
    ) -> Result<(), HostException>;

    /// Spawns a thread bound to the runtime. The thread holds the token while
    /// `body` runs, except inside its own `without_token` regions.
    fn spawn(&self, name: String, body: Box<dyn FnOnce() + Send>) -> io::Result<JoinHandle<()>>;

    /// Runs blocking native `work` with the token released (if the current
    /// thread holds it) and re-acquires it afterwards. `unblock` is called if
    /// the runtime interrupts this thread while the region is active; in that
    /// case the region reports [`Interrupted`] once `work` has returned.
    fn without_token(&self, work: &mut dyn FnMut(), unblock: UnblockFn) -> Result<(), Interrupted>;
}

/// A host-visible wrapper whose native object may not exist yet.
///
/// Hosts allocate their wrapper objects before the native side is constructed,
/// and construction can fail. The two states are explicit instead of being
/// inferred from the contents of the allocation.
#[derive(Debug, Default)]
pub enum Wrapped<T> {
    #[default]
    Uninitialized,
    Live(T),
}

impl<T> Wrapped<T> {
    pub fn is_live(&self) -> bool {
        matches!(self, Wrapped::Live(_))
    }

    pub fn get(&self) -> Option<&T> {
        match self {
            Wrapped::Live(v) => Some(v),
            Wrapped::Uninitialized => None,
        }
    }

    pub fn get_mut(&mut self) -> Option<&mut T> {
        match self {
            Wrapped::Live(v) => Some(v),
            Wrapped::Uninitialized => None,
        }
    }

    /// Drops the native object and returns the wrapper to `Uninitialized`.
    pub fn reset(&mut self) -> Option<T> {
        match std::mem::take(self) {
            Wrapped::Live(v) => Some(v),
            Wrapped::Uninitialized => None,
        }
    }
}

impl<T> From<Option<T>> for Wrapped<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Wrapped::Live(v),
            None => Wrapped::Uninitialized,
        }
    }
}
