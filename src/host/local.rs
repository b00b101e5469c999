//! In-process [`Host`] used by the command-line tool and the test suite.
//!
//! The token is a real [`ExecutionToken`]; protected calls catch panics; and
//! interrupts are delivered per thread through [`LocalHost::interrupt`].

use std::collections::HashMap;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use super::{ExecutionToken, Host, HostException, Interrupted, UnblockFn};

/// A panic caught at the protected-call boundary.
#[derive(Debug, thiserror::Error)]
#[error("host code panicked: {0}")]
pub struct HostPanic(pub String);

#[derive(Default)]
struct InterruptSlot {
    pending: bool,
    fired: bool,
    unblock: Option<UnblockFn>,
}

#[derive(Default)]
pub struct LocalHost {
    token: Arc<ExecutionToken>,
    interrupts: Mutex<HashMap<ThreadId, InterruptSlot>>,
}

impl std::fmt::Debug for LocalHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalHost").field("token", &self.token).finish_non_exhaustive()
    }
}

impl LocalHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<ThreadId, InterruptSlot>> {
        self.interrupts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delivers an interrupt to `thread`. If the thread is inside a
    /// `without_token` region its unblock hook runs now; otherwise the
    /// interrupt stays pending until the thread's next region.
    pub fn interrupt(&self, thread: ThreadId) {
        let unblock = {
            let mut slots = self.slots();
            let slot = slots.entry(thread).or_default();
            match &slot.unblock {
                Some(unblock) if !slot.fired => {
                    slot.fired = true;
                    Some(Arc::clone(unblock))
                }
                Some(_) => None,
                None => {
                    slot.pending = true;
                    None
                }
            }
        };
        if let Some(unblock) = unblock {
            tracing::debug!(?thread, "delivering interrupt");
            unblock();
        }
    }

    /// Acquires the token for the current thread unless it already holds it.
    pub fn enter(&self) -> Option<super::TokenGuard<'_>> {
        if self.token.held_by_current_thread() {
            None
        } else {
            Some(self.token.acquire())
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl Host for LocalHost {
    fn token(&self) -> &ExecutionToken {
        &self.token
    }

    fn protect(
        &self,
        f: &mut dyn FnMut() -> Result<(), HostException>,
    ) -> Result<(), HostException> {
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(result) => result,
            Err(payload) => Err(Box::new(HostPanic(panic_message(payload.as_ref())))),
        }
    }

    fn spawn(&self, name: String, body: Box<dyn FnOnce() + Send>) -> io::Result<JoinHandle<()>> {
        let token = Arc::clone(&self.token);
        thread::Builder::new().name(name).spawn(move || {
            let _guard = token.acquire();
            body();
        })
    }

    fn without_token(&self, work: &mut dyn FnMut(), unblock: UnblockFn) -> Result<(), Interrupted> {
        let me = thread::current().id();
        let fire_now = {
            let mut slots = self.slots();
            let slot = slots.entry(me).or_default();
            slot.unblock = Some(Arc::clone(&unblock));
            if slot.pending {
                slot.pending = false;
                slot.fired = true;
                true
            } else {
                false
            }
        };
        if fire_now {
            unblock();
        }

        {
            let _suspended = self.token.suspend();
            work();
        }

        let fired = self.slots().remove(&me).map(|slot| slot.fired).unwrap_or(false);
        if fired {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }
}
