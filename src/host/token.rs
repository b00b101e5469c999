//! The host's exclusive-execution token.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

/// Exclusive, non-reentrant right to run host-bound logic.
///
/// At most one thread holds the token. It is only ever taken through a
/// [`TokenGuard`], and native work gives it up temporarily through
/// [`ExecutionToken::suspend`].
#[derive(Debug, Default)]
pub struct ExecutionToken {
    owner: Mutex<Option<ThreadId>>,
    released: Condvar,
}

/// Scoped ownership of the [`ExecutionToken`]. Dropping it releases the token.
#[derive(Debug)]
pub struct TokenGuard<'a> {
    token: &'a ExecutionToken,
}

/// The token was released by [`ExecutionToken::suspend`]; dropping this
/// re-acquires it for the same thread.
#[derive(Debug)]
pub struct Suspended<'a> {
    token: &'a ExecutionToken,
}

impl ExecutionToken {
    pub fn new() -> Self {
        Self::default()
    }

    fn owner(&self) -> MutexGuard<'_, Option<ThreadId>> {
        self.owner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn claim(&self) {
        let me = thread::current().id();
        let mut owner = self.owner();
        assert_ne!(*owner, Some(me), "execution token is not reentrant");
        while owner.is_some() {
            owner = self.released.wait(owner).unwrap_or_else(PoisonError::into_inner);
        }
        *owner = Some(me);
    }

    fn release(&self) {
        let mut owner = self.owner();
        *owner = None;
        self.released.notify_one();
    }

    /// Blocks until the token is free and takes it.
    ///
    /// # Panics
    /// If the current thread already holds the token.
    pub fn acquire(&self) -> TokenGuard<'_> {
        self.claim();
        TokenGuard { token: self }
    }

    /// Takes the token if nobody holds it.
    pub fn try_acquire(&self) -> Option<TokenGuard<'_>> {
        let mut owner = self.owner();
        if owner.is_some() {
            return None;
        }
        *owner = Some(thread::current().id());
        Some(TokenGuard { token: self })
    }

    pub fn held_by_current_thread(&self) -> bool {
        *self.owner() == Some(thread::current().id())
    }

    pub fn is_held(&self) -> bool {
        self.owner().is_some()
    }

    /// Releases the token if the current thread holds it. The returned value
    /// takes it back when dropped; `None` means there was nothing to release.
    pub fn suspend(&self) -> Option<Suspended<'_>> {
        let me = thread::current().id();
        let mut owner = self.owner();
        if *owner != Some(me) {
            return None;
        }
        *owner = None;
        self.released.notify_one();
        Some(Suspended { token: self })
    }
}

impl Drop for TokenGuard<'_> {
    fn drop(&mut self) {
        self.token.release();
    }
}

impl Drop for Suspended<'_> {
    fn drop(&mut self) {
        self.token.claim();
    }
}
