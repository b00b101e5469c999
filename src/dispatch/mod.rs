//! # Cross-Thread Host Action Dispatcher
//!
//! Engine callbacks arrive on threads that do not hold the host's execution
//! token. They hand their host-bound work to a per-operation event-loop worker
//! through a one-slot [`mailbox`] and block until it ran. The worker holds the
//! token whenever it executes an action, so actions never overlap, run in
//! submission order, and any exception they raise is captured once and
//! surfaced by the calling operation after the native call returns.

mod mailbox;
mod result;

pub use result::ResultState;

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::JoinHandle;

use crate::config::DispatchConfig;
use crate::error::BridgeError;
use crate::host::{Host, HostException, Interrupted, TokenGuard, UnblockFn};
use mailbox::{Job, JobRef, Kind, Mailbox};

struct Inner {
    host: Arc<dyn Host>,
    mailbox: Mutex<Mailbox>,
    cond: Condvar,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_name: String,
}

/// Owns the event loop of one session. Cheap to clone; clones share the loop.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

/// Submits actions to a [`Dispatcher`]'s event loop. Handed to engine
/// callback objects, which may live on any thread.
#[derive(Clone)]
pub struct Requester {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mb = self.inner.lock();
        f.debug_struct("Dispatcher")
            .field("worker", &self.inner.worker_name)
            .field("running", &mb.running)
            .field("faulted", &mb.faulted)
            .field("generation", &mb.generation)
            .finish()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Mailbox> {
        self.mailbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, Mailbox>) -> MutexGuard<'a, Mailbox> {
        self.cond.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    fn worker_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cancel_hook(self: &Arc<Self>) -> UnblockFn {
        let weak: Weak<Inner> = Arc::downgrade(self);
        Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.cancel();
            }
        })
    }

    fn cancel(&self) {
        let mut mb = self.lock();
        mb.running = false;
        mb.faulted = true;
        mb.result.record(ResultState::Interrupted);
        self.cond.notify_all();
    }

    /// Blocks until the worker finished `kind` (returns its success and
    /// whether the loop is still running) or the loop stopped first.
    fn submit(&self, kind: Kind) -> bool {
        let mut mb = self.lock();
        if !mb.running {
            tracing::trace!("submit refused, event loop not running");
            return false;
        }
        let generation = mb.generation;
        let ticket = mb.issue_ticket();
        while mb.running && mb.generation == generation && !mb.may_place(ticket) {
            mb = self.wait(mb);
        }
        if !mb.running || mb.generation != generation {
            return false;
        }
        mb.place(ticket, kind);
        tracing::trace!(ticket, "action placed");
        self.cond.notify_all();

        loop {
            if mb.generation != generation {
                return false;
            }
            if let Some(success) = mb.collect(ticket) {
                return success && mb.running;
            }
            if !mb.running && mb.withdraw(ticket) {
                self.cond.notify_all();
                return false;
            }
            mb = self.wait(mb);
        }
    }

    fn event_loop(self: Arc<Self>) {
        tracing::debug!(worker = %self.worker_name, "event loop started");
        loop {
            let mut next = None;
            let waited = self.host.without_token(
                &mut || {
                    let mut mb = self.lock();
                    while mb.running && !mb.has_pending() {
                        mb = self.wait(mb);
                    }
                    if mb.running {
                        next = mb.take_pending();
                    }
                },
                self.cancel_hook(),
            );
            if waited.is_err() {
                self.cancel();
            }
            let Some((ticket, kind)) = next else { break };

            match kind {
                Kind::Terminate => {
                    let mut mb = self.lock();
                    mb.running = false;
                    mb.complete(ticket, true);
                    self.cond.notify_all();
                    break;
                }
                Kind::Action(job) => {
                    let success = self.execute(job);
                    let mut mb = self.lock();
                    mb.complete(ticket, success);
                    self.cond.notify_all();
                }
            }
        }
        tracing::debug!(worker = %self.worker_name, "event loop stopped");
    }

    fn execute(&self, job: JobRef) -> bool {
        if !self.lock().result.is_clear() {
            return false;
        }
        // SAFETY: the requester stays parked in `submit` until `complete` is
        // published for this ticket, so the closure is still alive.
        match self.host.protect(&mut || unsafe { job.call() }) {
            Ok(()) => true,
            Err(exception) => {
                tracing::debug!(error = %exception, "action raised, stopping event loop");
                let mut mb = self.lock();
                mb.result.record(ResultState::Raised(exception));
                mb.running = false;
                false
            }
        }
    }
}

impl Dispatcher {
    pub fn new(host: Arc<dyn Host>, config: &DispatchConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                host,
                mailbox: Mutex::new(Mailbox::default()),
                cond: Condvar::new(),
                worker: Mutex::new(None),
                worker_name: config.worker_name.clone(),
            }),
        }
    }

    pub fn host(&self) -> &Arc<dyn Host> {
        &self.inner.host
    }

    pub fn requester(&self) -> Requester {
        Requester { inner: Arc::clone(&self.inner) }
    }

    /// Acquires the host token for the current thread unless it holds it.
    pub fn enter(&self) -> Option<TokenGuard<'_>> {
        let token = self.inner.host.token();
        if token.held_by_current_thread() {
            None
        } else {
            Some(token.acquire())
        }
    }

    /// Clears the captured result ahead of a new public operation.
    pub fn prepare(&self) {
        self.inner.lock().result = ResultState::Clear;
    }

    /// Starts the event loop for one operation. A no-op while it runs.
    pub fn start(&self) -> Result<(), BridgeError> {
        let mut worker = self.inner.worker_slot();
        if worker.is_some() && self.inner.lock().running {
            return Ok(());
        }
        if let Some(stale) = worker.take() {
            self.join_released(stale).map_err(|Interrupted| BridgeError::Interrupted)?;
        }
        self.inner.lock().begin_generation();

        let inner = Arc::clone(&self.inner);
        let spawned = self
            .inner
            .host
            .spawn(self.inner.worker_name.clone(), Box::new(move || inner.event_loop()));
        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.inner.lock().running = false;
                Err(e.into())
            }
        }
    }

    /// Asks the loop to finish the queued actions and exit, then joins it.
    /// Does nothing when the loop was never started or already joined.
    pub fn terminate(&self) {
        let Some(handle) = self.inner.worker_slot().take() else { return };
        let inner = Arc::clone(&self.inner);
        let mut handle = Some(handle);
        let _ = self.inner.host.without_token(
            &mut || {
                inner.submit(Kind::Terminate);
                if let Some(h) = handle.take() {
                    if h.join().is_err() {
                        tracing::warn!("event loop worker panicked");
                    }
                }
            },
            self.inner.cancel_hook(),
        );
    }

    fn join_released(&self, handle: JoinHandle<()>) -> Result<(), Interrupted> {
        let mut handle = Some(handle);
        self.inner.host.without_token(
            &mut || {
                if let Some(h) = handle.take() {
                    if h.join().is_err() {
                        tracing::warn!("event loop worker panicked");
                    }
                }
            },
            self.inner.cancel_hook(),
        )
    }

    /// Stops accepting work, faults the session and releases every waiting
    /// requester whose action was not taken yet. Runs no host code.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Runs native `work` on this thread with the token released. An
    /// interrupt from the host cancels the loop and fails the call.
    pub fn run_native<R>(&self, work: impl FnOnce() -> R) -> Result<R, Interrupted> {
        let mut work = Some(work);
        let mut out = None;
        self.inner.host.without_token(
            &mut || {
                if let Some(w) = work.take() {
                    out = Some(w());
                }
            },
            self.inner.cancel_hook(),
        )?;
        out.ok_or(Interrupted)
    }

    /// Runs host code directly on this thread under the token and the
    /// protected-call boundary.
    pub fn run_host(
        &self,
        mut f: impl FnMut() -> Result<(), HostException>,
    ) -> Result<(), HostException> {
        let _token = self.enter();
        self.inner.host.protect(&mut f)
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    pub fn is_faulted(&self) -> bool {
        self.inner.lock().faulted
    }

    pub fn take_result(&self) -> ResultState {
        self.inner.lock().result.take()
    }

    /// Requests holding a ticket that have not completed yet.
    pub fn waiting_requests(&self) -> usize {
        self.inner.lock().waiting()
    }
}

impl Requester {
    /// Runs `f` on the event loop and blocks until it finished.
    ///
    /// Returns `false` if the loop was not running, stopped before taking the
    /// action, or `f` raised. In that case anything `f` produced must be
    /// treated as partial.
    pub fn run<F>(&self, mut f: F) -> bool
    where
        F: FnMut() -> Result<(), HostException> + Send,
    {
        if self.inner.host.token().held_by_current_thread() {
            // The worker could never take the token from us.
            return self.run_inline(&mut f);
        }
        let job: &mut Job<'_> = &mut f;
        // SAFETY: `submit` returns only after the worker published completion
        // for this entry or the entry was withdrawn untaken.
        let job = unsafe { JobRef::new(job) };
        self.inner.submit(Kind::Action(job))
    }

    fn run_inline(&self, f: &mut dyn FnMut() -> Result<(), HostException>) -> bool {
        let mut mb = self.inner.lock();
        if !mb.running || !mb.result.is_clear() {
            return false;
        }
        drop(mb);
        match self.inner.host.protect(f) {
            Ok(()) => self.inner.lock().running,
            Err(exception) => {
                mb = self.inner.lock();
                mb.result.record(ResultState::Raised(exception));
                mb.running = false;
                self.inner.cond.notify_all();
                false
            }
        }
    }

    /// Whether the owning session was faulted by an interrupt.
    pub fn is_faulted(&self) -> bool {
        self.inner.lock().faulted
    }
}
