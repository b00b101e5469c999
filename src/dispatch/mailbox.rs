//! One-slot action exchange between requesters and the event-loop worker.
//!
//! Everything here is guarded by the dispatcher's single lock; nothing in this
//! module blocks.

use std::collections::HashMap;

use super::result::ResultState;
use crate::host::HostException;

pub(super) type Job<'a> = dyn FnMut() -> Result<(), HostException> + Send + 'a;

/// A borrowed action closure with its lifetime erased so it can sit in the
/// mailbox while the requester blocks.
#[derive(Clone, Copy)]
pub(super) struct JobRef(*mut Job<'static>);

// The closure itself is `Send`; the pointer is only dereferenced by the worker
// while the requester is parked waiting for it.
unsafe impl Send for JobRef {}

impl JobRef {
    /// # Safety
    /// The caller must keep `job` alive and otherwise untouched until the
    /// worker has published completion for it or the entry was withdrawn.
    pub(super) unsafe fn new<'a>(job: &mut Job<'a>) -> Self {
        let ptr: *mut Job<'a> = job;
        JobRef(std::mem::transmute::<*mut Job<'a>, *mut Job<'static>>(ptr))
    }

    /// # Safety
    /// See [`JobRef::new`].
    pub(super) unsafe fn call(self) -> Result<(), HostException> {
        (*self.0)()
    }
}

#[derive(Clone, Copy)]
pub(super) enum Kind {
    Action(JobRef),
    Terminate,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Pending,
    Taken,
}

struct Entry {
    ticket: u64,
    kind: Kind,
    state: SlotState,
}

#[derive(Default)]
pub(super) struct Mailbox {
    pub running: bool,
    pub faulted: bool,
    pub generation: u64,
    pub result: ResultState,
    next_ticket: u64,
    now_serving: u64,
    slot: Option<Entry>,
    completed: HashMap<u64, bool>,
}

impl Mailbox {
    /// Resets the queue for a freshly started loop. Requesters still parked
    /// from an older generation notice the change and give up.
    pub fn begin_generation(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.next_ticket = 0;
        self.now_serving = 0;
        self.slot = None;
        self.completed.clear();
        self.running = true;
    }

    pub fn issue_ticket(&mut self) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        ticket
    }

    pub fn may_place(&self, ticket: u64) -> bool {
        self.slot.is_none() && self.now_serving == ticket
    }

    pub fn place(&mut self, ticket: u64, kind: Kind) {
        debug_assert!(self.may_place(ticket));
        self.slot = Some(Entry { ticket, kind, state: SlotState::Pending });
    }

    pub fn has_pending(&self) -> bool {
        matches!(&self.slot, Some(e) if e.state == SlotState::Pending)
    }

    /// Worker side: claims the pending entry. From here on the requester may
    /// not withdraw it.
    pub fn take_pending(&mut self) -> Option<(u64, Kind)> {
        match &mut self.slot {
            Some(entry) if entry.state == SlotState::Pending => {
                entry.state = SlotState::Taken;
                Some((entry.ticket, entry.kind))
            }
            _ => None,
        }
    }

    /// Worker side: publishes the outcome of a taken entry and frees the slot
    /// for the next ticket.
    pub fn complete(&mut self, ticket: u64, success: bool) {
        if matches!(&self.slot, Some(e) if e.ticket == ticket) {
            self.slot = None;
        }
        self.now_serving = self.now_serving.max(ticket + 1);
        self.completed.insert(ticket, success);
    }

    /// Requester side: consumes the published outcome for `ticket`.
    pub fn collect(&mut self, ticket: u64) -> Option<bool> {
        self.completed.remove(&ticket)
    }

    /// Requester side: removes an entry the worker never took.
    pub fn withdraw(&mut self, ticket: u64) -> bool {
        match &self.slot {
            Some(e) if e.ticket == ticket && e.state == SlotState::Pending => {
                self.slot = None;
                self.now_serving = self.now_serving.max(ticket + 1);
                true
            }
            _ => false,
        }
    }

    /// Requests that hold a ticket but have not completed yet.
    pub fn waiting(&self) -> usize {
        (self.next_ticket - self.now_serving) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tickets_are_served_in_order() {
        let mut mb = Mailbox::default();
        mb.begin_generation();
        let a = mb.issue_ticket();
        let b = mb.issue_ticket();
        assert!(mb.may_place(a));
        assert!(!mb.may_place(b));
        assert_eq!(mb.waiting(), 2);

        mb.place(a, Kind::Terminate);
        assert!(mb.has_pending());
        let (ticket, _) = mb.take_pending().unwrap();
        assert_eq!(ticket, a);
        assert!(!mb.withdraw(a), "taken entries stay put");

        mb.complete(a, true);
        assert_eq!(mb.collect(a), Some(true));
        assert!(mb.may_place(b));
        assert_eq!(mb.waiting(), 1);
    }

    #[test]
    fn pending_entry_can_be_withdrawn() {
        let mut mb = Mailbox::default();
        mb.begin_generation();
        let a = mb.issue_ticket();
        mb.place(a, Kind::Terminate);
        assert!(mb.withdraw(a));
        assert!(!mb.has_pending());
        assert_eq!(mb.waiting(), 0);
    }

    #[test]
    fn new_generation_drops_stale_entries() {
        let mut mb = Mailbox::default();
        mb.begin_generation();
        let a = mb.issue_ticket();
        mb.place(a, Kind::Terminate);
        let g = mb.generation;
        mb.running = false;
        mb.begin_generation();
        assert_ne!(mb.generation, g);
        assert!(mb.running);
        assert!(!mb.has_pending());
        assert_eq!(mb.waiting(), 0);
    }
}
