//! Session state machine shared by readers and writers.
//!
//! Every public operation goes through [`Session::begin`], does its native
//! work through [`Session::execute`], and finishes with [`Session::settle`],
//! which surfaces whatever the event loop captured and moves the session into
//! `Error` when the operation failed.

use crate::dispatch::{Dispatcher, Requester, ResultState};
use crate::engine::EngineError;
use crate::error::BridgeError;
use crate::host::Interrupted;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initial,
    Opened,
    Compressed,
    Closed,
    Error,
}

#[derive(Debug)]
pub struct Session {
    state: SessionState,
    dispatcher: Dispatcher,
}

impl Session {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { state: SessionState::Initial, dispatcher }
    }

    /// Current state, with a fault from the event loop folded in.
    pub fn state(&mut self) -> SessionState {
        self.absorb_fault();
        self.state
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    fn absorb_fault(&mut self) {
        if self.dispatcher.is_faulted() && self.state != SessionState::Closed {
            self.state = SessionState::Error;
        }
    }

    /// Checks the entry state of an operation and clears the captured result.
    pub fn begin(&mut self, allowed: &[SessionState]) -> Result<(), BridgeError> {
        self.absorb_fault();
        if !allowed.contains(&self.state) {
            return Err(BridgeError::invalid_operation("Invalid operation"));
        }
        self.dispatcher.prepare();
        Ok(())
    }

    /// Runs `work` with the event loop up and the token released. The loop is
    /// terminated and joined before this returns, whatever `work` did. A loop
    /// that cannot start or an interrupt moves the session to `Error`.
    pub fn execute<R>(&mut self, work: impl FnOnce(&Requester) -> R) -> Result<R, BridgeError> {
        let outcome = self.execute_released(work);
        outcome.or_else(|e| self.fail(e))
    }

    fn execute_released<R>(&self, work: impl FnOnce(&Requester) -> R) -> Result<R, BridgeError> {
        self.dispatcher.start()?;
        let dispatcher = scopeguard::guard(self.dispatcher.clone(), |d| d.terminate());
        let requester = dispatcher.requester();
        dispatcher.run_native(|| work(&requester)).map_err(|Interrupted| BridgeError::Interrupted)
    }

    /// Finishes an operation: a captured exception or interrupt wins, then the
    /// session must be in one of the `expected` states, else `msg`.
    pub fn settle(&mut self, expected: &[SessionState], msg: &str) -> Result<(), BridgeError> {
        match self.dispatcher.take_result() {
            ResultState::Clear => {}
            ResultState::Raised(e) => return self.fail(BridgeError::Host(e)),
            ResultState::Interrupted => return self.fail(BridgeError::Interrupted),
        }
        self.absorb_fault();
        if !expected.contains(&self.state) {
            return self.fail(BridgeError::invalid_operation(msg));
        }
        Ok(())
    }

    /// Moves to `Error` and returns `err`.
    pub fn fail<T>(&mut self, err: BridgeError) -> Result<T, BridgeError> {
        self.state = SessionState::Error;
        Err(err)
    }

    /// [`settle`](Self::settle) followed by the engine's own status. A
    /// captured exception wins over the failure code it caused.
    pub fn settle_engine<T>(
        &mut self,
        outcome: Result<T, EngineError>,
        expected: &[SessionState],
        msg: &str,
        on_failure: impl FnOnce() -> BridgeError,
    ) -> Result<T, BridgeError> {
        let settled = self.settle(expected, msg);
        match outcome {
            Ok(value) => settled.map(|()| value),
            Err(code) => {
                settled?;
                tracing::debug!(error = %code, "engine call failed");
                self.fail(on_failure())
            }
        }
    }
}
