use crate::host::HostException;

/// What the event loop captured while running actions for one operation.
#[derive(Debug, Default)]
pub enum ResultState {
    #[default]
    Clear,
    /// An action raised; the exception is re-raised unchanged by the operation.
    Raised(HostException),
    /// The host interrupted the calling thread during the native call.
    Interrupted,
}

impl ResultState {
    pub fn is_clear(&self) -> bool {
        matches!(self, ResultState::Clear)
    }

    /// Records `state` unless something was captured already. Only the first
    /// failure of an operation is kept.
    pub fn record(&mut self, state: ResultState) -> bool {
        if self.is_clear() {
            *self = state;
            true
        } else {
            false
        }
    }

    pub fn take(&mut self) -> ResultState {
        std::mem::take(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_failure_wins() {
        let mut state = ResultState::Clear;
        assert!(state.record(ResultState::Raised("first".into())));
        assert!(!state.record(ResultState::Interrupted));
        match state.take() {
            ResultState::Raised(e) => assert_eq!(e.to_string(), "first"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(state.is_clear());
    }
}
