use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a single dispatched request.
///
/// `Created -> Dispatched -> InFlight -> {Completed | Failed | Cancelled}`,
/// `Cancelled` is also reachable from `Created` and `Dispatched`. Terminal
/// states never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestState {
    Created = 0,
    Dispatched = 1,
    InFlight = 2,
    Completed = 3,
    Failed = 4,
    Cancelled = 5,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Dispatched,
            2 => Self::InFlight,
            3 => Self::Completed,
            4 => Self::Failed,
            _ => Self::Cancelled,
        }
    }
}

#[derive(Debug)]
pub(crate) struct RequestTracker {
    id: u64,
    state: AtomicU8,
}

impl RequestTracker {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            state: AtomicU8::new(RequestState::Created as u8),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn state(&self) -> RequestState {
        RequestState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Moves `from -> to` only if the request is still in `from`
    pub(crate) fn advance(&self, from: RequestState, to: RequestState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Returns false when the request already reached a terminal state
    pub(crate) fn cancel(&self) -> bool {
        let mut current = self.state();

        loop {
            if current.is_terminal() {
                return false;
            }

            match self.state.compare_exchange(
                current as u8,
                RequestState::Cancelled as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = RequestState::from_u8(actual),
            }
        }
    }

    /// Settles an in-flight request, false means a cancellation won the race
    pub(crate) fn settle(&self, succeeded: bool) -> bool {
        let terminal = match succeeded {
            true => RequestState::Completed,
            false => RequestState::Failed,
        };

        self.advance(RequestState::InFlight, terminal)
    }
}
