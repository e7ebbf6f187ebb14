//! Session state of the command dispatcher.

use std::fmt;

use crate::events::{DfuEvent, DfuObserver};

/// Where a host session stands.
///
/// There is no failed state: a session that stops making progress simply
/// stays where it is until the caller gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Waiting for Enter.
    #[default]
    None,
    /// Enter accepted, update commands are served.
    Updating,
    /// Exit received. The caller decides what to run next.
    Finished,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::None => write!(f, "NONE"),
            SessionState::Updating => write!(f, "UPDATING"),
            SessionState::Finished => write!(f, "FINISHED"),
        }
    }
}

impl SessionState {
    /// Whether the dispatcher still reads packets in this state.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::None | SessionState::Updating)
    }

    /// Transition to a new state, reporting the change.
    pub fn goto_state<O: DfuObserver + ?Sized>(&mut self, new_state: SessionState, observer: &O) {
        if *self == new_state {
            return;
        }
        tracing::info!(from = %self, to = %new_state, "State transition");
        observer.on_event(&DfuEvent::StateChanged {
            from: *self,
            to: new_state,
        });
        *self = new_state;
    }
}
