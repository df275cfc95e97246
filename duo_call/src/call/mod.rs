pub mod coordinator;
pub mod stats;
pub mod tracks;

#[cfg(test)]
pub(crate) mod testing;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CallError;
use crate::{debug, error, info, warn};

pub use coordinator::{CallParts, Coordinator};
pub use stats::{StatsBoard, StatsSampler, StatsSnapshot};
pub use tracks::{TrackController, TrackSet};

/// One of the two fixed identities of a call. A always initiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    A,
    B,
}

impl Role {
    pub fn peer(self) -> Role {
        match self {
            Role::A => Role::B,
            Role::B => Role::A,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::A => "A",
            Role::B => "B",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "A" | "a" => Ok(Role::A),
            "B" | "b" => Ok(Role::B),
            other => Err(CallError::InvalidRole(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CallState {
    Idle,
    Connecting,
    Connected,
    Ended,
}

impl CallState {
    /// Forward-only transitions. Ended is absorbing.
    pub fn can_advance_to(self, next: CallState) -> bool {
        matches!(
            (self, next),
            (CallState::Idle, CallState::Connecting)
                | (CallState::Connecting, CallState::Connected)
                | (CallState::Idle, CallState::Ended)
                | (CallState::Connecting, CallState::Ended)
                | (CallState::Connected, CallState::Ended)
        )
    }
}

/// Per-call state owned by a single Coordinator. A new call needs a new Session.
#[derive(Debug)]
pub struct Session {
    session_id: String,
    call_id: String,
    local_role: Role,
    call_state: CallState,
}

impl Session {
    pub fn new(call_id: impl Into<String>, local_role: Role) -> Self {
        let session = Self {
            session_id: xid::new().to_string(),
            call_id: call_id.into(),
            local_role,
            call_state: CallState::Idle,
        };
        debug!(
            "session {} created for call {} as {}",
            session.session_id, session.call_id, local_role
        );
        session
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn local_role(&self) -> Role {
        self.local_role
    }

    pub fn remote_role(&self) -> Role {
        self.local_role.peer()
    }

    pub fn state(&self) -> CallState {
        self.call_state
    }

    pub fn is_ended(&self) -> bool {
        self.call_state == CallState::Ended
    }

    /// Apply a transition if it moves forward; returns whether it applied.
    pub fn advance(&mut self, next: CallState) -> bool {
        if !self.call_state.can_advance_to(next) {
            warn!(
                "session {}: refusing transition {:?} -> {:?}",
                self.session_id, self.call_state, next
            );
            return false;
        }
        info!(
            "session {}: {:?} -> {:?}",
            self.session_id, self.call_state, next
        );
        self.call_state = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_pair_up() {
        assert_eq!(Role::A.peer(), Role::B);
        assert_eq!(Role::B.peer(), Role::A);
        assert_eq!("b".parse::<Role>().unwrap(), Role::B);
        assert!("C".parse::<Role>().is_err());
    }

    #[test]
    fn session_walks_forward_only() {
        let mut session = Session::new("call1", Role::B);
        assert_eq!(session.remote_role(), Role::A);
        assert!(!session.advance(CallState::Connected));
        assert!(session.advance(CallState::Connecting));
        assert!(!session.advance(CallState::Idle));
        assert!(session.advance(CallState::Connected));
        assert!(!session.advance(CallState::Connecting));
        assert!(session.advance(CallState::Ended));
        assert!(!session.advance(CallState::Ended));
        assert_eq!(session.state(), CallState::Ended);
    }

    #[test]
    fn every_pair_of_states_is_monotonic() {
        let all = [
            CallState::Idle,
            CallState::Connecting,
            CallState::Connected,
            CallState::Ended,
        ];
        for from in all {
            for to in all {
                if from.can_advance_to(to) {
                    assert!(to > from, "{:?} -> {:?} goes backwards", from, to);
                }
            }
            assert!(!CallState::Ended.can_advance_to(from));
        }
    }
}
