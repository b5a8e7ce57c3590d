use crate::session::SessionId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::info;

/// What a session is doing acoustically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToneState {
    #[default]
    None,
    Call,
    Ringback,
    Ringtone,
    Tone,
}

impl ToneState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToneState::None => "None",
            ToneState::Call => "Call",
            ToneState::Ringback => "Ringback",
            ToneState::Ringtone => "Ringtone",
            ToneState::Tone => "Tone",
        }
    }
}

impl fmt::Display for ToneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tone state per session. A session without an entry is in `None`.
///
/// Entries are keyed by id, so lookups resolve to the lowest matching id.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: BTreeMap<SessionId, ToneState>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts the session if not present.
    pub fn set_state(&mut self, session: SessionId, state: ToneState) {
        if self.sessions.insert(session, state).is_none() {
            info!(session_id = %session, %state, "add new session");
        }
    }

    pub fn get_state(&self, session: SessionId) -> ToneState {
        self.sessions.get(&session).copied().unwrap_or_default()
    }

    pub fn remove_session(&mut self, session: SessionId) {
        self.sessions.remove(&session);
        info!(session_id = %session, sessions = self.sessions.len(), "remove session");
    }

    pub fn is_another_session_in_state(&self, me: SessionId, state: ToneState) -> bool {
        self.find_another_session_in_state(me, state).is_some()
    }

    pub fn find_another_session_in_state(&self, me: SessionId, state: ToneState) -> Option<SessionId> {
        self.sessions
            .iter()
            .find(|(id, current)| **current == state && **id != me)
            .map(|(id, _)| *id)
    }

    pub fn get_session_in_state(&self, state: ToneState) -> Option<SessionId> {
        self.sessions
            .iter()
            .find(|(_, current)| **current == state)
            .map(|(id, _)| *id)
    }

    pub fn is_there_a_call(&self) -> bool {
        self.sessions.values().any(|state| *state == ToneState::Call)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SessionId, ToneState)> + '_ {
        self.sessions.iter().map(|(id, state)| (*id, *state))
    }
}
