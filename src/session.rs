use crate::engine::SoundCard;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Stable identity of a call session, assigned by the call-session layer.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Call state as owned by the call-session layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    #[default]
    Idle,
    IncomingReceived,
    OutgoingInit,
    OutgoingProgress,
    OutgoingRinging,
    OutgoingEarlyMedia,
    Connected,
    StreamsRunning,
    Pausing,
    Paused,
    Resuming,
    Referred,
    Error,
    End,
    PausedByRemote,
    UpdatedByRemote,
    IncomingEarlyMedia,
    Updating,
    Released,
}

/// Termination reason reported by the call-session layer, also the key of
/// the error tone table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    #[default]
    None,
    NoResponse,
    Forbidden,
    Declined,
    NotFound,
    NotAnswered,
    Busy,
    IoError,
    DoNotDisturb,
    Unauthorized,
    NotAcceptable,
    TemporarilyUnavailable,
    Transferred,
    Unknown,
}

/// What the tone manager needs to know about a call session. The session
/// itself is owned by the call-session layer.
pub trait CallSession: Send + Sync {
    fn id(&self) -> SessionId;
    fn state(&self) -> CallState;
    /// State of the transfer this session initiated, `Idle` if none.
    fn transfer_state(&self) -> CallState;
    fn reason(&self) -> Reason;
    /// Whether the session's media is mixed by a local conference.
    fn in_conference(&self) -> bool;
    /// Output device currently selected for this session, if any.
    fn output_card(&self) -> Option<SoundCard>;
}

/// Shared handle on a live call session.
pub type SessionRef = Arc<dyn CallSession>;

/// Plain snapshot of a call session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    #[serde(default)]
    pub state: CallState,
    #[serde(default)]
    pub transfer_state: CallState,
    #[serde(default)]
    pub reason: Reason,
    #[serde(default)]
    pub in_conference: bool,
    #[serde(default)]
    pub output_card: Option<SoundCard>,
}

impl SessionRecord {
    pub fn new(id: u64) -> Self {
        Self {
            id: SessionId(id),
            ..Default::default()
        }
    }

    pub fn with_state(mut self, state: CallState) -> Self {
        self.state = state;
        self
    }

    pub fn with_transfer_state(mut self, state: CallState) -> Self {
        self.transfer_state = state;
        self
    }

    pub fn with_reason(mut self, reason: Reason) -> Self {
        self.reason = reason;
        self
    }

    pub fn with_conference(mut self, in_conference: bool) -> Self {
        self.in_conference = in_conference;
        self
    }

    pub fn with_output_card(mut self, card: SoundCard) -> Self {
        self.output_card = Some(card);
        self
    }

    pub fn into_ref(self) -> SessionRef {
        Arc::new(self)
    }
}

impl CallSession for SessionRecord {
    fn id(&self) -> SessionId {
        self.id
    }

    fn state(&self) -> CallState {
        self.state
    }

    fn transfer_state(&self) -> CallState {
        self.transfer_state
    }

    fn reason(&self) -> Reason {
        self.reason
    }

    fn in_conference(&self) -> bool {
        self.in_conference
    }

    fn output_card(&self) -> Option<SoundCard> {
        self.output_card.clone()
    }
}
