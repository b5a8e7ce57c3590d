use crate::engine::FilterId;
use serde::Serialize;

/// Completion events reported by the audio engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EngineEvent {
    /// A file player reached the end of its file
    #[serde(rename = "player_eof")]
    PlayerEof(FilterId),

    /// A tone generator finished its tone or digit
    #[serde(rename = "dtmf_gen_end")]
    DtmfGenEnd(FilterId),
}

/// Kind of completion a notification is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NotifyKind {
    FilePlayerEnd,
    PlayToneEnd,
}

impl EngineEvent {
    pub fn filter(&self) -> FilterId {
        match self {
            EngineEvent::PlayerEof(filter) => *filter,
            EngineEvent::DtmfGenEnd(filter) => *filter,
        }
    }

    pub fn notify_kind(&self) -> NotifyKind {
        match self {
            EngineEvent::PlayerEof(_) => NotifyKind::FilePlayerEnd,
            EngineEvent::DtmfGenEnd(_) => NotifyKind::PlayToneEnd,
        }
    }
}

/// Type alias for the engine event sender
pub type EngineEventSender = tokio::sync::mpsc::UnboundedSender<EngineEvent>;

/// Type alias for the engine event receiver
pub type EngineEventReceiver = tokio::sync::mpsc::UnboundedReceiver<EngineEvent>;
