use crate::tone::CustomTone;
use anyhow::Result;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod sim;

/// Identifier of a sound card known to the audio engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SoundCard(pub String);

impl SoundCard {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SoundCard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SoundCard {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// Handle of a filter (generator or player) living inside the audio engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FilterId(pub u64);

impl fmt::Display for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "filter-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    ToneGenerator,
    LocalPlayer,
}

/// Usage hint given to a sound card before a stream is opened on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StreamType {
    Voice,
    Ring,
    Dtmf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlayerState {
    Closed,
    Paused,
    Playing,
}

/// Dedicated ring stream: a player and a tone generator bound to one card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RingStream {
    pub card: Option<SoundCard>,
    pub tone_generator: FilterId,
    pub player: FilterId,
}

impl RingStream {
    pub fn filter(&self, kind: ResourceKind) -> FilterId {
        match kind {
            ResourceKind::ToneGenerator => self.tone_generator,
            ResourceKind::LocalPlayer => self.player,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FilterCommand {
    /// Loop pause in milliseconds, -1 disables looping.
    PlayerSetLoop(i32),
    PlayerOpen(String),
    PlayerStart,
    PlayerClose,
    DtmfPlay { digit: char, duration_ms: u32 },
    DtmfStart(char),
    DtmfStop,
    DtmfPlayCustom(CustomTone),
    DtmfSetDefaultAmplitude(f32),
}

/// The media engine as seen by the tone manager.
///
/// Completion events are not returned from these calls; the engine reports
/// them asynchronously on the [`crate::event::EngineEventSender`] it was
/// built with.
#[cfg_attr(test, automock)]
pub trait AudioEngine: Send {
    /// Whether a call currently owns the audio path.
    fn in_call(&self) -> bool;

    /// Filter of the current call's (or local conference's) audio stream.
    fn call_stream_filter(&self, kind: ResourceKind) -> Option<FilterId>;

    fn set_stream_type(&mut self, card: &SoundCard, stream_type: StreamType);

    /// Starts a dedicated ring stream. Without a file only the generator is
    /// usable; with a file the player loops it with `loop_pause_ms` pauses.
    /// A `None` card means output goes to files instead of a device.
    fn start_ring_stream(
        &mut self,
        file: Option<String>,
        loop_pause_ms: u32,
        card: Option<SoundCard>,
    ) -> Result<RingStream>;

    fn stop_ring_stream(&mut self, stream: RingStream);

    fn start_ringtone_player(
        &mut self,
        card: SoundCard,
        file: String,
        loop_pause_ms: u32,
    ) -> Result<()>;

    fn ringtone_player_started(&self) -> bool;

    fn stop_ringtone_player(&mut self);

    fn filter_command(&mut self, filter: FilterId, command: FilterCommand) -> Result<()>;

    fn player_state(&self, filter: FilterId) -> Result<PlayerState>;
}
