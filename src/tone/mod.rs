use crate::session::Reason;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

pub mod synth;

/// Named call-progress tones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToneId {
    #[default]
    Undefined,
    Busy,
    CallWaiting,
    CallOnHold,
    CallLost,
    CallEnd,
}

impl fmt::Display for ToneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ToneId::Undefined => "undefined",
            ToneId::Busy => "busy",
            ToneId::CallWaiting => "call_waiting",
            ToneId::CallOnHold => "call_on_hold",
            ToneId::CallLost => "call_lost",
            ToneId::CallEnd => "call_end",
        };
        f.write_str(name)
    }
}

/// Waveform description handed to a tone generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomTone {
    /// Length of one beep in milliseconds, 0 means nothing to play.
    pub duration_ms: u32,
    /// Frequencies in Hz mixed into each beep.
    pub frequencies: Vec<u32>,
    /// Silence between beeps in milliseconds.
    pub interval_ms: u32,
    pub repeat_count: u32,
    pub amplitude: f32,
}

impl Default for CustomTone {
    fn default() -> Self {
        Self {
            duration_ms: 0,
            frequencies: Vec::new(),
            interval_ms: 0,
            repeat_count: 0,
            amplitude: 1.0,
        }
    }
}

impl CustomTone {
    /// Built-in waveform for a named tone. These are french tones, except the
    /// lost-call one which is the mono-frequency USA congestion tone.
    pub fn from_id(tone_id: ToneId) -> Self {
        let def = Self::default();
        match tone_id {
            ToneId::CallOnHold => Self {
                duration_ms: 300,
                frequencies: vec![440],
                interval_ms: 2000,
                repeat_count: 3,
                ..def
            },
            ToneId::CallWaiting => Self {
                duration_ms: 300,
                frequencies: vec![440],
                interval_ms: 2000,
                ..def
            },
            ToneId::Busy => Self {
                duration_ms: 500,
                frequencies: vec![440],
                interval_ms: 500,
                repeat_count: 3,
                ..def
            },
            ToneId::CallLost => Self {
                duration_ms: 250,
                frequencies: vec![620],
                interval_ms: 250,
                repeat_count: 3,
                ..def
            },
            // may overlap other calls, hence the lower amplitude
            ToneId::CallEnd => Self {
                duration_ms: 200,
                frequencies: vec![480],
                interval_ms: 200,
                repeat_count: 2,
                amplitude: 0.5,
            },
            ToneId::Undefined => {
                warn!(%tone_id, "unhandled tone id");
                def
            }
        }
    }
}

/// Maps a reason and a tone id to an audio file or a synthesized tone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToneDescription {
    pub reason: Reason,
    pub tone_id: ToneId,
    pub audio_file: Option<String>,
}

/// Ordered list of tone descriptions, at most one per reason.
#[derive(Debug, Clone, Default)]
pub struct ToneTable {
    tones: Vec<ToneDescription>,
}

impl ToneTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The descriptions installed when no tone list is configured.
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        table.set_tone(Reason::Busy, ToneId::Busy, None);
        table.set_tone(Reason::IoError, ToneId::CallLost, None);
        table.set_tone(Reason::None, ToneId::CallEnd, None);
        table
    }

    /// Registers a description, replacing the one already set for `reason`.
    pub fn set_tone(&mut self, reason: Reason, tone_id: ToneId, audio_file: Option<String>) {
        self.tones.retain(|tone| tone.reason != reason);
        self.tones.push(ToneDescription {
            reason,
            tone_id,
            audio_file,
        });
    }

    pub fn from_reason(&self, reason: Reason) -> Option<&ToneDescription> {
        self.tones.iter().find(|tone| tone.reason == reason)
    }

    pub fn from_id(&self, tone_id: ToneId) -> Option<&ToneDescription> {
        self.tones.iter().find(|tone| tone.tone_id == tone_id)
    }

    pub fn len(&self) -> usize {
        self.tones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tones.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToneDescription> {
        self.tones.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_tone_lookup_by_reason_and_id() {
        let mut table = ToneTable::new();
        table.set_tone(Reason::Busy, ToneId::Busy, Some("/sounds/busy.wav".to_string()));

        let by_reason = table.from_reason(Reason::Busy).cloned();
        let by_id = table.from_id(ToneId::Busy).cloned();
        assert!(by_reason.is_some());
        assert_eq!(by_reason, by_id);
        assert_eq!(
            by_reason.and_then(|t| t.audio_file),
            Some("/sounds/busy.wav".to_string())
        );
    }

    #[test]
    fn test_set_tone_replaces_same_reason() {
        let mut table = ToneTable::new();
        table.set_tone(Reason::Busy, ToneId::Busy, None);
        table.set_tone(Reason::Declined, ToneId::CallEnd, None);
        table.set_tone(Reason::Busy, ToneId::CallLost, Some("lost.wav".to_string()));

        assert_eq!(table.len(), 2);
        let busy = table.from_reason(Reason::Busy).unwrap();
        assert_eq!(busy.tone_id, ToneId::CallLost);
        assert_eq!(busy.audio_file.as_deref(), Some("lost.wav"));
        assert!(table.from_id(ToneId::Busy).is_none());
        // replaced entries move to the back
        let order: Vec<Reason> = table.iter().map(|t| t.reason).collect();
        assert_eq!(order, vec![Reason::Declined, Reason::Busy]);
    }

    #[test]
    fn test_missing_tone() {
        let table = ToneTable::new();
        assert!(table.is_empty());
        assert!(table.from_reason(Reason::NotFound).is_none());
        assert!(table.from_id(ToneId::CallOnHold).is_none());
    }

    #[test]
    fn test_default_table() {
        let table = ToneTable::with_defaults();
        assert_eq!(table.from_reason(Reason::Busy).unwrap().tone_id, ToneId::Busy);
        assert_eq!(table.from_reason(Reason::IoError).unwrap().tone_id, ToneId::CallLost);
        assert_eq!(table.from_reason(Reason::None).unwrap().tone_id, ToneId::CallEnd);
    }

    #[test]
    fn test_builtin_waveforms() {
        let busy = CustomTone::from_id(ToneId::Busy);
        assert_eq!(busy.duration_ms, 500);
        assert_eq!(busy.interval_ms, 500);
        assert_eq!(busy.repeat_count, 3);
        assert_eq!(busy.frequencies, vec![440]);

        let waiting = CustomTone::from_id(ToneId::CallWaiting);
        assert_eq!(waiting.repeat_count, 0);
        assert_eq!(waiting.interval_ms, 2000);

        let end = CustomTone::from_id(ToneId::CallEnd);
        assert_eq!(end.amplitude, 0.5);
        assert_eq!(end.frequencies, vec![480]);

        let lost = CustomTone::from_id(ToneId::CallLost);
        assert_eq!(lost.frequencies, vec![620]);

        let undefined = CustomTone::from_id(ToneId::Undefined);
        assert_eq!(undefined.duration_ms, 0);
        assert!(undefined.frequencies.is_empty());
    }
}
