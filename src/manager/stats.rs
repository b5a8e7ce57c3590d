use serde::{Deserialize, Serialize};

/// Counters of physical tone starts and stops, for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToneManagerStats {
    pub start_ringback_tone: u32,
    pub start_ringtone: u32,
    pub start_error_tone: u32,
    pub start_named_tone: u32,
    pub stop_ringback_tone: u32,
    pub stop_ringtone: u32,
    pub stop_tone: u32,
}

impl ToneManagerStats {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
