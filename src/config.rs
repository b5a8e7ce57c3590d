use crate::engine::SoundCard;
use crate::session::Reason;
use crate::tone::{ToneId, ToneTable};
use anyhow::Error;
use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Parser, Debug)]
#[command(version, about = "Plays tone arbitration scenarios on a simulated audio engine")]
pub struct Cli {
    #[clap(long)]
    pub conf: Option<String>,

    /// Scenario file to play
    #[clap(long)]
    pub scenario: String,

    /// Overrides the configured log level
    #[clap(long)]
    pub log_level: Option<String>,

    /// Directory receiving synthesized tones as WAV files
    #[clap(long)]
    pub capture: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub log_file: Option<String>,
    /// Gates error and named tones.
    pub tone_indications: bool,
    pub sound: SoundConfig,
    /// `None` installs [`ToneTable::with_defaults`].
    pub tones: Option<Vec<ToneConfigItem>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SoundConfig {
    pub play_card: Option<SoundCard>,
    pub ring_card: Option<SoundCard>,
    /// Local sound device, takes over both ring and play cards for tones.
    pub lsd_card: Option<SoundCard>,
    /// Ringback file played to the caller.
    pub remote_ring: Option<String>,
    /// Ringtone file played to the callee.
    pub local_ring: Option<String>,
    /// Route the ring stream to files instead of a device.
    pub use_files: bool,
    pub native_ringing: bool,
    pub callkit: bool,
    pub dtmf_player_amp: f32,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ToneConfigItem {
    pub reason: Reason,
    #[serde(default)]
    pub tone_id: ToneId,
    pub audio_file: Option<String>,
}

impl Default for SoundConfig {
    fn default() -> Self {
        Self {
            play_card: Some(SoundCard::new("default")),
            ring_card: Some(SoundCard::new("default")),
            lsd_card: None,
            remote_ring: None,
            local_ring: None,
            use_files: false,
            native_ringing: false,
            callkit: false,
            dtmf_player_amp: 0.1,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            log_file: None,
            tone_indications: true,
            sound: SoundConfig::default(),
            tones: None,
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self, Error> {
        let config = toml::from_str(
            &std::fs::read_to_string(path).map_err(|e| anyhow::anyhow!("{}: {}", e, path))?,
        )?;
        Ok(config)
    }

    pub fn tone_table(&self) -> ToneTable {
        match self.tones {
            Some(ref items) => {
                let mut table = ToneTable::new();
                for item in items {
                    table.set_tone(item.reason, item.tone_id, item.audio_file.clone());
                }
                table
            }
            None => ToneTable::with_defaults(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.tone_indications);
        assert_eq!(config.sound.play_card, Some(SoundCard::new("default")));
        assert_eq!(config.sound.dtmf_player_amp, 0.1);
        assert_eq!(config.tone_table().len(), 3);
    }

    #[test]
    fn test_load_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            log_level = "debug"
            tone_indications = false

            [sound]
            play_card = "headset"
            lsd_card = "speaker"
            remote_ring = "/sounds/ringback.wav"
            callkit = true

            [[tones]]
            reason = "busy"
            tone_id = "busy"
            audio_file = "/sounds/busy.wav"

            [[tones]]
            reason = "busy"
            tone_id = "call_lost"

            [[tones]]
            reason = "declined"
            "#
        )
        .unwrap();

        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert!(!config.tone_indications);
        assert_eq!(config.sound.play_card, Some(SoundCard::new("headset")));
        // unspecified fields keep their defaults
        assert_eq!(config.sound.ring_card, Some(SoundCard::new("default")));
        assert_eq!(config.sound.lsd_card, Some(SoundCard::new("speaker")));
        assert!(config.sound.callkit);
        assert_eq!(config.sound.dtmf_player_amp, 0.1);

        let table = config.tone_table();
        assert_eq!(table.len(), 2);
        let busy = table.from_reason(Reason::Busy).unwrap();
        assert_eq!(busy.tone_id, ToneId::CallLost);
        assert_eq!(busy.audio_file, None);
        assert_eq!(table.from_reason(Reason::Declined).unwrap().tone_id, ToneId::Undefined);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load("/nonexistent/tonesim.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/tonesim.toml"));
    }
}
