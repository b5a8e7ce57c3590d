//! Scripted call events played against a running [`ToneService`](crate::service::ToneService).
//!
//! ```toml
//! name = "ringtone over ringback"
//!
//! [[steps]]
//! action = "start_ringback"
//! session = 1
//!
//! [[steps]]
//! action = "start_ringtone"
//! session = 2
//!
//! [[steps]]
//! action = "wait"
//! ms = 1500
//! ```
use crate::engine::sim::SimulatedEngine;
use crate::engine::SoundCard;
use crate::error::ToneError;
use crate::manager::ToneManagerStats;
use crate::service::ToneHandle;
use crate::session::{CallState, Reason, SessionRecord, SessionRef};
use crate::tone::ToneId;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Scenario {
    pub name: Option<String>,
    /// Initial snapshots; sessions not listed start idle.
    pub sessions: Vec<SessionRecord>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    StartRingback {
        session: u64,
    },
    StartRingtone {
        session: u64,
    },
    ErrorTone {
        session: u64,
        reason: Reason,
    },
    NamedTone {
        session: u64,
        tone_id: ToneId,
    },
    GoToCall {
        session: u64,
    },
    Stop {
        session: u64,
    },
    Remove {
        session: u64,
    },
    /// Moves the session to `state` and reports it with an update.
    CallState {
        session: u64,
        state: CallState,
        #[serde(default)]
        reason: Option<Reason>,
        #[serde(default)]
        transfer_state: Option<CallState>,
    },
    SetOutputCard {
        session: u64,
        #[serde(default)]
        card: Option<SoundCard>,
    },
    SetConference {
        session: u64,
        in_conference: bool,
    },
    PlayDtmf {
        digit: char,
        #[serde(default)]
        duration_ms: u32,
    },
    StopDtmf,
    PlayLocal {
        file: String,
    },
    StartDtmfStream,
    StopDtmfStream,
    StopRinging,
    StopTone,
    SetTone {
        reason: Reason,
        #[serde(default)]
        tone_id: ToneId,
        #[serde(default)]
        audio_file: Option<String>,
    },
    ToneIndications {
        enabled: bool,
    },
    /// Attaches or detaches a call audio stream in the simulated engine.
    SetCallActive {
        active: bool,
    },
    Wait {
        ms: u64,
    },
    ResetStats,
}

impl Scenario {
    pub fn load(path: &str) -> Result<Self> {
        let scenario = toml::from_str(
            &std::fs::read_to_string(path).map_err(|e| anyhow!("{}: {}", e, path))?,
        )?;
        Ok(scenario)
    }
}

pub struct ScenarioRunner {
    handle: ToneHandle,
    engine: SimulatedEngine,
    sessions: HashMap<u64, SessionRecord>,
}

impl ScenarioRunner {
    pub fn new(handle: ToneHandle, engine: SimulatedEngine) -> Self {
        Self {
            handle,
            engine,
            sessions: HashMap::new(),
        }
    }

    fn record(&mut self, id: u64) -> &mut SessionRecord {
        self.sessions
            .entry(id)
            .or_insert_with(|| SessionRecord::new(id))
    }

    fn session(&mut self, id: u64) -> SessionRef {
        self.record(id).clone().into_ref()
    }

    /// Plays every step in order and returns the statistics once the
    /// service has handled them all.
    pub async fn run(&mut self, scenario: &Scenario) -> Result<ToneManagerStats> {
        info!(
            name = scenario.name.as_deref().unwrap_or("unnamed"),
            steps = scenario.steps.len(),
            "run scenario"
        );
        for record in &scenario.sessions {
            self.sessions.insert(record.id.0, record.clone());
        }
        for (index, step) in scenario.steps.iter().enumerate() {
            debug!(index, ?step, "scenario step");
            self.step(step)
                .await
                .map_err(|e| anyhow!("step {} failed: {}", index, e))?;
        }
        Ok(self.handle.stats().await?)
    }

    async fn step(&mut self, step: &Step) -> Result<(), ToneError> {
        let handle = self.handle.clone();
        match step {
            Step::StartRingback { session } => handle.start_ringback_tone(self.session(*session)),
            Step::StartRingtone { session } => handle.start_ringtone(self.session(*session)),
            Step::ErrorTone { session, reason } => {
                handle.start_error_tone(self.session(*session), *reason)
            }
            Step::NamedTone { session, tone_id } => {
                handle.start_named_tone(self.session(*session), *tone_id)
            }
            Step::GoToCall { session } => handle.go_to_call(self.session(*session)),
            Step::Stop { session } => handle.stop(self.session(*session)),
            Step::Remove { session } => {
                let removed = self.session(*session);
                self.sessions.remove(session);
                handle.remove_session(removed)
            }
            Step::CallState {
                session,
                state,
                reason,
                transfer_state,
            } => {
                let record = self.record(*session);
                record.state = *state;
                if let Some(reason) = reason {
                    record.reason = *reason;
                }
                if let Some(transfer_state) = transfer_state {
                    record.transfer_state = *transfer_state;
                }
                handle.update(self.session(*session))
            }
            Step::SetOutputCard { session, card } => {
                self.record(*session).output_card = card.clone();
                Ok(())
            }
            Step::SetConference {
                session,
                in_conference,
            } => {
                self.record(*session).in_conference = *in_conference;
                Ok(())
            }
            Step::PlayDtmf { digit, duration_ms } => {
                tolerate(handle.play_dtmf(*digit, *duration_ms).await)
            }
            Step::StopDtmf => handle.stop_dtmf(),
            Step::PlayLocal { file } => tolerate(handle.play_local(file.as_str()).await),
            Step::StartDtmfStream => handle.start_dtmf_stream(),
            Step::StopDtmfStream => handle.stop_dtmf_stream(),
            Step::StopRinging => handle.stop_ringing(),
            Step::StopTone => handle.stop_tone(),
            Step::SetTone {
                reason,
                tone_id,
                audio_file,
            } => handle.set_tone(*reason, *tone_id, audio_file.clone()),
            Step::ToneIndications { enabled } => handle.enable_tone_indications(*enabled),
            Step::SetCallActive { active } => {
                // commands already sent must run against the previous engine state
                handle.stats().await?;
                self.engine.set_call_active(*active);
                Ok(())
            }
            Step::Wait { ms } => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                Ok(())
            }
            Step::ResetStats => handle.reset_stats(),
        }
    }
}

/// Playback failures are part of what a scenario may exercise; only a closed
/// service stops it.
fn tolerate(result: Result<(), ToneError>) -> Result<(), ToneError> {
    match result {
        Err(ToneError::ServiceClosed) => Err(ToneError::ServiceClosed),
        Err(e) => {
            warn!("playback failed: {}", e);
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::service::ToneService;
    use crate::session::SessionId;
    use tokio::sync::mpsc;

    const SCENARIO: &str = r#"
        name = "busy callee"

        [[sessions]]
        id = 1
        state = "outgoing_ringing"

        [[steps]]
        action = "start_ringback"
        session = 1

        [[steps]]
        action = "wait"
        ms = 500

        [[steps]]
        action = "call_state"
        session = 1
        state = "error"
        reason = "busy"

        [[steps]]
        action = "play_dtmf"
        digit = "x"

        [[steps]]
        action = "stop_dtmf"
    "#;

    #[test]
    fn test_parse_scenario() {
        let scenario: Scenario = toml::from_str(SCENARIO).unwrap();
        assert_eq!(scenario.name.as_deref(), Some("busy callee"));
        assert_eq!(scenario.sessions[0].state, CallState::OutgoingRinging);
        assert_eq!(scenario.steps.len(), 5);
        assert_eq!(
            scenario.steps[2],
            Step::CallState {
                session: 1,
                state: CallState::Error,
                reason: Some(Reason::Busy),
                transfer_state: None,
            }
        );
        assert_eq!(
            scenario.steps[3],
            Step::PlayDtmf {
                digit: 'x',
                duration_ms: 0
            }
        );
        assert_eq!(scenario.steps[4], Step::StopDtmf);
    }

    #[test]
    fn test_load_scenario_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("busy.toml");
        std::fs::write(&path, SCENARIO).unwrap();
        let scenario = Scenario::load(path.to_str().unwrap()).unwrap();
        assert_eq!(scenario.steps.len(), 5);

        assert!(Scenario::load("/nonexistent/scenario.toml").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_scenario() {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = SimulatedEngine::new().with_events(tx);
        engine.register_file("ringback.wav", Duration::from_secs(2));
        let mut config = Config::default();
        config.sound.remote_ring = Some("ringback.wav".to_string());

        let (service, handle) = ToneService::new(Box::new(engine.clone()), &config, rx);
        let token = service.token();
        let serving = tokio::spawn(service.serve());

        let scenario: Scenario = toml::from_str(SCENARIO).unwrap();
        let mut runner = ScenarioRunner::new(handle.clone(), engine.clone());
        let stats = runner.run(&scenario).await.unwrap();

        assert_eq!(stats.start_ringback_tone, 1);
        assert_eq!(stats.stop_ringback_tone, 1);
        assert_eq!(stats.start_error_tone, 1);
        assert_eq!(engine.ringback(), None);
        assert_eq!(
            handle.session_state(SessionId(1)).await.unwrap(),
            crate::manager::ToneState::None
        );

        token.cancel();
        serving.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_closed_service_stops_scenario() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let engine = SimulatedEngine::new();
        let (service, handle) = ToneService::new(Box::new(engine.clone()), &Config::default(), rx);
        drop(service);

        let scenario = Scenario {
            steps: vec![Step::StartRingtone { session: 1 }],
            ..Default::default()
        };
        let mut runner = ScenarioRunner::new(handle, engine);
        let err = runner.run(&scenario).await.unwrap_err();
        assert!(err.to_string().contains("step 0"));
    }
}
