//! Single-task event loop owning the [`ToneManager`].
//!
//! Commands from [`ToneHandle`]s, engine completion events and the cleanup
//! timer are all handled one at a time on this loop, so no state is shared
//! and a stop followed by a start is never interleaved with anything else.

use crate::config::Config;
use crate::engine::AudioEngine;
use crate::error::ToneError;
use crate::event::EngineEventReceiver;
use crate::manager::{ToneManager, ToneManagerStats, ToneState};
use crate::session::{Reason, SessionId, SessionRef};
use crate::tone::ToneId;
use anyhow::Result;
use tokio::select;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub enum ToneCommand {
    StartRingback(SessionRef),
    StartRingtone(SessionRef),
    StartErrorTone(SessionRef, Reason),
    StartNamedTone(SessionRef, ToneId),
    GoToCall(SessionRef),
    Stop(SessionRef),
    RemoveSession(SessionRef),
    Update(SessionRef),
    PlayDtmf {
        digit: char,
        duration_ms: u32,
        reply: oneshot::Sender<Result<(), ToneError>>,
    },
    StopDtmf,
    PlayLocal {
        audio_file: String,
        reply: oneshot::Sender<Result<(), ToneError>>,
    },
    StartDtmfStream,
    StopDtmfStream,
    StopRinging,
    StopTone,
    SetTone {
        reason: Reason,
        tone_id: ToneId,
        audio_file: Option<String>,
    },
    EnableToneIndications(bool),
    Stats(oneshot::Sender<ToneManagerStats>),
    ResetStats,
    SessionState(SessionId, oneshot::Sender<ToneState>),
}

impl ToneCommand {
    fn name(&self) -> &'static str {
        match self {
            ToneCommand::StartRingback(_) => "start_ringback",
            ToneCommand::StartRingtone(_) => "start_ringtone",
            ToneCommand::StartErrorTone(..) => "start_error_tone",
            ToneCommand::StartNamedTone(..) => "start_named_tone",
            ToneCommand::GoToCall(_) => "go_to_call",
            ToneCommand::Stop(_) => "stop",
            ToneCommand::RemoveSession(_) => "remove_session",
            ToneCommand::Update(_) => "update",
            ToneCommand::PlayDtmf { .. } => "play_dtmf",
            ToneCommand::StopDtmf => "stop_dtmf",
            ToneCommand::PlayLocal { .. } => "play_local",
            ToneCommand::StartDtmfStream => "start_dtmf_stream",
            ToneCommand::StopDtmfStream => "stop_dtmf_stream",
            ToneCommand::StopRinging => "stop_ringing",
            ToneCommand::StopTone => "stop_tone",
            ToneCommand::SetTone { .. } => "set_tone",
            ToneCommand::EnableToneIndications(_) => "enable_tone_indications",
            ToneCommand::Stats(_) => "stats",
            ToneCommand::ResetStats => "reset_stats",
            ToneCommand::SessionState(..) => "session_state",
        }
    }
}

pub type ToneCommandSender = mpsc::UnboundedSender<ToneCommand>;
pub type ToneCommandReceiver = mpsc::UnboundedReceiver<ToneCommand>;

/// Cloneable front of a running [`ToneService`].
#[derive(Clone)]
pub struct ToneHandle {
    sender: ToneCommandSender,
}

impl ToneHandle {
    fn send(&self, command: ToneCommand) -> Result<(), ToneError> {
        self.sender
            .send(command)
            .map_err(|_| ToneError::ServiceClosed)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ToneCommand,
    ) -> Result<T, ToneError> {
        let (reply, response) = oneshot::channel();
        self.send(build(reply))?;
        response.await.map_err(|_| ToneError::ServiceClosed)
    }

    pub fn start_ringback_tone(&self, session: SessionRef) -> Result<(), ToneError> {
        self.send(ToneCommand::StartRingback(session))
    }

    pub fn start_ringtone(&self, session: SessionRef) -> Result<(), ToneError> {
        self.send(ToneCommand::StartRingtone(session))
    }

    pub fn start_error_tone(&self, session: SessionRef, reason: Reason) -> Result<(), ToneError> {
        self.send(ToneCommand::StartErrorTone(session, reason))
    }

    pub fn start_named_tone(&self, session: SessionRef, tone_id: ToneId) -> Result<(), ToneError> {
        self.send(ToneCommand::StartNamedTone(session, tone_id))
    }

    pub fn go_to_call(&self, session: SessionRef) -> Result<(), ToneError> {
        self.send(ToneCommand::GoToCall(session))
    }

    pub fn stop(&self, session: SessionRef) -> Result<(), ToneError> {
        self.send(ToneCommand::Stop(session))
    }

    pub fn remove_session(&self, session: SessionRef) -> Result<(), ToneError> {
        self.send(ToneCommand::RemoveSession(session))
    }

    pub fn update(&self, session: SessionRef) -> Result<(), ToneError> {
        self.send(ToneCommand::Update(session))
    }

    pub async fn play_dtmf(&self, digit: char, duration_ms: u32) -> Result<(), ToneError> {
        self.request(|reply| ToneCommand::PlayDtmf {
            digit,
            duration_ms,
            reply,
        })
        .await?
    }

    pub fn stop_dtmf(&self) -> Result<(), ToneError> {
        self.send(ToneCommand::StopDtmf)
    }

    pub async fn play_local(&self, audio_file: impl Into<String>) -> Result<(), ToneError> {
        let audio_file = audio_file.into();
        self.request(|reply| ToneCommand::PlayLocal { audio_file, reply })
            .await?
    }

    pub fn start_dtmf_stream(&self) -> Result<(), ToneError> {
        self.send(ToneCommand::StartDtmfStream)
    }

    pub fn stop_dtmf_stream(&self) -> Result<(), ToneError> {
        self.send(ToneCommand::StopDtmfStream)
    }

    pub fn stop_ringing(&self) -> Result<(), ToneError> {
        self.send(ToneCommand::StopRinging)
    }

    pub fn stop_tone(&self) -> Result<(), ToneError> {
        self.send(ToneCommand::StopTone)
    }

    pub fn set_tone(
        &self,
        reason: Reason,
        tone_id: ToneId,
        audio_file: Option<String>,
    ) -> Result<(), ToneError> {
        self.send(ToneCommand::SetTone {
            reason,
            tone_id,
            audio_file,
        })
    }

    pub fn enable_tone_indications(&self, enabled: bool) -> Result<(), ToneError> {
        self.send(ToneCommand::EnableToneIndications(enabled))
    }

    pub async fn stats(&self) -> Result<ToneManagerStats, ToneError> {
        self.request(ToneCommand::Stats).await
    }

    pub fn reset_stats(&self) -> Result<(), ToneError> {
        self.send(ToneCommand::ResetStats)
    }

    pub async fn session_state(&self, session: SessionId) -> Result<ToneState, ToneError> {
        self.request(|reply| ToneCommand::SessionState(session, reply))
            .await
    }
}

pub struct ToneService {
    manager: ToneManager,
    commands: ToneCommandReceiver,
    events: EngineEventReceiver,
    token: CancellationToken,
}

impl ToneService {
    /// `events` must be the receiving end of the channel the engine reports
    /// completions on.
    pub fn new(
        engine: Box<dyn AudioEngine>,
        config: &Config,
        events: EngineEventReceiver,
    ) -> (Self, ToneHandle) {
        let (sender, commands) = mpsc::unbounded_channel();
        let service = Self {
            manager: ToneManager::new(engine, config),
            commands,
            events,
            token: CancellationToken::new(),
        };
        (service, ToneHandle { sender })
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Runs until cancelled or until every handle is dropped, then gives the
    /// manager back.
    pub async fn serve(mut self) -> Result<ToneManager> {
        info!("tone service started");
        loop {
            let deadline = self.manager.next_timer_deadline();
            select! {
                biased;
                _ = self.token.cancelled() => {
                    info!("tone service cancelled");
                    break;
                }
                Some(event) = self.events.recv() => {
                    debug!(?event, "engine event");
                    self.manager.on_engine_event(event);
                }
                _ = wait_deadline(deadline) => {
                    self.manager.on_cleanup_timer();
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.dispatch(command),
                    None => {
                        info!("all tone handles dropped");
                        break;
                    }
                },
            }
        }
        Ok(self.manager)
    }

    fn dispatch(&mut self, command: ToneCommand) {
        debug!(command = command.name(), "tone command");
        let manager = &mut self.manager;
        match command {
            ToneCommand::StartRingback(session) => manager.start_ringback_tone(&session),
            ToneCommand::StartRingtone(session) => manager.start_ringtone(&session),
            ToneCommand::StartErrorTone(session, reason) => {
                manager.start_error_tone(&session, reason)
            }
            ToneCommand::StartNamedTone(session, tone_id) => {
                manager.start_named_tone(&session, tone_id)
            }
            ToneCommand::GoToCall(session) => manager.go_to_call(&session),
            ToneCommand::Stop(session) => manager.stop(&session),
            ToneCommand::RemoveSession(session) => manager.remove_session(&session),
            ToneCommand::Update(session) => manager.update(&session),
            ToneCommand::PlayDtmf {
                digit,
                duration_ms,
                reply,
            } => {
                reply.send(manager.play_dtmf(digit, duration_ms)).ok();
            }
            ToneCommand::StopDtmf => manager.stop_dtmf(),
            ToneCommand::PlayLocal { audio_file, reply } => {
                reply.send(manager.play_local(&audio_file)).ok();
            }
            ToneCommand::StartDtmfStream => manager.start_dtmf_stream(),
            ToneCommand::StopDtmfStream => manager.stop_dtmf_stream(),
            ToneCommand::StopRinging => manager.stop_ringing(),
            ToneCommand::StopTone => manager.stop_tone(),
            ToneCommand::SetTone {
                reason,
                tone_id,
                audio_file,
            } => manager.set_tone(reason, tone_id, audio_file),
            ToneCommand::EnableToneIndications(enabled) => {
                manager.enable_tone_indications(enabled)
            }
            ToneCommand::Stats(reply) => {
                reply.send(manager.stats()).ok();
            }
            ToneCommand::ResetStats => manager.reset_stats(),
            ToneCommand::SessionState(session, reply) => {
                reply.send(manager.session_state(session)).ok();
            }
        }
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
