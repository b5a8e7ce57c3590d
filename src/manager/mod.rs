//! Tone arbitration across concurrent call sessions sharing one audio output.
//!
//! At most one ring indication (ringtone or ringback) is audible at any time,
//! and the ringtone has priority over the ringback. Tone state transitions
//! always complete, whether or not the engine managed to play anything.

use crate::config::{Config, SoundConfig};
use crate::engine::{AudioEngine, FilterCommand, FilterId, ResourceKind, RingStream, StreamType};
use crate::event::NotifyKind;
use crate::session::{CallState, Reason, SessionId, SessionRef};
use crate::tone::{CustomTone, ToneDescription, ToneId, ToneTable};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

mod driver;
pub mod stats;
pub mod table;
pub mod transition;

pub use driver::CleanupTimer;
pub use stats::ToneManagerStats;
pub use table::{SessionTable, ToneState};
use transition::{StopAction, UpdateAction, stop_action, update_action};

/// Pause between two loops of the ringback and ringtone files.
const RING_LOOP_PAUSE_MS: u32 = 2000;

pub struct ToneManager {
    engine: Box<dyn AudioEngine>,
    sound: SoundConfig,
    tone_indications: bool,
    tones: ToneTable,
    sessions: SessionTable,
    handles: HashMap<SessionId, SessionRef>,
    stats: ToneManagerStats,
    ring_stream: Option<RingStream>,
    notifications: HashSet<(FilterId, NotifyKind)>,
    cleanup_timer: Option<CleanupTimer>,
    dtmf_stream_started: bool,
}

impl ToneManager {
    pub fn new(engine: Box<dyn AudioEngine>, config: &Config) -> Self {
        info!("create tone manager");
        Self {
            engine,
            sound: config.sound.clone(),
            tone_indications: config.tone_indications,
            tones: config.tone_table(),
            sessions: SessionTable::new(),
            handles: HashMap::new(),
            stats: ToneManagerStats::default(),
            ring_stream: None,
            notifications: HashSet::new(),
            cleanup_timer: None,
            dtmf_stream_started: false,
        }
    }

    // ---------------------------------------------------
    // public entrypoints for tones
    // ---------------------------------------------------

    pub fn start_ringback_tone(&mut self, session: &SessionRef) {
        info!(session_id = %session.id(), "start ringback tone");
        self.refresh(session);
        self.print_debug_info(session);
        if self.sessions.get_state(session.id()) == ToneState::Ringback {
            return;
        }

        self.set_state(session, ToneState::Ringback);
        self.stats.start_ringback_tone += 1;

        if session.in_conference() {
            info!(session_id = %session.id(), "skip ringback tone, call is in conference");
            return;
        }

        if !self
            .sessions
            .is_another_session_in_state(session.id(), ToneState::Ringback)
        {
            self.do_stop_all_tones();
            self.do_start_ringback_tone(session);
        }
    }

    /// Rings for an incoming call. A ringtone takes over a playing ringback;
    /// when another session already rings this one stays silent until
    /// [`update_rings`](Self::update_rings) picks it up.
    pub fn start_ringtone(&mut self, session: &SessionRef) {
        info!(session_id = %session.id(), "start ringtone");
        self.refresh(session);
        self.print_debug_info(session);
        self.set_state(session, ToneState::Ringtone);
        if !self
            .sessions
            .is_another_session_in_state(session.id(), ToneState::Ringtone)
        {
            self.do_stop_all_tones();
            self.do_start_ringtone(session);
            self.stats.start_ringtone += 1;
        }
    }

    pub fn start_error_tone(&mut self, session: &SessionRef, reason: Reason) {
        info!(session_id = %session.id(), ?reason, "start error tone");
        self.refresh(session);
        self.set_state(session, ToneState::Tone);
        if self.tone_indications {
            self.print_debug_info(session);
            self.do_stop_all_tones();
            self.do_start_error_tone(session, reason);
            self.stats.start_error_tone += 1;
        }
    }

    pub fn start_named_tone(&mut self, session: &SessionRef, tone_id: ToneId) {
        info!(session_id = %session.id(), %tone_id, "start named tone");
        self.refresh(session);
        self.set_state(session, ToneState::Tone);
        if self.tone_indications {
            self.print_debug_info(session);
            self.do_stop_all_tones();
            self.do_start_named_tone(Some(session), tone_id);
            self.stats.start_named_tone += 1;
        }
    }

    pub fn go_to_call(&mut self, session: &SessionRef) {
        self.refresh(session);
        self.print_debug_info(session);
        info!(session_id = %session.id(), "go to call");
        self.do_stop(session.id(), ToneState::Call);
    }

    pub fn stop(&mut self, session: &SessionRef) {
        self.refresh(session);
        self.print_debug_info(session);
        info!(session_id = %session.id(), "stop");
        self.do_stop(session.id(), ToneState::None);
    }

    /// Forgets the session. Whatever it was playing must have been stopped
    /// already.
    pub fn remove_session(&mut self, session: &SessionRef) {
        self.print_debug_info(session);
        self.sessions.remove_session(session.id());
        self.handles.remove(&session.id());
    }

    /// Reacts to a call state change of `session`.
    ///
    /// Resuming the ringtone of a session that still rings is done here and
    /// not when the other session stops ringing: that session is still being
    /// answered or destroyed at that point.
    pub fn update(&mut self, session: &SessionRef) {
        let call_state = session.state();
        info!(session_id = %session.id(), ?call_state, "update");
        self.refresh(session);
        match update_action(call_state) {
            UpdateAction::RestartOtherRingtone => {
                self.print_debug_info(session);
                let other = self
                    .sessions
                    .find_another_session_in_state(session.id(), ToneState::Ringtone)
                    .and_then(|id| self.handles.get(&id).cloned());
                if let Some(other) = other {
                    info!(session_id = %other.id(), "start again ringtone");
                    self.do_start_ringtone(&other);
                    self.stats.start_ringtone += 1;
                }
            }
            UpdateAction::EndOfCall => {
                // the error tone does not change the state of the session
                self.do_stop(session.id(), ToneState::None);
                if self.tone_indications {
                    let reason = if session.transfer_state() == CallState::Connected {
                        Reason::Transferred
                    } else {
                        session.reason()
                    };
                    self.do_start_error_tone(session, reason);
                    self.stats.start_error_tone += 1;
                }
            }
            UpdateAction::EnterCall => {
                self.set_state(session, ToneState::Call);
                self.update_rings();
            }
            UpdateAction::Ignore => {}
        }
    }

    /// Starts the pending ring with the highest priority, if nothing plays it
    /// yet. Runs after a tone ends or when a session reaches a call.
    pub fn update_rings(&mut self) {
        info!("update rings");
        if let Some(id) = self.sessions.get_session_in_state(ToneState::Ringtone) {
            if self.engine.ringtone_player_started() {
                debug!(session_id = %id, "ringtone already playing");
                return;
            }
            if let Some(session) = self.handles.get(&id).cloned() {
                self.do_start_ringtone(&session);
                self.stats.start_ringtone += 1;
            }
        } else if let Some(id) = self.sessions.get_session_in_state(ToneState::Ringback) {
            if self.ring_stream.is_some() {
                debug!(session_id = %id, "ring stream busy, ringback not restarted");
                return;
            }
            if let Some(session) = self.handles.get(&id).cloned() {
                self.do_start_ringback_tone(&session);
                self.stats.start_ringback_tone += 1;
            }
        }
    }

    // ---------------------------------------------------
    // configuration and introspection
    // ---------------------------------------------------

    pub fn set_tone(&mut self, reason: Reason, tone_id: ToneId, audio_file: Option<String>) {
        info!(?reason, %tone_id, ?audio_file, "set tone");
        self.tones.set_tone(reason, tone_id, audio_file);
    }

    pub fn tone_from_reason(&self, reason: Reason) -> Option<&ToneDescription> {
        self.tones.from_reason(reason)
    }

    pub fn tone_from_id(&self, tone_id: ToneId) -> Option<&ToneDescription> {
        self.tones.from_id(tone_id)
    }

    pub fn enable_tone_indications(&mut self, enabled: bool) {
        self.tone_indications = enabled;
    }

    pub fn tone_indications_enabled(&self) -> bool {
        self.tone_indications
    }

    pub fn session_state(&self, session: SessionId) -> ToneState {
        self.sessions.get_state(session)
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn stats(&self) -> ToneManagerStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }

    pub fn ring_stream(&self) -> Option<&RingStream> {
        self.ring_stream.as_ref()
    }

    pub fn dtmf_stream_started(&self) -> bool {
        self.dtmf_stream_started
    }

    // ---------------------------------------------------
    // sessions
    // ---------------------------------------------------

    fn set_state(&mut self, session: &SessionRef, state: ToneState) {
        self.handles.insert(session.id(), session.clone());
        self.sessions.set_state(session.id(), state);
    }

    /// Keeps the latest handle of an already known session.
    fn refresh(&mut self, session: &SessionRef) {
        if let Some(handle) = self.handles.get_mut(&session.id()) {
            *handle = session.clone();
        }
    }

    fn print_debug_info(&self, session: &SessionRef) {
        let tone_state = self.sessions.get_state(session.id());
        info!(
            session_id = %session.id(),
            %tone_state,
            call_state = ?session.state(),
            "state changed"
        );
    }

    // ---------------------------------------------------
    // start
    // ---------------------------------------------------

    fn do_start_error_tone(&mut self, session: &SessionRef, reason: Reason) {
        info!(session_id = %session.id(), ?reason, "do start error tone");
        match self.tones.from_reason(reason).cloned() {
            Some(ToneDescription {
                audio_file: Some(file),
                ..
            }) => {
                if let Err(e) = self.play_file(&file) {
                    warn!(?reason, "failed to play error tone: {}", e);
                }
            }
            Some(tone) if tone.tone_id != ToneId::Undefined => {
                self.play_tone(Some(session), CustomTone::from_id(tone.tone_id));
            }
            _ => {
                debug!(?reason, "no tone for reason");
            }
        }
    }

    fn do_start_named_tone(&mut self, session: Option<&SessionRef>, tone_id: ToneId) {
        info!(%tone_id, "do start named tone");
        let file = self
            .tones
            .from_id(tone_id)
            .and_then(|tone| tone.audio_file.clone());
        match file {
            Some(file) => {
                if let Err(e) = self.play_file(&file) {
                    warn!(%tone_id, "failed to play named tone: {}", e);
                }
            }
            None => self.play_tone(session, CustomTone::from_id(tone_id)),
        }
    }

    fn do_start_ringback_tone(&mut self, session: &SessionRef) {
        info!(session_id = %session.id(), "do start ringback tone");
        let Some(play_card) = self.sound.play_card.clone() else {
            debug!("no play card, ringback skipped");
            return;
        };
        // a device chosen before the ringback started wins over the defaults
        let ring_card = session
            .output_card()
            .or_else(|| self.sound.lsd_card.clone())
            .unwrap_or(play_card);

        let Some(remote_ring) = self.sound.remote_ring.clone() else {
            debug!("no ringback file configured");
            return;
        };
        self.engine.set_stream_type(&ring_card, StreamType::Voice);
        if let Some(stream) = self.ring_stream.take() {
            self.stop_ring_stream(stream);
        }
        let card = if self.sound.use_files {
            None
        } else {
            Some(ring_card)
        };
        match self
            .engine
            .start_ring_stream(Some(remote_ring), RING_LOOP_PAUSE_MS, card)
        {
            Ok(stream) => self.ring_stream = Some(stream),
            Err(e) => warn!(session_id = %session.id(), "failed to start ringback: {}", e),
        }
    }

    fn do_start_ringtone(&mut self, session: &SessionRef) {
        info!(session_id = %session.id(), "do start ringtone");
        let id = session.id();
        if self.sessions.is_another_session_in_state(id, ToneState::Call)
            || self.sessions.is_another_session_in_state(id, ToneState::Ringtone)
        {
            // play a tone within the context of the current call
            if self.tone_indications {
                self.do_start_named_tone(Some(session), ToneId::CallWaiting);
            }
            return;
        }

        let Some(ring_card) = self
            .sound
            .lsd_card
            .clone()
            .or_else(|| self.sound.ring_card.clone())
        else {
            debug!("no ring card, ringtone skipped");
            return;
        };
        if self.sound.native_ringing {
            debug!("native ringing enabled, not playing ringtone");
            return;
        }
        if self.sound.callkit {
            info!("callkit is enabled, not playing ringtone");
            return;
        }
        let Some(local_ring) = self.sound.local_ring.clone() else {
            debug!("no ringtone file configured");
            return;
        };
        // the ringtone has priority over a ringback still playing
        self.do_stop_ringback_tone();
        self.engine.set_stream_type(&ring_card, StreamType::Ring);
        if let Err(e) = self
            .engine
            .start_ringtone_player(ring_card, local_ring, RING_LOOP_PAUSE_MS)
        {
            warn!(session_id = %id, "failed to start ringtone: {}", e);
        }
    }

    // ---------------------------------------------------
    // stop
    // ---------------------------------------------------

    fn do_stop(&mut self, session: SessionId, new_state: ToneState) {
        let from = self.sessions.get_state(session);
        info!(session_id = %session, %from, to = %new_state, "do stop");
        let action = stop_action(from);
        if !action.changes_state() {
            info!(session_id = %session, "nothing to stop");
            return;
        }
        match action {
            StopAction::StopRingback => {
                self.do_stop_ringback_tone();
                self.stats.stop_ringback_tone += 1;
            }
            StopAction::StopRingtone => {
                self.do_stop_ringtone(Some(session));
                self.stats.stop_ringtone += 1;
            }
            StopAction::StopTone => {
                self.do_stop_tone();
                self.stats.stop_tone += 1;
            }
            StopAction::StopWaitingTone => {
                if self
                    .sessions
                    .is_another_session_in_state(session, ToneState::Ringtone)
                {
                    self.do_stop_tone();
                    self.stats.stop_tone += 1;
                }
            }
            StopAction::Nothing => {}
        }
        self.sessions.set_state(session, new_state);
    }

    fn do_stop_ringback_tone(&mut self) {
        if let Some(stream) = self.ring_stream.take() {
            info!("do stop ringback tone");
            self.stop_ring_stream(stream);
        }
    }

    fn do_stop_tone(&mut self) {
        info!("do stop tone");
        self.do_stop_ringback_tone();

        if self.sessions.is_there_a_call() {
            let play_card = self.sound.play_card.clone();
            if let Some(player) = self.get_audio_resource(ResourceKind::LocalPlayer, play_card, false) {
                self.command(player, FilterCommand::PlayerClose);
            }
            if let Some(generator) = self.get_audio_resource(ResourceKind::ToneGenerator, None, false)
            {
                self.command(generator, FilterCommand::DtmfStop);
            }
        }
    }

    fn do_stop_all_tones(&mut self) {
        info!("do stop all tones");
        self.do_stop_tone();
        if self.engine.ringtone_player_started() {
            self.engine.stop_ringtone_player();
        }
    }

    /// Without a session, any call counts as another call.
    fn do_stop_ringtone(&mut self, session: Option<SessionId>) {
        info!("do stop ringtone");
        let in_call_elsewhere = match session {
            Some(id) => self.sessions.is_another_session_in_state(id, ToneState::Call),
            None => self.sessions.is_there_a_call(),
        };
        if in_call_elsewhere {
            // stop the tone within the context of the current call
            self.do_stop_tone();
        } else if self.engine.ringtone_player_started() {
            self.engine.stop_ringtone_player();
        }
    }
}
