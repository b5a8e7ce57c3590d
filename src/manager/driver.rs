use super::{ToneManager, ToneState};
use crate::engine::{
    FilterCommand, FilterId, PlayerState, ResourceKind, RingStream, SoundCard, StreamType,
};
use crate::error::ToneError;
use crate::event::{EngineEvent, NotifyKind};
use crate::session::SessionRef;
use crate::tone::{synth, CustomTone};
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Extra time granted to a repeating tone before the cleanup timer polls it.
const CLEANUP_MARGIN_MS: u64 = 1000;

/// Watchdog armed while a repeating synthesized tone plays, in case its end
/// event never arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupTimer {
    pub deadline: Instant,
    pub period: Duration,
}

impl ToneManager {
    // ---------------------------------------------------
    // core entrypoints: dtmf and local playback
    // ---------------------------------------------------

    /// Plays a digit on the tone generator, for `duration_ms` or until
    /// [`stop_dtmf`](Self::stop_dtmf) when 0.
    pub fn play_dtmf(&mut self, digit: char, duration_ms: u32) -> Result<(), ToneError> {
        info!(%digit, duration_ms, "play dtmf");
        if !synth::is_dtmf_digit(digit) {
            return Err(ToneError::InvalidDigit(digit));
        }
        if let Some(session) = self.sessions.get_session_in_state(ToneState::Tone) {
            self.do_stop(session, ToneState::None);
        }

        let card = if self.engine.in_call() {
            self.sound.play_card.clone()
        } else {
            self.sound.ring_card.clone()
        };
        let Some(generator) = self.get_audio_resource(ResourceKind::ToneGenerator, card, true)
        else {
            error!("no dtmf generator at this time");
            return Err(ToneError::ResourceUnavailable(ResourceKind::ToneGenerator));
        };

        let command = if duration_ms > 0 {
            FilterCommand::DtmfPlay { digit, duration_ms }
        } else {
            FilterCommand::DtmfStart(digit)
        };
        self.engine.filter_command(generator, command)?;
        Ok(())
    }

    pub fn stop_dtmf(&mut self) {
        info!("stop dtmf");
        if let Some(generator) = self.get_audio_resource(ResourceKind::ToneGenerator, None, false) {
            self.command(generator, FilterCommand::DtmfStop);
        }
    }

    pub fn play_local(&mut self, audio_file: &str) -> Result<(), ToneError> {
        info!(%audio_file, "play local");
        self.play_file(audio_file)
    }

    /// Makes sure the ring stream exists so digits play without delay.
    pub fn start_dtmf_stream(&mut self) {
        info!("start dtmf stream");
        let ring_card = self.sound.ring_card.clone();
        if self
            .get_audio_resource(ResourceKind::ToneGenerator, ring_card, true)
            .is_none()
        {
            warn!("dtmf stream started without a tone generator");
        }
        self.dtmf_stream_started = true;
    }

    pub fn stop_dtmf_stream(&mut self) {
        if !self.dtmf_stream_started {
            return;
        }
        info!("stop dtmf stream");
        self.stop_tone();
        self.dtmf_stream_started = false;
    }

    pub fn stop_ringing(&mut self) {
        info!("stop ringing");
        self.do_stop_ringtone(None);
    }

    pub fn stop_tone(&mut self) {
        info!("stop tone");
        self.do_stop_tone();
    }

    // ---------------------------------------------------
    // completion events
    // ---------------------------------------------------

    /// Dispatches a completion event, once, if a notification is registered
    /// for its filter.
    pub fn on_engine_event(&mut self, event: EngineEvent) {
        if !self
            .notifications
            .contains(&(event.filter(), event.notify_kind()))
        {
            debug!(?event, "no notification registered, event ignored");
            return;
        }
        match event {
            EngineEvent::PlayerEof(_) => self.on_file_player_end(),
            EngineEvent::DtmfGenEnd(_) => self.on_play_tone_end(),
        }
    }

    fn on_file_player_end(&mut self) {
        info!("file player end");
        self.do_stop_tone();
        self.stats.stop_tone += 1;
        self.update_rings();
    }

    fn on_play_tone_end(&mut self) {
        info!("play tone end");
        // otherwise counted when the timer is deleted
        if self.cleanup_timer.is_none() {
            self.stats.stop_tone += 1;
        }
        self.update_rings();
    }

    fn register_notify(&mut self, filter: FilterId, kind: NotifyKind) {
        self.notifications.insert((filter, kind));
    }

    fn unregister_notify(&mut self, filter: FilterId, kind: NotifyKind) {
        self.notifications.remove(&(filter, kind));
    }

    // ---------------------------------------------------
    // timer
    // ---------------------------------------------------

    pub fn next_timer_deadline(&self) -> Option<Instant> {
        self.cleanup_timer.map(|timer| timer.deadline)
    }

    pub fn cleanup_timer(&self) -> Option<CleanupTimer> {
        self.cleanup_timer
    }

    fn create_cleanup_timer(&mut self, delay: Duration) {
        info!(delay_ms = delay.as_millis() as u64, "create timer to clean tone player");
        if self.cleanup_timer.is_none() {
            self.cleanup_timer = Some(CleanupTimer {
                deadline: Instant::now() + delay,
                period: delay,
            });
        }
    }

    /// Polls the ring stream player; the timer stays armed while it plays.
    pub fn on_cleanup_timer(&mut self) {
        let Some(timer) = self.cleanup_timer else {
            return;
        };
        let Some(source) = self.ring_stream.as_ref().map(|stream| stream.player) else {
            // the ring stream was torn down while the tone played
            self.delete_timer();
            return;
        };
        match self.engine.player_state(source) {
            Ok(PlayerState::Playing) => {
                debug!(%source, "tone player still playing");
                self.rearm(timer);
            }
            Ok(_) => self.delete_timer(),
            Err(e) => {
                warn!(%source, "failed to query player state: {}", e);
                self.rearm(timer);
            }
        }
    }

    fn rearm(&mut self, timer: CleanupTimer) {
        self.cleanup_timer = Some(CleanupTimer {
            deadline: Instant::now() + timer.period,
            ..timer
        });
    }

    fn delete_timer(&mut self) {
        if self.cleanup_timer.take().is_some() {
            info!("delete timer");
            self.stats.stop_tone += 1;
        }
    }

    // ---------------------------------------------------
    // sound
    // ---------------------------------------------------

    /// Plays `audio_file` once on the local player.
    pub(crate) fn play_file(&mut self, audio_file: &str) -> Result<(), ToneError> {
        let play_card = self.sound.play_card.clone();
        let player = self
            .get_audio_resource(ResourceKind::LocalPlayer, play_card, true)
            .ok_or(ToneError::ResourceUnavailable(ResourceKind::LocalPlayer))?;

        self.command(player, FilterCommand::PlayerSetLoop(-1));
        self.engine
            .filter_command(player, FilterCommand::PlayerOpen(audio_file.to_string()))
            .map_err(|source| ToneError::OpenFailed {
                path: audio_file.to_string(),
                source,
            })?;
        self.engine
            .filter_command(player, FilterCommand::PlayerStart)?;
        self.register_notify(player, NotifyKind::FilePlayerEnd);
        Ok(())
    }

    /// Synthesizes `tone` on the session's output device, or the default
    /// play card.
    pub(crate) fn play_tone(&mut self, session: Option<&SessionRef>, tone: CustomTone) {
        let card = session
            .and_then(|session| session.output_card())
            .or_else(|| self.sound.play_card.clone());

        let Some(generator) = self.get_audio_resource(ResourceKind::ToneGenerator, card, true)
        else {
            error!("no tone generator at this time");
            return;
        };
        if tone.duration_ms == 0 {
            return;
        }
        let repeating = tone.repeat_count > 0;
        let delay = (tone.duration_ms as u64 + tone.interval_ms as u64)
            * tone.repeat_count as u64
            + CLEANUP_MARGIN_MS;

        if let Err(e) = self
            .engine
            .filter_command(generator, FilterCommand::DtmfPlayCustom(tone))
        {
            warn!(%generator, "failed to play tone: {}", e);
            return;
        }
        self.unregister_notify(generator, NotifyKind::PlayToneEnd);
        self.register_notify(generator, NotifyKind::PlayToneEnd);
        if repeating {
            self.create_cleanup_timer(Duration::from_millis(delay));
        }
    }

    /// Resolves the filter to play on: the current call's stream first,
    /// otherwise the dedicated ring stream, created on demand and recreated
    /// when a different card is requested.
    pub(crate) fn get_audio_resource(
        &mut self,
        kind: ResourceKind,
        card: Option<SoundCard>,
        create: bool,
    ) -> Option<FilterId> {
        if let Some(filter) = self.engine.call_stream_filter(kind) {
            return Some(filter);
        }

        let wanted = if self.sound.use_files {
            None
        } else {
            self.sound.lsd_card.clone().or(card).or_else(|| self.sound.ring_card.clone())
        };
        let card_changed = match (&wanted, &self.ring_stream) {
            (Some(wanted), Some(stream)) => stream.card.as_ref() != Some(wanted),
            _ => false,
        };
        if card_changed {
            if let Some(stream) = self.ring_stream.take() {
                info!(card = ?wanted, "sound card changed, ring stream recreated");
                self.stop_ring_stream(stream);
            }
        }

        if self.ring_stream.is_none() {
            if !self.sound.use_files {
                let Some(ring_card) = wanted.as_ref() else {
                    debug!(?kind, "no sound card for ring stream");
                    return None;
                };
                self.engine.set_stream_type(ring_card, StreamType::Dtmf);
            }
            if !create {
                return None;
            }
            let stream = match self.engine.start_ring_stream(None, 0, wanted) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(?kind, "failed to create ring stream: {}", e);
                    return None;
                }
            };
            let amplitude = self.sound.dtmf_player_amp;
            self.command(
                stream.tone_generator,
                FilterCommand::DtmfSetDefaultAmplitude(amplitude),
            );
            self.ring_stream = Some(stream);
        }
        self.ring_stream.as_ref().map(|stream| stream.filter(kind))
    }

    pub(crate) fn stop_ring_stream(&mut self, stream: RingStream) {
        self.notifications
            .retain(|(filter, _)| *filter != stream.player && *filter != stream.tone_generator);
        self.engine.stop_ring_stream(stream);
    }

    /// Issues a command whose failure only deserves a log line.
    pub(crate) fn command(&mut self, filter: FilterId, command: FilterCommand) {
        if let Err(e) = self.engine.filter_command(filter, command.clone()) {
            warn!(%filter, ?command, "filter command failed: {}", e);
        }
    }
}
