//! In-process audio engine without hardware.
//!
//! Filters are bookkeeping entries; playback time is taken from the WAV
//! header of opened files or from the rendered tone, and completion events are
//! sent on the event channel once that time has elapsed on the tokio clock.

use super::{
    AudioEngine, FilterCommand, FilterId, PlayerState, ResourceKind, RingStream, SoundCard,
    StreamType,
};
use crate::event::{EngineEvent, EngineEventSender};
use crate::tone::synth;
use anyhow::{anyhow, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

const CAPTURE_SAMPLE_RATE: u32 = 8000;

/// Every call made into the engine, in order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EngineCall {
    SetStreamType(SoundCard, StreamType),
    StartRingStream {
        file: Option<String>,
        card: Option<SoundCard>,
    },
    StopRingStream(FilterId),
    StartRingtonePlayer {
        card: SoundCard,
        file: String,
    },
    StopRingtonePlayer,
    Command(FilterId, FilterCommand),
}

#[derive(Debug)]
struct PlayerSim {
    state: PlayerState,
    file: Option<String>,
    duration: Duration,
    loop_ms: i32,
    generation: u64,
}

impl PlayerSim {
    fn closed() -> Self {
        Self {
            state: PlayerState::Closed,
            file: None,
            duration: Duration::ZERO,
            loop_ms: -1,
            generation: 0,
        }
    }
}

#[derive(Debug, Default)]
struct GeneratorSim {
    amplitude: f32,
    busy: bool,
    generation: u64,
}

#[derive(Debug)]
struct RingStreamSim {
    stream: RingStream,
    file: Option<String>,
}

#[derive(Debug, Default)]
struct SimState {
    next_id: u64,
    call_stream: Option<(FilterId, FilterId)>,
    ring_streams: Vec<RingStreamSim>,
    ringtone: Option<(SoundCard, String)>,
    players: HashMap<FilterId, PlayerSim>,
    generators: HashMap<FilterId, GeneratorSim>,
    files: HashMap<String, Duration>,
    calls: Vec<EngineCall>,
    fail_ring_stream: bool,
    captured: usize,
}

impl SimState {
    fn next_filter(&mut self) -> FilterId {
        self.next_id += 1;
        FilterId(self.next_id)
    }

    fn new_pair(&mut self) -> (FilterId, FilterId) {
        let generator = self.next_filter();
        let player = self.next_filter();
        self.generators.insert(generator, GeneratorSim::default());
        self.players.insert(player, PlayerSim::closed());
        (generator, player)
    }

    fn remove_pair(&mut self, generator: FilterId, player: FilterId) {
        self.generators.remove(&generator);
        self.players.remove(&player);
    }

    fn file_duration(&self, path: &str) -> Result<Duration> {
        if let Some(duration) = self.files.get(path) {
            return Ok(*duration);
        }
        let reader = hound::WavReader::open(path).map_err(|e| anyhow!("{}: {}", e, path))?;
        let spec = reader.spec();
        if spec.sample_rate == 0 {
            return Err(anyhow!("invalid sample rate: {}", path));
        }
        Ok(Duration::from_millis(
            reader.duration() as u64 * 1000 / spec.sample_rate as u64,
        ))
    }
}

/// Cloneable handle; all clones share the same engine state.
#[derive(Clone, Default)]
pub struct SimulatedEngine {
    state: Arc<Mutex<SimState>>,
    events: Option<EngineEventSender>,
    capture_dir: Option<PathBuf>,
}

impl SimulatedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Completion events are only produced with a sender and inside a tokio
    /// runtime.
    pub fn with_events(mut self, events: EngineEventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Writes every synthesized tone and digit as a WAV file into `dir`.
    pub fn with_capture_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.capture_dir = Some(dir.into());
        self
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Declares a file the players can open without reading it from disk.
    pub fn register_file(&self, path: impl Into<String>, duration: Duration) {
        self.lock().files.insert(path.into(), duration);
    }

    /// Attaches or detaches the current call's audio stream.
    pub fn set_call_active(&self, active: bool) {
        let mut state = self.lock();
        match (active, state.call_stream) {
            (true, None) => {
                let pair = state.new_pair();
                state.call_stream = Some(pair);
            }
            (false, Some((generator, player))) => {
                state.remove_pair(generator, player);
                state.call_stream = None;
            }
            _ => {}
        }
    }

    pub fn set_fail_ring_stream(&self, fail: bool) {
        self.lock().fail_ring_stream = fail;
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Card and file of the ringtone player, if started.
    pub fn ringtone(&self) -> Option<(SoundCard, String)> {
        self.lock().ringtone.clone()
    }

    /// File of the ring stream currently playing a ringback.
    pub fn ringback(&self) -> Option<String> {
        let state = self.lock();
        state
            .ring_streams
            .iter()
            .filter(|sim| {
                state
                    .players
                    .get(&sim.stream.player)
                    .map(|player| player.state == PlayerState::Playing)
                    .unwrap_or(false)
            })
            .find_map(|sim| sim.file.clone())
    }

    /// Number of ring indications audible right now.
    pub fn audible_rings(&self) -> usize {
        usize::from(self.ringtone().is_some()) + usize::from(self.ringback().is_some())
    }

    pub fn ring_stream_count(&self) -> usize {
        self.lock().ring_streams.len()
    }

    pub fn call_stream_filters(&self) -> Option<(FilterId, FilterId)> {
        self.lock().call_stream
    }

    pub fn generator_busy(&self, filter: FilterId) -> bool {
        self.lock()
            .generators
            .get(&filter)
            .map(|generator| generator.busy)
            .unwrap_or(false)
    }

    pub fn generator_amplitude(&self, filter: FilterId) -> Option<f32> {
        self.lock()
            .generators
            .get(&filter)
            .map(|generator| generator.amplitude)
    }

    pub fn captured(&self) -> usize {
        self.lock().captured
    }

    fn capture(&self, state: &mut SimState, filter: FilterId, samples: &[i16]) {
        let Some(ref dir) = self.capture_dir else {
            return;
        };
        state.captured += 1;
        let path = dir.join(format!("{}-{}.wav", filter, state.captured));
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: CAPTURE_SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let result = hound::WavWriter::create(&path, spec).and_then(|mut writer| {
            for sample in samples {
                writer.write_sample(*sample)?;
            }
            writer.finalize()
        });
        match result {
            Ok(()) => debug!(path = %path.display(), "captured tone"),
            Err(e) => warn!(path = %path.display(), "failed to capture tone: {}", e),
        }
    }

    /// Sends `event` after `after`, unless the filter's generation moved on.
    fn schedule(&self, event: EngineEvent, generation: u64, after: Duration) {
        let Some(events) = self.events.clone() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let state = self.state.clone();
        handle.spawn(async move {
            tokio::time::sleep(after).await;
            let mut state = match state.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let current = match event {
                EngineEvent::PlayerEof(filter) => state.players.get_mut(&filter).and_then(|p| {
                    if p.generation == generation && p.state == PlayerState::Playing {
                        p.state = PlayerState::Paused;
                        Some(())
                    } else {
                        None
                    }
                }),
                EngineEvent::DtmfGenEnd(filter) => {
                    state.generators.get_mut(&filter).and_then(|g| {
                        if g.generation == generation && g.busy {
                            g.busy = false;
                            Some(())
                        } else {
                            None
                        }
                    })
                }
            };
            drop(state);
            if current.is_some() {
                events.send(event).ok();
            }
        });
    }

    fn player_command(
        &self,
        state: &mut SimState,
        filter: FilterId,
        command: &FilterCommand,
    ) -> Result<()> {
        let duration = match command {
            FilterCommand::PlayerOpen(path) => Some(state.file_duration(path)?),
            _ => None,
        };
        let player = state
            .players
            .get_mut(&filter)
            .ok_or_else(|| anyhow!("unknown player {}", filter))?;
        match command {
            FilterCommand::PlayerSetLoop(loop_ms) => player.loop_ms = *loop_ms,
            FilterCommand::PlayerOpen(path) => {
                player.generation += 1;
                player.file = Some(path.clone());
                player.duration = duration.unwrap_or_default();
                player.state = PlayerState::Paused;
            }
            FilterCommand::PlayerStart => {
                if player.file.is_none() {
                    return Err(anyhow!("player {} has no open file", filter));
                }
                player.generation += 1;
                player.state = PlayerState::Playing;
                if player.loop_ms < 0 {
                    let (generation, after) = (player.generation, player.duration);
                    self.schedule(EngineEvent::PlayerEof(filter), generation, after);
                }
            }
            FilterCommand::PlayerClose => {
                player.generation += 1;
                player.file = None;
                player.state = PlayerState::Closed;
            }
            other => return Err(anyhow!("{:?} is not a player command", other)),
        }
        Ok(())
    }

    fn generator_command(
        &self,
        state: &mut SimState,
        filter: FilterId,
        command: &FilterCommand,
    ) -> Result<()> {
        let rendered = match command {
            FilterCommand::DtmfPlay { digit, duration_ms } => Some((
                synth::render_dtmf(*digit, CAPTURE_SAMPLE_RATE, *duration_ms),
                Duration::from_millis(*duration_ms as u64),
            )),
            FilterCommand::DtmfPlayCustom(tone) => Some((
                synth::render_custom_tone(tone, CAPTURE_SAMPLE_RATE),
                synth::custom_tone_duration(tone),
            )),
            _ => None,
        };
        let generator = state
            .generators
            .get_mut(&filter)
            .ok_or_else(|| anyhow!("unknown tone generator {}", filter))?;
        match command {
            FilterCommand::DtmfSetDefaultAmplitude(amplitude) => generator.amplitude = *amplitude,
            FilterCommand::DtmfStart(_) => {
                generator.generation += 1;
                generator.busy = true;
            }
            FilterCommand::DtmfStop => {
                generator.generation += 1;
                generator.busy = false;
            }
            FilterCommand::DtmfPlay { .. } | FilterCommand::DtmfPlayCustom(_) => {
                generator.generation += 1;
                generator.busy = true;
                let generation = generator.generation;
                if let Some((samples, after)) = rendered {
                    self.capture(state, filter, &samples);
                    self.schedule(EngineEvent::DtmfGenEnd(filter), generation, after);
                }
            }
            other => return Err(anyhow!("{:?} is not a tone generator command", other)),
        }
        Ok(())
    }
}

impl AudioEngine for SimulatedEngine {
    fn in_call(&self) -> bool {
        self.lock().call_stream.is_some()
    }

    fn call_stream_filter(&self, kind: ResourceKind) -> Option<FilterId> {
        self.lock()
            .call_stream
            .map(|(generator, player)| match kind {
                ResourceKind::ToneGenerator => generator,
                ResourceKind::LocalPlayer => player,
            })
    }

    fn set_stream_type(&mut self, card: &SoundCard, stream_type: StreamType) {
        self.lock()
            .calls
            .push(EngineCall::SetStreamType(card.clone(), stream_type));
    }

    fn start_ring_stream(
        &mut self,
        file: Option<String>,
        loop_pause_ms: u32,
        card: Option<SoundCard>,
    ) -> Result<RingStream> {
        let mut state = self.lock();
        state.calls.push(EngineCall::StartRingStream {
            file: file.clone(),
            card: card.clone(),
        });
        if state.fail_ring_stream {
            return Err(anyhow!("cannot open ring stream on {:?}", card));
        }
        let duration = match file {
            Some(ref path) => Some(state.file_duration(path)?),
            None => None,
        };
        let (tone_generator, player) = state.new_pair();
        if let (Some(path), Some(sim)) = (file.as_ref(), state.players.get_mut(&player)) {
            // looping ring files never reach their end
            sim.file = Some(path.clone());
            sim.duration = duration.unwrap_or_default();
            sim.loop_ms = loop_pause_ms as i32;
            sim.state = PlayerState::Playing;
        }
        let stream = RingStream {
            card,
            tone_generator,
            player,
        };
        info!(?file, card = ?stream.card, "ring stream started");
        state.ring_streams.push(RingStreamSim {
            stream: stream.clone(),
            file,
        });
        Ok(stream)
    }

    fn stop_ring_stream(&mut self, stream: RingStream) {
        let mut state = self.lock();
        state.calls.push(EngineCall::StopRingStream(stream.player));
        state.ring_streams.retain(|sim| sim.stream != stream);
        state.remove_pair(stream.tone_generator, stream.player);
    }

    fn start_ringtone_player(
        &mut self,
        card: SoundCard,
        file: String,
        _loop_pause_ms: u32,
    ) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(EngineCall::StartRingtonePlayer {
            card: card.clone(),
            file: file.clone(),
        });
        state.file_duration(&file)?;
        state.ringtone = Some((card, file));
        Ok(())
    }

    fn ringtone_player_started(&self) -> bool {
        self.lock().ringtone.is_some()
    }

    fn stop_ringtone_player(&mut self) {
        let mut state = self.lock();
        state.calls.push(EngineCall::StopRingtonePlayer);
        state.ringtone = None;
    }

    fn filter_command(&mut self, filter: FilterId, command: FilterCommand) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(EngineCall::Command(filter, command.clone()));
        if state.players.contains_key(&filter) {
            self.player_command(&mut state, filter, &command)
        } else {
            self.generator_command(&mut state, filter, &command)
        }
    }

    fn player_state(&self, filter: FilterId) -> Result<PlayerState> {
        self.lock()
            .players
            .get(&filter)
            .map(|player| player.state)
            .ok_or_else(|| anyhow!("unknown player {}", filter))
    }
}
