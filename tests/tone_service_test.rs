use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tonemanager::config::Config;
use tonemanager::engine::sim::{EngineCall, SimulatedEngine};
use tonemanager::engine::FilterCommand;
use tonemanager::session::{CallState, Reason, SessionId, SessionRecord, SessionRef};
use tonemanager::tone::ToneId;
use tonemanager::{ToneError, ToneHandle, ToneManager, ToneService, ToneState};

fn test_config() -> Config {
    let mut config = Config::default();
    config.sound.remote_ring = Some("ringback.wav".to_string());
    config.sound.local_ring = Some("ring.wav".to_string());
    config
}

fn start_service(
    config: &Config,
) -> (
    ToneHandle,
    SimulatedEngine,
    JoinHandle<anyhow::Result<ToneManager>>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let engine = SimulatedEngine::new().with_events(tx);
    engine.register_file("ring.wav", Duration::from_secs(3));
    engine.register_file("ringback.wav", Duration::from_secs(2));
    engine.register_file("busy.wav", Duration::from_secs(1));
    let (service, handle) = ToneService::new(Box::new(engine.clone()), config, rx);
    let serving = tokio::spawn(service.serve());
    (handle, engine, serving)
}

fn session(id: u64, state: CallState) -> SessionRef {
    SessionRecord::new(id).with_state(state).into_ref()
}

fn custom_tones(engine: &SimulatedEngine) -> usize {
    engine
        .calls()
        .iter()
        .filter(|call| matches!(call, EngineCall::Command(_, FilterCommand::DtmfPlayCustom(_))))
        .count()
}

#[tokio::test(start_paused = true)]
async fn test_ringtone_audible_after_tone_file_ends() {
    let (handle, engine, _serving) = start_service(&test_config());
    let a = session(1, CallState::OutgoingProgress);
    let b = session(2, CallState::IncomingReceived);

    handle
        .set_tone(Reason::Busy, ToneId::Busy, Some("busy.wav".to_string()))
        .unwrap();
    handle.start_ringtone(b.clone()).unwrap();
    handle.start_error_tone(a.clone(), Reason::Busy).unwrap();
    handle.stats().await.unwrap();
    assert_eq!(engine.ringtone(), None);

    sleep(Duration::from_millis(500)).await;
    handle.stats().await.unwrap();
    assert_eq!(engine.ringtone(), None);

    sleep(Duration::from_millis(1000)).await;
    let stats = handle.stats().await.unwrap();
    assert!(engine.ringtone().is_some());
    assert_eq!(stats.stop_tone, 1);
    assert_eq!(stats.start_ringtone, 2);
    assert_eq!(
        handle.session_state(a.id()).await.unwrap(),
        ToneState::Tone
    );
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_timer_counts_tone_end_once() {
    let (handle, _engine, _serving) = start_service(&test_config());
    let a = session(1, CallState::End);

    handle.start_named_tone(a, ToneId::Busy).unwrap();
    // the tone ends after 3s, the timer polls at 4s
    sleep(Duration::from_millis(3500)).await;
    assert_eq!(handle.stats().await.unwrap().stop_tone, 0);

    sleep(Duration::from_millis(1000)).await;
    let stats = handle.stats().await.unwrap();
    assert_eq!(stats.start_named_tone, 1);
    assert_eq!(stats.stop_tone, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_timer_sweeps_silent_tone() {
    let (handle, _engine, _serving) = start_service(&test_config());
    let a = session(1, CallState::End);

    handle.start_named_tone(a, ToneId::CallLost).unwrap();
    // no end event will be reported for the interrupted tone
    handle.stop_dtmf().unwrap();

    // the timer polls after (250 + 250) * 3 + 1000 ms
    sleep(Duration::from_millis(2400)).await;
    assert_eq!(handle.stats().await.unwrap().stop_tone, 0);

    sleep(Duration::from_millis(200)).await;
    assert_eq!(handle.stats().await.unwrap().stop_tone, 1);
}

#[tokio::test(start_paused = true)]
async fn test_waiting_tone_repeats_during_call() {
    let (handle, engine, _serving) = start_service(&test_config());
    engine.set_call_active(true);
    let a = session(1, CallState::StreamsRunning);
    let b = session(2, CallState::IncomingReceived);

    handle.update(a).unwrap();
    handle.start_ringtone(b.clone()).unwrap();
    handle.stats().await.unwrap();
    assert_eq!(custom_tones(&engine), 1);

    // each waiting tone lasts 2.3s before being played again
    sleep(Duration::from_millis(5000)).await;
    let stats = handle.stats().await.unwrap();
    assert_eq!(custom_tones(&engine), 3);
    assert_eq!(stats.start_ringtone, 3);
    assert_eq!(engine.ringtone(), None);

    handle.go_to_call(b.clone()).unwrap();
    sleep(Duration::from_millis(5000)).await;
    handle.stats().await.unwrap();
    assert_eq!(custom_tones(&engine), 3);
    assert_eq!(
        handle.session_state(b.id()).await.unwrap(),
        ToneState::Call
    );
}

async fn assert_single_ring(handle: &ToneHandle, engine: &SimulatedEngine) {
    handle.stats().await.unwrap();
    assert!(engine.audible_rings() <= 1);
    sleep(Duration::from_millis(700)).await;
    assert!(engine.audible_rings() <= 1);
}

#[tokio::test(start_paused = true)]
async fn test_single_ring_audible() {
    let (handle, engine, _serving) = start_service(&test_config());
    let a = session(1, CallState::OutgoingRinging);
    let b = session(2, CallState::IncomingReceived);
    let c = session(3, CallState::IncomingReceived);

    handle.start_ringback_tone(a.clone()).unwrap();
    assert_single_ring(&handle, &engine).await;
    assert!(engine.ringback().is_some());

    handle.start_ringtone(b.clone()).unwrap();
    assert_single_ring(&handle, &engine).await;
    assert!(engine.ringtone().is_some());

    handle.start_ringtone(c.clone()).unwrap();
    assert_single_ring(&handle, &engine).await;

    handle.stop(b.clone()).unwrap();
    assert_single_ring(&handle, &engine).await;
    assert_eq!(engine.audible_rings(), 0);

    // already in ringback, nothing restarts
    handle.start_ringback_tone(a.clone()).unwrap();
    assert_single_ring(&handle, &engine).await;
    assert_eq!(engine.audible_rings(), 0);

    handle.go_to_call(c.clone()).unwrap();
    assert_single_ring(&handle, &engine).await;

    assert_eq!(
        handle.session_state(a.id()).await.unwrap(),
        ToneState::Ringback
    );
    assert_eq!(
        handle.session_state(c.id()).await.unwrap(),
        ToneState::Call
    );
}

#[tokio::test(start_paused = true)]
async fn test_playback_errors_reach_caller() {
    let (handle, _engine, _serving) = start_service(&test_config());

    assert!(matches!(
        handle.play_dtmf('z', 100).await,
        Err(ToneError::InvalidDigit('z'))
    ));
    assert!(matches!(
        handle.play_local("/nonexistent/prompt.wav").await,
        Err(ToneError::OpenFailed { .. })
    ));
    handle.play_dtmf('1', 100).await.unwrap();
    handle.play_local("busy.wav").await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_service_stops_when_handles_dropped() {
    let (handle, _engine, serving) = start_service(&test_config());
    handle
        .start_ringtone(session(7, CallState::IncomingReceived))
        .unwrap();
    drop(handle);

    let manager = serving.await.unwrap().unwrap();
    assert_eq!(manager.session_state(SessionId(7)), ToneState::Ringtone);
    assert_eq!(manager.stats().start_ringtone, 1);
}

#[tokio::test(start_paused = true)]
async fn test_closed_service_reports_error() {
    let (tx, rx) = mpsc::unbounded_channel();
    let engine = SimulatedEngine::new().with_events(tx);
    let (service, handle) = ToneService::new(Box::new(engine), &test_config(), rx);
    let token = service.token();
    let serving = tokio::spawn(service.serve());

    token.cancel();
    serving.await.unwrap().unwrap();
    assert!(matches!(
        handle.stop_tone(),
        Err(ToneError::ServiceClosed)
    ));
    assert!(matches!(handle.stats().await, Err(ToneError::ServiceClosed)));
}
