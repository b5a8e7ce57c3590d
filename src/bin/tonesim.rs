use anyhow::{anyhow, Result};
use clap::Parser;
use std::fs::File;
use tokio::select;
use tokio::sync::mpsc;
use tonemanager::{
    config::{Cli, Config},
    engine::sim::SimulatedEngine,
    scenario::{Scenario, ScenarioRunner},
    service::ToneService,
};
use tracing::{info, level_filters::LevelFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match cli.conf {
        Some(ref conf) => Config::load(conf)?,
        None => Config::default(),
    };
    if let Some(level) = cli.log_level {
        config.log_level = Some(level);
    }

    let mut log_fmt = tracing_subscriber::fmt();
    if let Some(ref level) = config.log_level {
        if let Ok(lv) = level.as_str().parse::<LevelFilter>() {
            log_fmt = log_fmt.with_max_level(lv);
        }
    }

    let mut _guard = None;
    if let Some(ref log_file) = config.log_file {
        let file = File::create(log_file).map_err(|e| anyhow!("{}: {}", e, log_file))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        _guard = Some(guard);
        log_fmt.with_writer(non_blocking).try_init().ok();
    } else {
        log_fmt.try_init().ok();
    }

    let scenario = Scenario::load(&cli.scenario)?;

    let (event_sender, event_receiver) = mpsc::unbounded_channel();
    let mut engine = SimulatedEngine::new().with_events(event_sender);
    if let Some(dir) = cli.capture {
        std::fs::create_dir_all(&dir).map_err(|e| anyhow!("{}: {}", e, dir))?;
        engine = engine.with_capture_dir(dir);
    }

    let (service, handle) = ToneService::new(Box::new(engine.clone()), &config, event_receiver);
    let token = service.token();
    let serving = tokio::spawn(service.serve());

    let mut runner = ScenarioRunner::new(handle, engine);
    let stats = select! {
        stats = runner.run(&scenario) => stats?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received CTRL+C, shutting down");
            token.cancel();
            return Ok(());
        }
    };

    token.cancel();
    let manager = serving.await??;
    for (session, state) in manager.sessions().iter() {
        info!(session_id = %session, %state, "final tone state");
    }
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
