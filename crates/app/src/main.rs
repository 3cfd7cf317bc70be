mod cli;
mod detector;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use video_ingest::VideoBackend;
use vision::{
    DisplayState, SessionController, TriggerConfig, pipeline::telemetry, spawn_control_server,
};

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = cli::Cli::parse();
    let config = TriggerConfig::try_from(cli.args)?;
    let _telemetry = telemetry::install(&config.telemetry)?;
    telemetry::init_metrics_recorder();

    let detector = detector::factory(&config)?;
    let display = Arc::new(DisplayState::new());
    let controller = Arc::new(SessionController::new(
        config.clone(),
        video_backend(&config),
        detector,
        display,
    ));
    let server = spawn_control_server(controller.clone(), config.bind)?;
    info!(
        "Watching {} for '{}' (confidence > {})",
        config.source_uri, config.policy.target_label, config.policy.confidence_threshold
    );

    if config.autostart {
        controller.start()?;
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || shutdown.store(true, Ordering::SeqCst))
            .context("Failed to install Ctrl+C handler")?;
    }
    while !shutdown.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(200));
    }

    info!("Shutting down");
    controller.shutdown();
    server.stop();
    Ok(())
}

#[cfg(feature = "with-opencv")]
fn video_backend(config: &TriggerConfig) -> Arc<dyn VideoBackend> {
    Arc::new(video_ingest::OpenCvBackend::new((config.width, config.height)))
}

#[cfg(not(feature = "with-opencv"))]
fn video_backend(config: &TriggerConfig) -> Arc<dyn VideoBackend> {
    Arc::new(video_ingest::FfmpegBackend::new((config.width, config.height)))
}
