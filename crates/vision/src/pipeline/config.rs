//! Configuration parsing for the trigger pipeline.
//!
//! This module owns translation of CLI arguments into a `TriggerConfig` which the
//! session controller, supervisor and HTTP surface use without re-parsing flags.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{Context, Result, bail};
use clap::Args;

#[derive(Clone, Debug)]
/// When a detection counts as the target, and how long the target stays "recent".
pub struct DetectionPolicy {
    pub target_label: String,
    /// Strict lower bound on detection confidence.
    pub confidence_threshold: f32,
    pub resume_grace: Duration,
}

impl Default for DetectionPolicy {
    fn default() -> Self {
        Self {
            target_label: "book".to_string(),
            confidence_threshold: 0.5,
            resume_grace: Duration::from_secs(3),
        }
    }
}

#[derive(Clone, Debug)]
/// Clip played while the target is in view.
pub struct PlaybackSettings {
    pub asset_path: PathBuf,
    pub frame_rate: f64,
}

impl PlaybackSettings {
    pub fn new(asset_path: impl Into<PathBuf>) -> Self {
        Self {
            asset_path: asset_path.into(),
            frame_rate: 30.0,
        }
    }

    /// Delay between two published asset frames.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate)
    }
}

#[derive(Clone, Debug, Default)]
/// Optional telemetry knobs for tracing.
pub struct TelemetryOptions {
    /// Write a Chrome trace JSON file capturing pipeline spans.
    pub chrome_trace_path: Option<PathBuf>,
}

#[derive(Clone, Debug)]
/// Canonical configuration shared by every part of the trigger service.
pub struct TriggerConfig {
    /// Camera URI, device index, RTSP URL or file path.
    pub source_uri: String,
    /// TorchScript model path used by the detector.
    pub model_path: PathBuf,
    /// Capture and playback frame width.
    pub width: i32,
    /// Capture and playback frame height.
    pub height: i32,
    pub policy: DetectionPolicy,
    pub playback: PlaybackSettings,
    /// JPEG quality used by the stream encoder.
    pub jpeg_quality: u8,
    /// Address the HTTP control/stream server listens on.
    pub bind: SocketAddr,
    /// How long `stop()` waits for the in-flight iteration to notice.
    pub stop_grace: Duration,
    /// Start a session as soon as the service is up.
    pub autostart: bool,
    /// Force CPU inference.
    pub use_cpu: bool,
    /// Log every detection, not just target matches.
    pub verbose: bool,
    pub telemetry: TelemetryOptions,
}

impl TriggerConfig {
    /// Configuration with defaults for everything except the two required inputs.
    pub fn new(source_uri: impl Into<String>, asset_path: impl Into<PathBuf>) -> Self {
        Self {
            source_uri: source_uri.into(),
            model_path: PathBuf::from(DEFAULT_MODEL),
            width: 640,
            height: 480,
            policy: DetectionPolicy::default(),
            playback: PlaybackSettings::new(asset_path),
            jpeg_quality: 80,
            bind: SocketAddr::from(([0, 0, 0, 0], 5000)),
            stop_grace: Duration::from_millis(500),
            autostart: false,
            use_cpu: false,
            verbose: false,
            telemetry: TelemetryOptions::default(),
        }
    }
}

const DEFAULT_MODEL: &str = "yolov8n.torchscript";

/// CLI arguments accepted by the trigger service.
#[derive(Debug, Args)]
pub struct TriggerCliArgs {
    /// Camera index, /dev/videoN, RTSP URL or video file used as the live feed.
    #[arg(long = "source", value_name = "URI", default_value = "0")]
    pub source: String,
    /// Clip played while the target is detected.
    #[arg(long = "asset", value_name = "PATH")]
    pub asset: PathBuf,
    /// TorchScript detector model.
    #[arg(long = "model", value_name = "PATH", default_value = DEFAULT_MODEL)]
    pub model: PathBuf,
    /// Detection label that triggers playback.
    #[arg(long = "target", value_name = "LABEL", default_value = "book")]
    pub target: String,
    /// Minimum (exclusive) confidence for a target detection.
    #[arg(long = "confidence", value_name = "SCORE", default_value_t = 0.5)]
    pub confidence: f32,
    /// Seconds the target counts as recently seen.
    #[arg(long = "resume-grace", value_name = "SECS", default_value_t = 3.0)]
    pub resume_grace: f64,
    /// Pace of clip playback in frames per second.
    #[arg(long = "asset-fps", value_name = "FPS", default_value_t = 30.0)]
    pub asset_fps: f64,
    /// Frame width in pixels.
    #[arg(long = "width", value_name = "PX", default_value_t = 640)]
    pub width: i32,
    /// Frame height in pixels.
    #[arg(long = "height", value_name = "PX", default_value_t = 480)]
    pub height: i32,
    /// JPEG quality used by the stream encoder (1-100).
    #[arg(long = "jpeg-quality", value_name = "QUALITY", default_value_t = 80)]
    pub jpeg_quality: i32,
    /// HTTP listen address.
    #[arg(long = "bind", value_name = "ADDR", default_value = "0.0.0.0:5000")]
    pub bind: String,
    /// Milliseconds `stop` waits before answering.
    #[arg(long = "stop-grace-ms", value_name = "MS", default_value_t = 500)]
    pub stop_grace_ms: u64,
    /// Start detecting immediately instead of waiting for POST /start.
    #[arg(long = "autostart", action = clap::ArgAction::SetTrue)]
    pub autostart: bool,
    /// Force CPU inference.
    #[arg(long = "cpu", action = clap::ArgAction::SetTrue)]
    pub use_cpu: bool,
    /// Enable verbose logging (all detections per frame).
    #[arg(long = "verbose", action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
    /// Emit Chrome trace JSON for post-mortem analysis.
    #[arg(long = "chrome-trace", value_name = "PATH")]
    pub chrome_trace: Option<PathBuf>,
}

impl TryFrom<TriggerCliArgs> for TriggerConfig {
    type Error = anyhow::Error;

    fn try_from(args: TriggerCliArgs) -> Result<Self> {
        if args.width <= 0 || args.height <= 0 {
            bail!("--width and --height must be positive integers");
        }
        if args.target.trim().is_empty() {
            bail!("--target must not be empty");
        }
        if !(0.0..1.0).contains(&args.confidence) {
            bail!("--confidence must be in [0, 1)");
        }
        if !(args.resume_grace.is_finite() && args.resume_grace > 0.0) {
            bail!("--resume-grace must be a positive number of seconds");
        }
        if !(args.asset_fps.is_finite() && args.asset_fps > 0.0) {
            bail!("--asset-fps must be positive");
        }
        if !(1..=100).contains(&args.jpeg_quality) {
            bail!("--jpeg-quality must be an integer between 1 and 100");
        }
        let bind: SocketAddr = args
            .bind
            .parse()
            .with_context(|| format!("--bind {:?} is not a socket address", args.bind))?;

        let mut config = TriggerConfig::new(args.source, args.asset);
        config.model_path = args.model;
        config.width = args.width;
        config.height = args.height;
        config.policy = DetectionPolicy {
            target_label: args.target,
            confidence_threshold: args.confidence,
            resume_grace: Duration::from_secs_f64(args.resume_grace),
        };
        config.playback.frame_rate = args.asset_fps;
        config.jpeg_quality = args.jpeg_quality as u8;
        config.bind = bind;
        config.stop_grace = Duration::from_millis(args.stop_grace_ms);
        config.autostart = args.autostart;
        config.use_cpu = args.use_cpu;
        config.verbose = args.verbose;
        config.telemetry = TelemetryOptions {
            chrome_trace_path: args.chrome_trace,
        };
        Ok(config)
    }
}
