//! Detection-triggered playback pipeline.
//!
//! - `config`: CLI arguments and validated runtime configuration.
//! - `display`: the single-slot frame buffer shared with HTTP readers.
//! - `supervisor`: the detect, publish, trigger loop.
//! - `playback`: paced clip playback into the display slot.
//! - `lifecycle`: start/stop ownership of the session thread.
//! - `server`: Actix Web control endpoints and the MJPEG feed.
//! - `annotation`, `encoding`: frame drawing and JPEG/multipart output.
//! - `telemetry`: tracing subscriber, Prometheus recorder, thread helpers.

pub mod annotation;
pub mod config;
pub mod data;
pub mod display;
pub mod encoding;
pub mod error;
pub mod lifecycle;
pub mod playback;
pub mod server;
pub mod supervisor;
pub mod telemetry;
