pub mod pipeline;

pub use pipeline::{
    config::{DetectionPolicy, PlaybackSettings, TelemetryOptions, TriggerCliArgs, TriggerConfig},
    data::DetectionSummary,
    display::{DisplaySnapshot, DisplayState, Mode, PublishedFrame},
    error::SessionError,
    lifecycle::{DetectorFactory, SessionController, StartStatus, StopStatus},
    playback::{PlaybackController, PlaybackEnd},
    server::{ControlServer, configure, spawn_control_server},
    supervisor::{Iteration, RunSignal, SessionExit, SessionSummary, Step, Supervisor},
};
