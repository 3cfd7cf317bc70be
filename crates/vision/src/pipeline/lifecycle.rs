//! Session ownership: start/stop of the supervisor thread.
//!
//! The controller owns the join handle of the current session thread and the
//! session's `RunSignal`. `start` is gated on thread liveness, so a new run
//! signal is only created once the previous loop has actually exited.

use std::{
    any::Any,
    io,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread::{self, JoinHandle},
};

use anyhow::{Result, anyhow};
use ml_core::Detect;
use tracing::{error, info, warn};
use video_ingest::VideoBackend;

use crate::pipeline::{
    config::TriggerConfig,
    display::DisplayState,
    error::SessionError,
    playback::PlaybackController,
    supervisor::{RunSignal, SessionExit, Supervisor},
    telemetry,
};

/// Builds a detector inside the session thread.
pub type DetectorFactory = Arc<dyn Fn() -> Result<Box<dyn Detect>> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartStatus {
    Started,
    AlreadyRunning,
}

impl StartStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StartStatus::Started => "started",
            StartStatus::AlreadyRunning => "already running",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopStatus {
    Stopped,
}

impl StopStatus {
    pub fn as_str(self) -> &'static str {
        "stopped"
    }
}

struct Session {
    run: RunSignal,
    handle: Option<JoinHandle<()>>,
}

impl Session {
    fn is_alive(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

pub struct SessionController {
    config: TriggerConfig,
    backend: Arc<dyn VideoBackend>,
    detector: DetectorFactory,
    display: Arc<DisplayState>,
    session: Mutex<Session>,
    last_outcome: Arc<Mutex<Option<String>>>,
}

impl SessionController {
    pub fn new(
        config: TriggerConfig,
        backend: Arc<dyn VideoBackend>,
        detector: DetectorFactory,
        display: Arc<DisplayState>,
    ) -> Self {
        Self {
            config,
            backend,
            detector,
            display,
            session: Mutex::new(Session {
                run: RunSignal::stopped(),
                handle: None,
            }),
            last_outcome: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &TriggerConfig {
        &self.config
    }

    pub fn display(&self) -> &Arc<DisplayState> {
        &self.display
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Launch a session thread unless one is still alive.
    pub fn start(&self) -> Result<StartStatus> {
        self.launch(|worker| telemetry::spawn_thread("trigger-session", move || worker.run()))
    }

    fn launch<F>(&self, spawn: F) -> Result<StartStatus>
    where
        F: FnOnce(SessionWorker) -> io::Result<JoinHandle<()>>,
    {
        let mut session = self.session();
        if session.is_alive() {
            info!("Start requested while a session is running");
            return Ok(StartStatus::AlreadyRunning);
        }
        if let Some(finished) = session.handle.take() {
            let _ = finished.join();
        }

        let run = RunSignal::running();
        self.display.begin_session();

        let worker = SessionWorker {
            config: self.config.clone(),
            backend: self.backend.clone(),
            detector: self.detector.clone(),
            display: self.display.clone(),
            run: run.clone(),
            last_outcome: self.last_outcome.clone(),
        };
        match spawn(worker) {
            Ok(handle) => {
                session.run = run;
                session.handle = Some(handle);
                info!("Detection session started");
                Ok(StartStatus::Started)
            }
            Err(err) => {
                error!("Failed to spawn session thread: {err}");
                self.record_outcome(format!("failed: could not spawn session thread: {err}"));
                Err(anyhow!(err).context("failed to spawn session thread"))
            }
        }
    }

    /// Signal the session to stop, interrupt playback and wait the grace period.
    pub fn stop(&self) -> StopStatus {
        {
            // Under the session guard, so a concurrent start cannot clear the
            // interrupt before it is raised.
            let session = self.session();
            session.run.stop();
            self.display.request_interrupt();
        }
        thread::sleep(self.config.stop_grace);
        info!("Stop requested");
        StopStatus::Stopped
    }

    /// Whether a session thread is alive and has not been told to stop.
    pub fn is_running(&self) -> bool {
        let session = self.session();
        session.is_alive() && session.run.is_running()
    }

    /// Description of how the most recent session ended.
    pub fn last_outcome(&self) -> Option<String> {
        self.last_outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record_outcome(&self, outcome: String) {
        *self
            .last_outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(outcome);
    }

    /// Stop and block until the session thread has exited.
    pub fn shutdown(&self) {
        self.stop();
        let handle = self.session().handle.take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

/// Everything a session thread owns.
struct SessionWorker {
    config: TriggerConfig,
    backend: Arc<dyn VideoBackend>,
    detector: DetectorFactory,
    display: Arc<DisplayState>,
    run: RunSignal,
    last_outcome: Arc<Mutex<Option<String>>>,
}

impl SessionWorker {
    fn run(self) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.run_session()));
        let outcome = match result {
            Ok(Ok(SessionExit::Stopped)) => "stopped".to_string(),
            Ok(Ok(SessionExit::SourceExhausted)) => "source exhausted".to_string(),
            Ok(Err(err)) => {
                error!("Detection session failed: {err}");
                format!("failed: {err}")
            }
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                error!("Detection session panicked: {reason}");
                format!("failed: internal fault: {reason}")
            }
        };
        *self
            .last_outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(outcome);
        self.run.stop();
    }

    fn run_session(&self) -> Result<SessionExit, SessionError> {
        let detector = (self.detector)().map_err(SessionError::DetectorUnavailable)?;
        let playback = PlaybackController::new(
            self.backend.clone(),
            self.display.clone(),
            self.config.playback.clone(),
        );
        let mut supervisor = Supervisor::new(
            detector,
            self.config.policy.clone(),
            self.display.clone(),
            playback,
            self.run.clone(),
        )
        .verbose(self.config.verbose);

        let summary = supervisor.run(self.backend.as_ref(), &self.config.source_uri)?;
        info!(
            "Session ended ({:?}) after {} frame(s), {} playback(s)",
            summary.exit, summary.frames, summary.playbacks
        );
        if summary.exit == SessionExit::SourceExhausted {
            warn!("Live feed ended; issue a new start to resume");
        }
        Ok(summary.exit)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use ml_core::Detection;
    use video_ingest::{Frame, MemoryBackend};

    use super::*;

    struct AlwaysBook;

    impl Detect for AlwaysBook {
        fn detect(&self, _bgr: &[u8], _w: i32, _h: i32) -> Result<Vec<Detection>> {
            Ok(vec![Detection::new("book", 0.9, [0.0, 0.0, 2.0, 2.0])])
        }
    }

    fn frames(count: i64) -> Vec<Frame> {
        (1..=count)
            .map(|ts| Frame::from_bgr(vec![0; 4 * 4 * 3], 4, 4, ts).unwrap())
            .collect()
    }

    fn controller(backend: MemoryBackend) -> SessionController {
        let mut config = TriggerConfig::new("cam", "clip.mp4");
        config.stop_grace = Duration::ZERO;
        config.playback.frame_rate = 1000.0;
        SessionController::new(
            config,
            Arc::new(backend),
            Arc::new(|| Ok(Box::new(AlwaysBook) as Box<dyn Detect>)),
            Arc::new(DisplayState::new()),
        )
    }

    fn wait_for_outcome(controller: &SessionController) -> Option<String> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Some(outcome) = controller.last_outcome() {
                if !controller.is_running() {
                    return Some(outcome);
                }
            }
            thread::sleep(Duration::from_millis(5));
        }
        None
    }

    #[test]
    fn spawn_failure_is_reported_not_started() {
        let controller = controller(MemoryBackend::new().with_source("cam", frames(1)));
        let err = controller
            .launch(|_worker| Err(io::Error::other("thread limit reached")))
            .unwrap_err();
        assert!(format!("{err:#}").contains("thread limit reached"));
        assert!(!controller.is_running());
        let outcome = controller.last_outcome().unwrap();
        assert!(outcome.starts_with("failed"), "{outcome}");
    }

    #[test]
    fn stop_then_start_does_not_interrupt_the_new_session() {
        let controller = controller(
            MemoryBackend::new()
                .with_source("cam", frames(1))
                .with_asset("clip.mp4", frames(4)),
        );
        controller.stop();
        assert!(controller.display().interrupt_requested());

        assert_eq!(controller.start().unwrap(), StartStatus::Started);
        assert_eq!(wait_for_outcome(&controller).as_deref(), Some("source exhausted"));
        // One live frame plus the whole clip.
        assert_eq!(controller.display().latest().unwrap().sequence, 5);
        assert!(!controller.display().interrupt_requested());
    }

    #[test]
    fn statuses_render_like_the_http_api() {
        assert_eq!(StartStatus::Started.as_str(), "started");
        assert_eq!(StartStatus::AlreadyRunning.as_str(), "already running");
        assert_eq!(StopStatus::Stopped.as_str(), "stopped");
    }

    #[test]
    fn panic_messages_are_extracted() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
