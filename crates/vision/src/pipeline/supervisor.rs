//! Detect/play state machine driving one session.
//!
//! While detecting, every iteration reads one frame, runs the detector, annotates
//! and publishes the frame, and hands control to the playback controller when the
//! target was matched. Detection is fully suspended for the duration of playback.
//! After playback the target timestamp is refreshed so the debounce window starts
//! again from the end of the clip.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use ml_core::{Detect, Detection, filter_target};
use tracing::{debug, info, warn};
use video_ingest::{CaptureError, FrameSource, VideoBackend};

use crate::pipeline::{
    annotation::annotate_detections,
    config::DetectionPolicy,
    data::DetectionSummary,
    display::{DisplayState, Mode},
    error::SessionError,
    playback::{PlaybackController, PlaybackEnd},
};

/// Shared start/stop gate polled by the session loop.
#[derive(Clone, Debug)]
pub struct RunSignal(Arc<AtomicBool>);

impl RunSignal {
    pub fn running() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn stopped() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Outcome of one supervisor iteration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    Iteration(Iteration),
    /// The capture source has no more frames.
    SourceExhausted,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Iteration {
    pub frame_number: u64,
    /// Number of detections that qualified as the target.
    pub matched: usize,
    /// Set when the iteration handed control to playback.
    pub playback: Option<PlaybackEnd>,
}

impl Iteration {
    /// Mode the iteration ended up in: `Playing` iff an asset was actually played.
    pub fn mode(&self) -> Mode {
        match self.playback {
            Some(PlaybackEnd::Unavailable) | None => Mode::Detecting,
            Some(_) => Mode::Playing,
        }
    }
}

/// Why a session loop returned normally.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionExit {
    Stopped,
    SourceExhausted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionSummary {
    pub exit: SessionExit,
    pub frames: u64,
    pub playbacks: u64,
}

pub struct Supervisor<D> {
    detector: D,
    policy: DetectionPolicy,
    display: Arc<DisplayState>,
    playback: PlaybackController,
    run_signal: RunSignal,
    frame_number: u64,
    playbacks: u64,
    absence_reported: bool,
    verbose: bool,
}

impl<D: Detect> Supervisor<D> {
    pub fn new(
        detector: D,
        policy: DetectionPolicy,
        display: Arc<DisplayState>,
        playback: PlaybackController,
        run: RunSignal,
    ) -> Self {
        Self {
            detector,
            policy,
            display,
            playback,
            run_signal: run,
            frame_number: 0,
            playbacks: 0,
            absence_reported: false,
            verbose: false,
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Open `source_uri` and loop until stopped, the source ends, or a fatal error.
    pub fn run(
        &mut self,
        backend: &dyn VideoBackend,
        source_uri: &str,
    ) -> Result<SessionSummary, SessionError> {
        let span = tracing::info_span!(
            "trigger.session",
            source = %source_uri,
            target = %self.policy.target_label,
            threshold = self.policy.confidence_threshold
        );
        let _guard = span.enter();

        let mut source = backend
            .open_source(source_uri)
            .map_err(SessionError::SourceUnavailable)?;
        info!("Capture source opened");

        let exit = loop {
            if !self.run_signal.is_running() {
                break SessionExit::Stopped;
            }
            match self.step(source.as_mut())? {
                Step::Iteration(_) => {}
                Step::SourceExhausted => {
                    warn!("Capture source exhausted after {} frame(s)", self.frame_number);
                    break SessionExit::SourceExhausted;
                }
            }
        };
        drop(source);
        info!("Capture source released");

        Ok(SessionSummary {
            exit,
            frames: self.frame_number,
            playbacks: self.playbacks,
        })
    }

    /// Run one detect/publish iteration, including any playback it triggers.
    pub fn step(&mut self, source: &mut dyn FrameSource) -> Result<Step, SessionError> {
        let Some(mut frame) = source.next_frame().map_err(read_error)? else {
            return Ok(Step::SourceExhausted);
        };
        self.frame_number += 1;
        metrics::counter!("trigger_frames_captured_total").increment(1);
        let span = tracing::debug_span!("trigger.iteration", frame = self.frame_number);
        let _guard = span.enter();

        let detect_start = Instant::now();
        let detections = self
            .detector
            .detect(&frame.data, frame.width, frame.height)
            .map_err(SessionError::Detector)?;
        metrics::histogram!("trigger_detect_seconds").record(detect_start.elapsed().as_secs_f64());
        if self.verbose {
            log_detections(self.frame_number, &detections);
        }

        let matched = filter_target(
            detections,
            &self.policy.target_label,
            self.policy.confidence_threshold,
        );
        let now = Instant::now();
        if !matched.is_empty() {
            annotate_detections(&mut frame, &matched);
            self.display.mark_target_seen(now);
            self.display
                .record_detections(matched.iter().map(DetectionSummary::from).collect());
            metrics::counter!("trigger_matches_total").increment(1);
        }
        self.display.publish(frame);

        let playback = if matched.is_empty() {
            self.note_absence(now);
            None
        } else {
            info!(
                "{} detected ({:.2}); playing clip",
                self.policy.target_label, matched[0].confidence
            );
            Some(self.play_clip())
        };

        Ok(Step::Iteration(Iteration {
            frame_number: self.frame_number,
            matched: matched.len(),
            playback,
        }))
    }

    fn play_clip(&mut self) -> PlaybackEnd {
        let run = self.run_signal.clone();
        let end = self.playback.play(move || run.is_running());
        // Count the end of the clip as a fresh sighting.
        self.display.mark_target_seen(Instant::now());
        self.absence_reported = false;
        if end != PlaybackEnd::Unavailable {
            self.playbacks += 1;
        }
        end
    }

    fn note_absence(&mut self, now: Instant) {
        let Some(seen) = self.display.last_target_seen() else {
            return;
        };
        let absent = now.saturating_duration_since(seen);
        if absent > self.policy.resume_grace && !self.absence_reported {
            self.absence_reported = true;
            info!(
                "{} absent for {:.1}s; watching live feed",
                self.policy.target_label,
                absent.as_secs_f32()
            );
        } else if absent <= self.policy.resume_grace {
            self.absence_reported = false;
        }
    }
}

/// A source that fails before producing anything was never really open.
fn read_error(err: CaptureError) -> SessionError {
    match err {
        CaptureError::Open { .. } => SessionError::SourceUnavailable(err),
        other => SessionError::CaptureRead(other),
    }
}

/// Whether the target was seen within `grace` of `now`.
pub fn target_recent(last_seen: Option<Instant>, now: Instant, grace: Duration) -> bool {
    last_seen.is_some_and(|seen| now.saturating_duration_since(seen) <= grace)
}

fn log_detections(frame_number: u64, detections: &[Detection]) {
    if detections.is_empty() {
        debug!("frame #{frame_number}: no detections");
        return;
    }
    debug!("frame #{frame_number}: {} detection(s)", detections.len());
    for (idx, det) in detections.iter().enumerate() {
        debug!(
            "  #{idx}: label={} conf={:.3} bbox={:?}",
            det.label, det.confidence, det.bbox
        );
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, collections::VecDeque};

    use video_ingest::{Frame, MemoryBackend, MemorySource};

    use super::*;
    use crate::pipeline::config::PlaybackSettings;

    /// Returns one scripted detection list per call, then nothing.
    struct Scripted(RefCell<VecDeque<Vec<Detection>>>);

    impl Scripted {
        fn new(script: Vec<Vec<Detection>>) -> Self {
            Self(RefCell::new(script.into()))
        }
    }

    impl Detect for Scripted {
        fn detect(&self, _bgr: &[u8], _w: i32, _h: i32) -> anyhow::Result<Vec<Detection>> {
            Ok(self.0.borrow_mut().pop_front().unwrap_or_default())
        }
    }

    fn frames(count: i64, offset: i64) -> Vec<Frame> {
        (1..=count)
            .map(|i| Frame::from_bgr(vec![0; 8 * 8 * 3], 8, 8, offset + i).unwrap())
            .collect()
    }

    fn supervisor(
        script: Vec<Vec<Detection>>,
        asset_frames: i64,
        display: Arc<DisplayState>,
    ) -> Supervisor<Scripted> {
        let backend = MemoryBackend::new().with_asset("clip.mp4", frames(asset_frames, 1000));
        let mut settings = PlaybackSettings::new("clip.mp4");
        settings.frame_rate = 1000.0;
        let playback = PlaybackController::new(Arc::new(backend), display.clone(), settings);
        Supervisor::new(
            Scripted::new(script),
            DetectionPolicy::default(),
            display,
            playback,
            RunSignal::running(),
        )
    }

    fn book(confidence: f32) -> Detection {
        Detection::new("book", confidence, [1.0, 1.0, 6.0, 6.0])
    }

    #[test]
    fn mode_follows_the_filtered_detections() {
        let display = Arc::new(DisplayState::new());
        let script = vec![
            vec![],
            vec![book(0.9)],
            vec![book(0.4), Detection::new("cup", 0.99, [0.0; 4])],
            vec![book(0.51)],
        ];
        let mut sup = supervisor(script, 2, display.clone());
        let mut source = MemorySource::new(frames(4, 0));

        let mut modes = Vec::new();
        while let Step::Iteration(iteration) = sup.step(&mut source).unwrap() {
            assert_eq!(iteration.matched > 0, iteration.mode() == Mode::Playing);
            modes.push(iteration.mode());
        }
        assert_eq!(
            modes,
            vec![Mode::Detecting, Mode::Playing, Mode::Detecting, Mode::Playing]
        );
        assert_eq!(display.mode(), Mode::Detecting);
    }

    #[test]
    fn trigger_publishes_annotated_frame_then_clip() {
        let display = Arc::new(DisplayState::new());
        let mut sup = supervisor(vec![vec![book(0.9)]], 3, display.clone());
        let mut source = MemorySource::new(frames(1, 0));

        let Step::Iteration(iteration) = sup.step(&mut source).unwrap() else {
            panic!("expected an iteration");
        };
        assert_eq!(iteration.playback, Some(PlaybackEnd::Completed { frames: 3 }));
        let latest = display.latest().unwrap();
        assert_eq!(latest.sequence, 4);
        assert_eq!(latest.frame.timestamp_ms, 1003);
        assert_eq!(latest.mode, Mode::Playing);
        assert_eq!(display.snapshot().detections.len(), 1);
    }

    #[test]
    fn missing_asset_never_enters_playing() {
        let display = Arc::new(DisplayState::new());
        let mut sup = supervisor(vec![vec![book(0.9)]], 0, display.clone());
        // Replace the clip-backed controller with one that has no asset at all.
        sup.playback = PlaybackController::new(
            Arc::new(MemoryBackend::new()),
            display.clone(),
            PlaybackSettings::new("clip.mp4"),
        );
        let mut source = MemorySource::new(frames(1, 0));

        let Step::Iteration(iteration) = sup.step(&mut source).unwrap() else {
            panic!("expected an iteration");
        };
        assert_eq!(iteration.matched, 1);
        assert_eq!(iteration.playback, Some(PlaybackEnd::Unavailable));
        assert_eq!(iteration.mode(), Mode::Detecting);
        assert_eq!(display.mode(), Mode::Detecting);
        let latest = display.latest().unwrap();
        assert_eq!(latest.mode, Mode::Detecting);
        assert_eq!(latest.sequence, 1);
    }

    #[test]
    fn open_failures_on_first_read_are_source_unavailable() {
        assert!(matches!(
            read_error(CaptureError::Open { uri: "rtsp://cam".into() }),
            SessionError::SourceUnavailable(_)
        ));
        assert!(matches!(
            read_error(CaptureError::Decode("truncated".into())),
            SessionError::CaptureRead(_)
        ));
    }

    #[test]
    fn playback_end_refreshes_the_target_timestamp() {
        let display = Arc::new(DisplayState::new());
        let mut sup = supervisor(vec![vec![book(0.9)]], 5, display.clone());
        let mut source = MemorySource::new(frames(1, 0));

        let before = Instant::now();
        sup.step(&mut source).unwrap();
        let seen = display.last_target_seen().unwrap();
        assert!(seen >= before + Duration::from_millis(4));
        assert!(target_recent(Some(seen), Instant::now(), Duration::from_secs(3)));
    }

    #[test]
    fn detector_errors_end_the_session() {
        struct Broken;
        impl Detect for Broken {
            fn detect(&self, _: &[u8], _: i32, _: i32) -> anyhow::Result<Vec<Detection>> {
                anyhow::bail!("model exploded")
            }
        }
        let display = Arc::new(DisplayState::new());
        let backend = Arc::new(MemoryBackend::new());
        let playback = PlaybackController::new(
            backend,
            display.clone(),
            PlaybackSettings::new("clip.mp4"),
        );
        let mut sup = Supervisor::new(
            Broken,
            DetectionPolicy::default(),
            display.clone(),
            playback,
            RunSignal::running(),
        );
        let mut source = MemorySource::new(frames(1, 0));
        assert!(matches!(
            sup.step(&mut source),
            Err(SessionError::Detector(_))
        ));
        assert!(display.latest().is_none());
    }

    #[test]
    fn stopped_signal_exits_before_reading() {
        let display = Arc::new(DisplayState::new());
        let mut sup = supervisor(vec![], 1, display.clone());
        sup.run_signal.stop();
        let backend = MemoryBackend::new().with_source("cam", frames(3, 0));
        let summary = sup.run(&backend, "cam").unwrap();
        assert_eq!(summary.exit, SessionExit::Stopped);
        assert_eq!(summary.frames, 0);
    }

    #[test]
    fn target_recent_respects_grace() {
        let now = Instant::now();
        let grace = Duration::from_secs(3);
        assert!(!target_recent(None, now, grace));
        assert!(target_recent(Some(now - Duration::from_secs(1)), now, grace));
        assert!(!target_recent(Some(now - Duration::from_secs(4)), now, grace));
    }
}
