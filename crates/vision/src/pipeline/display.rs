//! Single-slot frame hand-off between the session thread and HTTP readers.
//!
//! `DisplayState` holds the most recently published frame together with the mode
//! and debounce flags. Every accessor takes the one mutex for exactly one short
//! critical section; frames are moved into an `Arc` on publish so readers share
//! an immutable buffer and never observe a frame being replaced mid-read.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use serde::Serialize;
use video_ingest::Frame;

use crate::pipeline::data::DetectionSummary;

/// Which component currently owns frame publication.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Detecting,
    Playing,
}

impl Mode {
    pub fn label(self) -> &'static str {
        match self {
            Mode::Detecting => "detecting",
            Mode::Playing => "playing",
        }
    }
}

/// A frame as seen by readers.
#[derive(Clone, Debug)]
pub struct PublishedFrame {
    pub frame: Arc<Frame>,
    /// Monotonic publish counter, starting at 1.
    pub sequence: u64,
    /// Mode that was active when the frame was published.
    pub mode: Mode,
}

/// Point-in-time copy of the flags, taken in one critical section.
#[derive(Clone, Debug)]
pub struct DisplaySnapshot {
    pub mode: Mode,
    pub sequence: u64,
    pub last_target_seen: Option<Instant>,
    pub interrupt_requested: bool,
    pub detections: Vec<DetectionSummary>,
}

impl DisplaySnapshot {
    /// Time since the target was last seen, relative to `now`.
    pub fn target_absent_for(&self, now: Instant) -> Option<Duration> {
        self.last_target_seen
            .map(|seen| now.saturating_duration_since(seen))
    }
}

#[derive(Default)]
struct DisplayInner {
    frame: Option<Arc<Frame>>,
    sequence: u64,
    frame_mode: Mode,
    mode: Mode,
    last_target_seen: Option<Instant>,
    interrupt_requested: bool,
    detections: Vec<DetectionSummary>,
}

#[derive(Default)]
pub struct DisplayState {
    inner: Mutex<DisplayInner>,
}

impl DisplayState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DisplayInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the displayed frame, dropping the previous one. Returns its sequence.
    pub fn publish(&self, frame: Frame) -> u64 {
        let frame = Arc::new(frame);
        let (sequence, mode, previous) = {
            let mut inner = self.lock();
            inner.sequence = inner.sequence.wrapping_add(1);
            let previous = inner.frame.replace(frame);
            inner.frame_mode = inner.mode;
            (inner.sequence, inner.mode, previous)
        };
        // Release the old buffer outside the critical section.
        drop(previous);
        metrics::counter!("trigger_frames_published_total", "mode" => mode.label()).increment(1);
        sequence
    }

    /// Most recently published frame, `None` before the first publish.
    pub fn latest(&self) -> Option<PublishedFrame> {
        let inner = self.lock();
        inner.frame.as_ref().map(|frame| PublishedFrame {
            frame: Arc::clone(frame),
            sequence: inner.sequence,
            mode: inner.frame_mode,
        })
    }

    pub fn snapshot(&self) -> DisplaySnapshot {
        let inner = self.lock();
        DisplaySnapshot {
            mode: inner.mode,
            sequence: inner.sequence,
            last_target_seen: inner.last_target_seen,
            interrupt_requested: inner.interrupt_requested,
            detections: inner.detections.clone(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.lock().mode
    }

    pub fn in_playback(&self) -> bool {
        self.mode() == Mode::Playing
    }

    pub(crate) fn set_mode(&self, mode: Mode) {
        self.lock().mode = mode;
    }

    /// Record a sighting. Earlier instants never move the timestamp backwards.
    pub(crate) fn mark_target_seen(&self, at: Instant) {
        let mut inner = self.lock();
        inner.last_target_seen = Some(match inner.last_target_seen {
            Some(previous) if previous > at => previous,
            _ => at,
        });
    }

    pub(crate) fn record_detections(&self, detections: Vec<DetectionSummary>) {
        self.lock().detections = detections;
    }

    pub fn last_target_seen(&self) -> Option<Instant> {
        self.lock().last_target_seen
    }

    /// Ask an in-progress playback to stop at its next frame boundary.
    pub fn request_interrupt(&self) {
        self.lock().interrupt_requested = true;
    }

    pub fn interrupt_requested(&self) -> bool {
        self.lock().interrupt_requested
    }

    /// Clear the interrupt flag, returning whether it was set.
    pub(crate) fn take_interrupt(&self) -> bool {
        std::mem::take(&mut self.lock().interrupt_requested)
    }

    /// Reset per-session flags; the last frame stays visible.
    pub(crate) fn begin_session(&self) {
        let mut inner = self.lock();
        inner.mode = Mode::Detecting;
        inner.interrupt_requested = false;
        inner.last_target_seen = None;
        inner.detections.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: i64) -> Frame {
        Frame::from_bgr(vec![tag as u8; 4 * 4 * 3], 4, 4, tag).unwrap()
    }

    #[test]
    fn empty_until_first_publish() {
        let display = DisplayState::new();
        assert!(display.latest().is_none());
        assert_eq!(display.publish(frame(1)), 1);
        let latest = display.latest().unwrap();
        assert_eq!(latest.sequence, 1);
        assert_eq!(latest.frame.timestamp_ms, 1);
    }

    #[test]
    fn publish_keeps_only_the_latest_frame() {
        let display = DisplayState::new();
        display.publish(frame(1));
        let held = display.latest().unwrap();
        display.publish(frame(2));
        assert_eq!(display.latest().unwrap().frame.timestamp_ms, 2);
        // The reader's copy is unaffected and is now the only owner of frame 1.
        assert_eq!(held.frame.timestamp_ms, 1);
        assert_eq!(Arc::strong_count(&held.frame), 1);
    }

    #[test]
    fn published_frames_carry_the_active_mode() {
        let display = DisplayState::new();
        display.set_mode(Mode::Playing);
        display.publish(frame(1));
        assert_eq!(display.latest().unwrap().mode, Mode::Playing);
        assert!(display.in_playback());

        // Switching back does not relabel the frame already on display.
        display.set_mode(Mode::Detecting);
        assert_eq!(display.latest().unwrap().mode, Mode::Playing);
    }

    #[test]
    fn target_timestamp_never_moves_backwards() {
        let display = DisplayState::new();
        let later = Instant::now();
        let earlier = later - Duration::from_millis(50);
        display.mark_target_seen(later);
        display.mark_target_seen(earlier);
        assert_eq!(display.last_target_seen(), Some(later));
    }

    #[test]
    fn interrupt_flag_is_consumed_once() {
        let display = DisplayState::new();
        assert!(!display.take_interrupt());
        display.request_interrupt();
        assert!(display.interrupt_requested());
        assert!(display.take_interrupt());
        assert!(!display.interrupt_requested());
    }

    #[test]
    fn begin_session_resets_flags_but_keeps_the_frame() {
        let display = DisplayState::new();
        display.publish(frame(3));
        display.set_mode(Mode::Playing);
        display.request_interrupt();
        display.mark_target_seen(Instant::now());
        display.begin_session();
        let snapshot = display.snapshot();
        assert_eq!(snapshot.mode, Mode::Detecting);
        assert!(!snapshot.interrupt_requested);
        assert!(snapshot.last_target_seen.is_none());
        assert!(display.latest().is_some());
    }
}
