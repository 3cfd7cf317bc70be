#![allow(dead_code)]

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use ml_core::{Detect, Detection};
use video_ingest::{Frame, MemoryBackend};
use vision::{DetectorFactory, TriggerConfig};

pub const SOURCE: &str = "cam";
pub const ASSET: &str = "clip.mp4";

pub const WIDTH: i32 = 16;
pub const HEIGHT: i32 = 12;

/// First byte of a live frame that contains a confidently detected book.
pub const BOOK: u8 = 200;
/// First byte of a live frame whose book sits exactly on the threshold.
pub const BORDERLINE_BOOK: u8 = 150;
const EMPTY: u8 = 10;
const CLIP: u8 = 60;

fn filled(fill: u8, timestamp_ms: i64) -> Frame {
    Frame::from_bgr(
        vec![fill; (WIDTH * HEIGHT * 3) as usize],
        WIDTH,
        HEIGHT,
        timestamp_ms,
    )
    .unwrap()
}

/// Live frames from a fill pattern; timestamps start at 1.
pub fn live(pattern: &[u8]) -> Vec<Frame> {
    pattern
        .iter()
        .enumerate()
        .map(|(idx, fill)| filled(*fill, idx as i64 + 1))
        .collect()
}

/// `count` live frames without a target.
pub fn empty_live(count: usize) -> Vec<Frame> {
    live(&vec![EMPTY; count])
}

pub fn empty() -> u8 {
    EMPTY
}

/// Asset frames; timestamps start at 10_001.
pub fn clip(count: usize) -> Vec<Frame> {
    (1..=count)
        .map(|idx| filled(CLIP, 10_000 + idx as i64))
        .collect()
}

/// Reports a person on every frame and a book when the frame is marked.
pub struct MarkerDetector {
    delay: Duration,
}

impl Detect for MarkerDetector {
    fn detect(&self, bgr: &[u8], _width: i32, _height: i32) -> anyhow::Result<Vec<Detection>> {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        let mut detections = vec![Detection::new("person", 0.95, [0.0, 0.0, 4.0, 4.0])];
        match bgr.first() {
            Some(&BOOK) => detections.push(Detection::new("book", 0.9, [2.0, 2.0, 10.0, 8.0])),
            Some(&BORDERLINE_BOOK) => {
                detections.push(Detection::new("book", 0.5, [2.0, 2.0, 10.0, 8.0]))
            }
            _ => {}
        }
        Ok(detections)
    }
}

pub fn marker_detector(delay: Duration) -> DetectorFactory {
    Arc::new(move || Ok(Box::new(MarkerDetector { delay }) as Box<dyn Detect>))
}

pub fn failing_detector() -> DetectorFactory {
    Arc::new(|| Err(anyhow::anyhow!("weights missing")))
}

struct PanickingDetector;

impl Detect for PanickingDetector {
    fn detect(&self, _bgr: &[u8], _width: i32, _height: i32) -> anyhow::Result<Vec<Detection>> {
        panic!("inference blew up")
    }
}

pub fn panicking_detector() -> DetectorFactory {
    Arc::new(|| Ok(Box::new(PanickingDetector) as Box<dyn Detect>))
}

pub fn backend(live: Vec<Frame>, clip_frames: usize) -> Arc<MemoryBackend> {
    Arc::new(
        MemoryBackend::new()
            .with_source(SOURCE, live)
            .with_asset(ASSET, clip(clip_frames)),
    )
}

/// Fast-paced configuration reading from [`SOURCE`] and playing [`ASSET`].
pub fn config() -> TriggerConfig {
    let mut config = TriggerConfig::new(SOURCE, ASSET);
    config.stop_grace = Duration::from_millis(20);
    config.playback.frame_rate = 500.0;
    config
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
