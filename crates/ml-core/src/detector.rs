use anyhow::Result;

/// Single labelled detection in frame pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    /// `[x1, y1, x2, y2]`.
    pub bbox: [f32; 4],
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: [f32; 4]) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }

    /// True when this detection is the wanted label and strictly above `threshold`.
    pub fn matches(&self, target: &str, threshold: f32) -> bool {
        self.label == target && self.confidence > threshold
    }
}

/// Object detector over BGR8 frames.
///
/// Implementations must not retain state between calls that changes their output.
pub trait Detect {
    fn detect(&self, bgr: &[u8], width: i32, height: i32) -> Result<Vec<Detection>>;
}

impl<D: Detect + ?Sized> Detect for Box<D> {
    fn detect(&self, bgr: &[u8], width: i32, height: i32) -> Result<Vec<Detection>> {
        (**self).detect(bgr, width, height)
    }
}

/// Keep only detections of `target` whose confidence exceeds `threshold`.
pub fn filter_target(detections: Vec<Detection>, target: &str, threshold: f32) -> Vec<Detection> {
    detections
        .into_iter()
        .filter(|det| det.matches(target, threshold))
        .collect()
}
