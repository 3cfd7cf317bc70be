use ml_core::Detection;
use serde::Serialize;

use crate::pipeline::display::Mode;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectionSummary {
    pub class: String,
    pub score: f32,
    pub bbox: [f32; 4],
}

impl From<&Detection> for DetectionSummary {
    fn from(det: &Detection) -> Self {
        Self {
            class: det.label.clone(),
            score: det.confidence,
            bbox: det.bbox,
        }
    }
}

#[derive(Serialize)]
pub(crate) struct ControlResponse {
    pub(crate) status: &'static str,
}

#[derive(Serialize)]
pub(crate) struct StatusResponse<'a> {
    pub(crate) running: bool,
    pub(crate) mode: Mode,
    pub(crate) sequence: u64,
    pub(crate) target_recent: bool,
    pub(crate) target_absent_ms: Option<u64>,
    pub(crate) detections: &'a [DetectionSummary],
    pub(crate) last_session: Option<String>,
}
