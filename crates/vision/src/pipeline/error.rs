use thiserror::Error;
use video_ingest::CaptureError;

/// Reasons a detection session ends abnormally. All are fatal to the session
/// only; the controller can start a fresh one.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("capture source unavailable: {0}")]
    SourceUnavailable(#[source] CaptureError),
    #[error("capture read failed: {0}")]
    CaptureRead(#[source] CaptureError),
    #[error("detector could not be loaded: {0:#}")]
    DetectorUnavailable(#[source] anyhow::Error),
    #[error("detector failed: {0:#}")]
    Detector(#[source] anyhow::Error),
}
