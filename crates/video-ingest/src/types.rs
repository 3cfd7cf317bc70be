use std::path::Path;

use anyhow::Error;
use thiserror::Error;

/// Decoded frame produced by a capture source or an asset.
#[derive(Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: i32,
    pub height: i32,
    pub timestamp_ms: i64,
    pub format: FrameFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Bgr8,
}

impl FrameFormat {
    pub fn channels(self) -> usize {
        match self {
            FrameFormat::Bgr8 => 3,
        }
    }
}

impl Frame {
    /// Wrap a BGR8 buffer, checking that it matches the stated dimensions.
    pub fn from_bgr(
        data: Vec<u8>,
        width: i32,
        height: i32,
        timestamp_ms: i64,
    ) -> Result<Self, CaptureError> {
        let expected = frame_len(width, height, FrameFormat::Bgr8);
        if width <= 0 || height <= 0 || data.len() != expected {
            return Err(CaptureError::Decode(format!(
                "BGR8 buffer of {} bytes does not match {width}x{height}",
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            timestamp_ms,
            format: FrameFormat::Bgr8,
        })
    }

    pub fn channels(&self) -> usize {
        self.format.channels()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("timestamp_ms", &self.timestamp_ms)
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Number of bytes a frame of the given size occupies.
pub fn frame_len(width: i32, height: i32, format: FrameFormat) -> usize {
    (width.max(0) as usize) * (height.max(0) as usize) * format.channels()
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open video source {uri:?}")]
    Open { uri: String },
    #[error("failed to decode frame: {0}")]
    Decode(String),
    #[error(transparent)]
    Other(#[from] Error),
}

/// An open stream of frames. Dropping the source releases the underlying handle.
pub trait FrameSource {
    /// Next decoded frame, `Ok(None)` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError>;
}

/// Opens live capture sources and pre-recorded assets.
pub trait VideoBackend: Send + Sync {
    fn open_source(&self, uri: &str) -> Result<Box<dyn FrameSource>, CaptureError>;

    fn open_asset(&self, path: &Path) -> Result<Box<dyn FrameSource>, CaptureError>;
}
