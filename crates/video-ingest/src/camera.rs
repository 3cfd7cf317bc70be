//! OpenCV-backed capture for V4L devices and local files.

use std::path::Path;

use chrono::Utc;
use opencv::{
    core::{self, MatTraitConstManual},
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait, VideoCaptureTraitConst},
};
use tracing::warn;

use crate::{
    ffmpeg::parse_device_index,
    types::{CaptureError, Frame, FrameFormat, FrameSource, VideoBackend},
};

/// Opens devices and clips through OpenCV's `VideoCapture`, resizing to `target_size`.
#[derive(Clone, Debug)]
pub struct OpenCvBackend {
    target_size: (i32, i32),
}

impl OpenCvBackend {
    pub fn new(target_size: (i32, i32)) -> Self {
        Self { target_size }
    }
}

impl VideoBackend for OpenCvBackend {
    fn open_source(&self, uri: &str) -> Result<Box<dyn FrameSource>, CaptureError> {
        let mut cap = open_video_capture(uri)?;
        configure_camera(&mut cap, self.target_size, 30.0);
        Ok(Box::new(OpenCvSource::new(cap, self.target_size)))
    }

    fn open_asset(&self, path: &Path) -> Result<Box<dyn FrameSource>, CaptureError> {
        let uri = path.display().to_string();
        let cap = VideoCapture::from_file(&uri, videoio::CAP_ANY)
            .map_err(|e| CaptureError::Other(e.into()))?;
        if !cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
            return Err(CaptureError::Open { uri });
        }
        Ok(Box::new(OpenCvSource::new(cap, self.target_size)))
    }
}

pub struct OpenCvSource {
    cap: VideoCapture,
    target_size: (i32, i32),
    frame: Mat,
    scratch: Mat,
}

impl OpenCvSource {
    fn new(cap: VideoCapture, target_size: (i32, i32)) -> Self {
        Self {
            cap,
            target_size,
            frame: Mat::default(),
            scratch: Mat::default(),
        }
    }
}

impl FrameSource for OpenCvSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        let grabbed = self
            .cap
            .read(&mut self.frame)
            .map_err(|e| CaptureError::Decode(e.to_string()))?;
        if !grabbed {
            return Ok(None);
        }

        let size = self
            .frame
            .size()
            .map_err(|e| CaptureError::Other(e.into()))?;
        if size.width <= 0 {
            return Ok(None);
        }

        let (target_w, target_h) = self.target_size;
        let working = if size.width != target_w || size.height != target_h {
            opencv::imgproc::resize(
                &self.frame,
                &mut self.scratch,
                core::Size {
                    width: target_w,
                    height: target_h,
                },
                0.0,
                0.0,
                opencv::imgproc::INTER_LINEAR,
            )
            .map_err(|e| CaptureError::Other(e.into()))?;
            &self.scratch
        } else {
            &self.frame
        };

        let data = working
            .data_bytes()
            .map_err(|e| CaptureError::Other(e.into()))?
            .to_vec();

        Ok(Some(Frame {
            data,
            width: target_w,
            height: target_h,
            timestamp_ms: Utc::now().timestamp_millis(),
            format: FrameFormat::Bgr8,
        }))
    }
}

impl Drop for OpenCvSource {
    fn drop(&mut self) {
        let _ = self.cap.release();
    }
}

fn open_video_capture(uri: &str) -> Result<VideoCapture, CaptureError> {
    if let Some(index) = parse_device_index(uri) {
        for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
            match VideoCapture::new(index, backend) {
                Ok(cap) => {
                    if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                        return Ok(cap);
                    }
                }
                Err(err) => {
                    warn!("failed to open device #{index} with backend {backend}: {err}");
                }
            }
        }
    }

    for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
        match VideoCapture::from_file(uri, backend) {
            Ok(cap) => {
                if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                    return Ok(cap);
                }
            }
            Err(err) => {
                warn!("failed to open {uri} with backend {backend}: {err}");
            }
        }
    }

    Err(CaptureError::Open {
        uri: uri.to_string(),
    })
}

fn configure_camera(cap: &mut VideoCapture, target_size: (i32, i32), fps: f64) {
    if let Ok(fourcc) = videoio::VideoWriter::fourcc('M', 'J', 'P', 'G') {
        let _ = cap.set(videoio::CAP_PROP_FOURCC, fourcc as f64);
    }
    let _ = cap.set(videoio::CAP_PROP_FRAME_WIDTH, target_size.0 as f64);
    let _ = cap.set(videoio::CAP_PROP_FRAME_HEIGHT, target_size.1 as f64);
    let _ = cap.set(videoio::CAP_PROP_FPS, fps);
}
