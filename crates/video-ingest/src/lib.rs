//! Frame sources for live capture and pre-recorded assets.
//!
//! Every backend implements [`VideoBackend`], which opens a [`FrameSource`] for a
//! capture URI or an asset path. Sources are pulled synchronously; dropping one
//! releases the device, file or child process behind it.

#[cfg(feature = "with-opencv")]
mod camera;
mod ffmpeg;
mod memory;
mod types;

#[cfg(feature = "with-opencv")]
pub use camera::{OpenCvBackend, OpenCvSource};
pub use ffmpeg::{FfmpegBackend, FfmpegSource};
pub use memory::{MemoryBackend, MemorySource};
pub use types::{CaptureError, Frame, FrameFormat, FrameSource, VideoBackend, frame_len};
