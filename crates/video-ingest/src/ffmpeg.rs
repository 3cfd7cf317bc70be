//! FFmpeg subprocess backend: every source is decoded by an `ffmpeg` child that
//! writes raw BGR24 frames to stdout.

use std::{
    io::{ErrorKind, Read},
    path::Path,
    process::{Child, ChildStdout, Command, Stdio},
};

use anyhow::anyhow;
use chrono::Utc;
use tracing::debug;

use crate::types::{CaptureError, Frame, FrameFormat, FrameSource, VideoBackend, frame_len};

/// Spawns one `ffmpeg` process per opened source, scaling output to `target_size`.
#[derive(Clone, Debug)]
pub struct FfmpegBackend {
    target_size: (i32, i32),
    binary: String,
}

impl FfmpegBackend {
    pub fn new(target_size: (i32, i32)) -> Self {
        Self {
            target_size,
            binary: "ffmpeg".to_string(),
        }
    }

    /// Use a specific ffmpeg executable instead of the one on `PATH`.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-nostdin");
        cmd
    }

    fn finish_command(&self, cmd: &mut Command) {
        let scale_arg = format!("scale={}:{}", self.target_size.0, self.target_size.1);
        cmd.arg("-an")
            .arg("-vf")
            .arg(&scale_arg)
            .arg("-pix_fmt")
            .arg("bgr24")
            .arg("-f")
            .arg("rawvideo")
            .arg("-");
    }
}

impl VideoBackend for FfmpegBackend {
    fn open_source(&self, uri: &str) -> Result<Box<dyn FrameSource>, CaptureError> {
        let mut cmd = self.base_command();
        if uri.starts_with("rtsp://") || uri.starts_with("rtsps://") {
            cmd.arg("-rtsp_transport")
                .arg("tcp")
                .arg("-fflags")
                .arg("nobuffer")
                .arg("-flags")
                .arg("low_delay")
                .arg("-i")
                .arg(uri);
        } else if let Some(index) = parse_device_index(uri) {
            let device = format!("/dev/video{index}");
            if !Path::new(&device).exists() {
                return Err(CaptureError::Open {
                    uri: uri.to_string(),
                });
            }
            cmd.arg("-f").arg("video4linux2").arg("-i").arg(&device);
        } else {
            if !Path::new(uri).exists() {
                return Err(CaptureError::Open {
                    uri: uri.to_string(),
                });
            }
            // Files standing in for a live feed are read at their native rate.
            cmd.arg("-re").arg("-i").arg(uri);
        }
        self.finish_command(&mut cmd);
        let source = FfmpegSource::spawn(cmd, uri, self.target_size)?;
        Ok(Box::new(source))
    }

    fn open_asset(&self, path: &Path) -> Result<Box<dyn FrameSource>, CaptureError> {
        let uri = path.display().to_string();
        if !path.is_file() {
            return Err(CaptureError::Open { uri });
        }
        let mut cmd = self.base_command();
        cmd.arg("-i").arg(path);
        self.finish_command(&mut cmd);
        let source = FfmpegSource::spawn(cmd, &uri, self.target_size)?;
        Ok(Box::new(source))
    }
}

/// Frames read synchronously from a running ffmpeg child.
pub struct FfmpegSource {
    child: Child,
    stdout: ChildStdout,
    uri: String,
    size: (i32, i32),
    buffer: Vec<u8>,
    frames_read: u64,
}

impl FfmpegSource {
    fn spawn(mut cmd: Command, uri: &str, size: (i32, i32)) -> Result<Self, CaptureError> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        let mut child = cmd.spawn().map_err(|err| {
            debug!("ffmpeg spawn for {uri} failed: {err}");
            CaptureError::Open {
                uri: uri.to_string(),
            }
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::Other(anyhow!("failed to capture ffmpeg stdout")))?;
        Ok(Self {
            child,
            stdout,
            uri: uri.to_string(),
            size,
            buffer: vec![0u8; frame_len(size.0, size.1, FrameFormat::Bgr8)],
            frames_read: 0,
        })
    }

    /// Classify stdout EOF by the child's exit status.
    fn end_of_stream(&mut self) -> Result<Option<Frame>, CaptureError> {
        let status = self
            .child
            .wait()
            .map_err(|err| CaptureError::Other(err.into()))?;
        if status.success() {
            return Ok(None);
        }
        debug!("ffmpeg for {} exited with {status}", self.uri);
        if self.frames_read == 0 {
            Err(CaptureError::Open {
                uri: self.uri.clone(),
            })
        } else {
            Err(CaptureError::Decode(format!(
                "ffmpeg exited with {status} after {} frame(s)",
                self.frames_read
            )))
        }
    }
}

impl FrameSource for FfmpegSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        match self.stdout.read_exact(&mut self.buffer) {
            Ok(()) => {
                self.frames_read += 1;
                Ok(Some(Frame {
                    data: self.buffer.clone(),
                    width: self.size.0,
                    height: self.size.1,
                    timestamp_ms: Utc::now().timestamp_millis(),
                    format: FrameFormat::Bgr8,
                }))
            }
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => self.end_of_stream(),
            Err(err) => Err(CaptureError::Other(err.into())),
        }
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Interpret `0`, `1`, … and `/dev/videoN` as V4L device indices.
pub(crate) fn parse_device_index(uri: &str) -> Option<i32> {
    if let Ok(index) = uri.parse::<i32>() {
        return Some(index);
    }
    if let Some(stripped) = uri.strip_prefix("/dev/video") {
        if !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_digit()) {
            return stripped.parse::<i32>().ok();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_indices_are_recognised() {
        assert_eq!(parse_device_index("0"), Some(0));
        assert_eq!(parse_device_index("/dev/video2"), Some(2));
        assert_eq!(parse_device_index("/dev/video"), None);
        assert_eq!(parse_device_index("clip.mp4"), None);
    }

    #[test]
    fn missing_asset_is_reported_as_open_failure() {
        let backend = FfmpegBackend::new((64, 48));
        let err = match backend.open_asset(Path::new("/nonexistent/clip.mp4")) {
            Err(err) => err,
            Ok(_) => panic!("missing asset must not open"),
        };
        assert!(matches!(err, CaptureError::Open { .. }));
    }

    fn existing_file() -> &'static str {
        concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml")
    }

    #[cfg(unix)]
    #[test]
    fn failing_decoder_without_output_is_an_open_failure() {
        let backend = FfmpegBackend::new((8, 8)).with_binary("false");
        let mut source = backend.open_source(existing_file()).unwrap();
        assert!(matches!(
            source.next_frame(),
            Err(CaptureError::Open { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn clean_decoder_exit_is_end_of_stream() {
        let backend = FfmpegBackend::new((8, 8)).with_binary("true");
        let mut source = backend.open_source(existing_file()).unwrap();
        assert!(source.next_frame().unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn decoder_failure_after_frames_is_a_decode_error() {
        use std::os::unix::fs::PermissionsExt;

        // Emits exactly one 8x8 BGR frame, then fails.
        let script = std::env::temp_dir().join(format!("fake-ffmpeg-{}.sh", std::process::id()));
        std::fs::write(&script, "#!/bin/sh\nhead -c 192 /dev/zero\nexit 3\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let backend = FfmpegBackend::new((8, 8)).with_binary(script.display().to_string());
        // A freshly written script can briefly be "text file busy" while other
        // tests fork.
        let mut source = (0..20)
            .find_map(|_| {
                backend.open_source(existing_file()).ok().or_else(|| {
                    std::thread::sleep(std::time::Duration::from_millis(10));
                    None
                })
            })
            .expect("script never became executable");
        assert_eq!(source.next_frame().unwrap().unwrap().data.len(), 192);
        let err = match source.next_frame() {
            Err(err) => err,
            Ok(frame) => panic!("expected a decode error, got {frame:?}"),
        };
        assert!(matches!(err, CaptureError::Decode(_)), "{err}");
        let _ = std::fs::remove_file(&script);
    }

    #[test]
    fn missing_file_source_is_reported_as_open_failure() {
        let backend = FfmpegBackend::new((64, 48));
        assert!(matches!(
            backend.open_source("/nonexistent/feed.mp4"),
            Err(CaptureError::Open { .. })
        ));
    }
}
